//! JSON-RPC 2.0 envelope encoding and response decoding
//!
//! This module is the transport-independent core shared by the
//! Streamable-HTTP and legacy SSE transports:
//!
//! - [`RequestIdCounter`] hands out monotonically increasing request ids,
//!   starting at 1, for the lifetime of one client.
//! - [`build_request`] wraps a method and params into a [`JsonRpcRequest`],
//!   leaving the `id` off for `notifications/*` methods.
//! - [`parse_response_body`] decodes either a plain JSON body or a body
//!   framed as a single SSE event.
//! - [`into_result`] promotes a JSON-RPC `error` member into a
//!   [`BridgeError::McpRpc`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BridgeError, Result};
use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse, NOTIFICATION_PREFIX};

/// Monotonic per-client request id source.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::jsonrpc::RequestIdCounter;
///
/// let ids = RequestIdCounter::new();
/// assert_eq!(ids.next_id(), 1);
/// assert_eq!(ids.next_id(), 2);
/// ```
#[derive(Debug)]
pub struct RequestIdCounter {
    next: AtomicU64,
}

impl RequestIdCounter {
    /// Create a counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next id; never repeats for this counter.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for RequestIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `true` for fire-and-forget `notifications/*` methods.
pub fn is_notification(method: &str) -> bool {
    method.starts_with(NOTIFICATION_PREFIX)
}

/// Build a request envelope, assigning an id unless `method` is a
/// notification.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::jsonrpc::{build_request, RequestIdCounter};
///
/// let ids = RequestIdCounter::new();
/// let call = build_request(&ids, "tools/list", Some(serde_json::json!({})));
/// assert_eq!(call.id, Some(1));
///
/// let note = build_request(&ids, "notifications/initialized", None);
/// assert_eq!(note.id, None);
/// ```
pub fn build_request(
    ids: &RequestIdCounter,
    method: &str,
    params: Option<serde_json::Value>,
) -> JsonRpcRequest {
    let id = if is_notification(method) {
        None
    } else {
        Some(ids.next_id())
    };
    JsonRpcRequest::new(id, method, params)
}

/// Extract the payload of the first `data:` line in an SSE-framed body.
///
/// # Errors
///
/// Returns [`BridgeError::McpProtocol`] when the body contains no `data:`
/// line.
pub fn extract_sse_data(body: &str) -> Result<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
        .ok_or_else(|| BridgeError::McpProtocol("no data found in SSE response".to_string()).into())
}

/// Decode an HTTP response body into a [`JsonRpcResponse`].
///
/// When `content_type` contains `text/event-stream` the body is treated as
/// a single SSE event and its `data:` payload is decoded; otherwise the body
/// is decoded directly as JSON.
///
/// # Errors
///
/// Returns [`BridgeError::McpProtocol`] when the SSE framing has no data or
/// the payload is not a JSON-RPC response.
pub fn parse_response_body(body: &str, content_type: &str) -> Result<JsonRpcResponse> {
    let payload = if content_type.contains("text/event-stream") {
        extract_sse_data(body)?
    } else {
        body.to_string()
    };

    serde_json::from_str(&payload).map_err(|e| {
        BridgeError::McpProtocol(format!("invalid JSON-RPC response: {e}")).into()
    })
}

/// Convert a response into its `result` value.
///
/// A missing `result` is reported as `Value::Null`; callers decide whether
/// that is acceptable for their method.
///
/// # Errors
///
/// Returns [`BridgeError::McpRpc`] when the response carries an `error`.
pub fn into_result(response: JsonRpcResponse) -> Result<serde_json::Value> {
    if let Some(error) = response.error {
        return Err(BridgeError::McpRpc {
            code: error.code,
            message: error.message,
        }
        .into());
    }
    Ok(response.result.unwrap_or(serde_json::Value::Null))
}
