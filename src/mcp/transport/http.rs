//! Streamable HTTP transport for MCP
//!
//! This module implements [`StreamableHttpTransport`]. Every outbound
//! JSON-RPC message is sent as an HTTP POST to the server URL. The server
//! may reply with:
//!
//! - `application/json` -- a direct JSON-RPC response body
//! - `text/event-stream` -- a single SSE event whose `data:` line holds the
//!   JSON-RPC response
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! When the server returns an `Mcp-Session-Id` response header the value is
//! stored in the caller-owned session slot and attached to every later POST.
//!
//! # Failure mapping
//!
//! - `401` -> [`BridgeError::McpUnauthorized`]
//! - any other non-2xx (including the `404`/`405` that signal "no
//!   Streamable HTTP here") -> [`BridgeError::McpHttpStatus`]; deciding to
//!   fall back to SSE is the client's job, not this layer's.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::mcp::jsonrpc::parse_response_body;
use crate::mcp::transport::{apply_post_headers, capture_session_id, map_send_error, status_error};
use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse};

/// Streamable HTTP transport bound to one MCP endpoint.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use mcpbridge::mcp::transport::http::StreamableHttpTransport;
///
/// let transport = StreamableHttpTransport::new(
///     reqwest::Client::new(),
///     Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(30),
/// );
/// assert_eq!(transport.endpoint().path(), "/mcp");
/// ```
#[derive(Debug, Clone)]
pub struct StreamableHttpTransport {
    /// Shared HTTP client (connection pool).
    http: reqwest::Client,
    /// MCP endpoint URL (POST target).
    endpoint: url::Url,
    /// Extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    /// Per-request timeout.
    timeout: Duration,
}

impl StreamableHttpTransport {
    /// Construct a transport targeting `endpoint`.
    ///
    /// No network I/O is performed at construction time.
    pub fn new(
        http: reqwest::Client,
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint,
            headers,
            timeout,
        }
    }

    /// The POST target of this transport.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// POST `request` and decode the reply.
    ///
    /// Returns `Ok(None)` for notifications, whose response body is ignored.
    /// `session_id` is attached to the request when set and updated from the
    /// `Mcp-Session-Id` response header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BridgeError::McpTimeout`] or
    /// [`crate::error::BridgeError::McpTransport`] when the request cannot be
    /// completed, [`crate::error::BridgeError::McpUnauthorized`] on `401`,
    /// [`crate::error::BridgeError::McpHttpStatus`] on other non-2xx
    /// statuses, and [`crate::error::BridgeError::McpProtocol`] when the body
    /// is not a JSON-RPC response.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
        session_id: &mut Option<String>,
    ) -> Result<Option<JsonRpcResponse>> {
        let body = serde_json::to_string(request)?;
        let req = self
            .http
            .post(self.endpoint.as_str())
            .timeout(self.timeout)
            .body(body);
        let req = apply_post_headers(req, &self.headers, session_id.as_deref());

        let response = req
            .send()
            .await
            .map_err(|e| map_send_error(e, self.endpoint.as_str(), &request.method))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        capture_session_id(&response, session_id);

        if request.is_notification() {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let text = response
            .text()
            .await
            .map_err(|e| map_send_error(e, self.endpoint.as_str(), &request.method))?;

        parse_response_body(&text, &content_type).map(Some)
    }
}
