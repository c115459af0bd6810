//! MCP HTTP transports
//!
//! Two transport variants are supported:
//!
//! - [`http::StreamableHttpTransport`] -- every JSON-RPC message is an
//!   independent POST; the reply arrives in the POST body as JSON or as a
//!   single inline SSE event.
//! - [`sse::SseTransport`] -- the legacy transport: a long-lived GET stream
//!   announces a message endpoint, requests are POSTed there, and responses
//!   come back asynchronously on the GET stream.
//!
//! [`TransportMode`] records which variant a client is using. A client
//! starts in `Unset`, settles on `StreamableHttp`, and may move to `Sse`
//! once, when the first `initialize` POST is answered with 404 or 405.

use std::collections::HashMap;

use crate::error::BridgeError;

pub mod http;
pub mod sse;

/// Session header set by the server and echoed back by the client.
pub const HEADER_SESSION_ID: &str = "Mcp-Session-Id";

/// `Accept` value used on every POST.
pub const ACCEPT_JSON_AND_SSE: &str = "application/json, text/event-stream";

/// Maximum number of characters of an error body kept in error messages.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Which transport variant a client is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// No request has been sent yet.
    #[default]
    Unset,
    /// Streamable HTTP (POST per message).
    StreamableHttp,
    /// Legacy SSE (GET stream + discovered POST endpoint).
    Sse,
}

/// Apply the headers shared by every MCP POST.
pub(crate) fn apply_post_headers(
    mut req: reqwest::RequestBuilder,
    headers: &HashMap<String, String>,
    session_id: Option<&str>,
) -> reqwest::RequestBuilder {
    req = req
        .header("Content-Type", "application/json")
        .header("Accept", ACCEPT_JSON_AND_SSE);

    if let Some(id) = session_id {
        req = req.header(HEADER_SESSION_ID, id);
    }

    for (k, v) in headers {
        req = req.header(k.as_str(), v.as_str());
    }
    req
}

/// Map a `reqwest` send failure onto the bridge's error taxonomy.
pub(crate) fn map_send_error(err: reqwest::Error, server: &str, method: &str) -> anyhow::Error {
    if err.is_timeout() {
        BridgeError::McpTimeout {
            server: server.to_string(),
            method: method.to_string(),
        }
        .into()
    } else {
        BridgeError::McpTransport(format!("request to {server} failed: {err}")).into()
    }
}

/// Turn a non-success response into an error, reading (and truncating) the
/// body for context.
pub(crate) async fn status_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        let www_auth = response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        return BridgeError::McpUnauthorized(www_auth).into();
    }

    let body = response.text().await.unwrap_or_default();
    BridgeError::McpHttpStatus {
        status: status.as_u16(),
        body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
    }
    .into()
}

/// Record the `Mcp-Session-Id` response header, if the server sent one.
pub(crate) fn capture_session_id(response: &reqwest::Response, session_id: &mut Option<String>) {
    if let Some(new_id) = response
        .headers()
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
    {
        if session_id.as_deref() != Some(new_id) {
            tracing::debug!("MCP server assigned a new session id");
            *session_id = Some(new_id.to_string());
        }
    }
}

/// Truncate `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
