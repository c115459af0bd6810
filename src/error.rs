//! Error types for mcpbridge
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling. Library functions return
//! [`Result`] (an `anyhow` alias) and callers classify failures by
//! downcasting to [`BridgeError`].
//!
//! The tool-call boundary converts every failure into a [`ToolCallError`],
//! which carries an explicit [`Severity`] so that an agent framework can
//! decide whether re-invoking the tool makes sense.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for mcpbridge operations
///
/// Covers configuration, JSON-RPC protocol, HTTP transport, security policy,
/// and OAuth token refresh failures.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or incomplete JSON-RPC exchange (bad SSE framing, missing
    /// result, unexpected payload shape)
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    /// The server answered with an explicit JSON-RPC `error` member
    #[error("JSON-RPC error {code}: {message}")]
    McpRpc {
        /// JSON-RPC error code
        code: i64,
        /// Server-provided error message
        message: String,
    },

    /// Connection-level failure (refused, reset, stream closed)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// No response arrived within the configured deadline
    #[error("MCP timeout: server={server}, method={method}")]
    McpTimeout {
        /// Server URL the request was sent to
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// Non-2xx HTTP status other than 401
    #[error("MCP server returned HTTP {status}: {body}")]
    McpHttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// HTTP 401 from the MCP server; carries the `WWW-Authenticate` value
    #[error("MCP server rejected credentials (HTTP 401): {0}")]
    McpUnauthorized(String),

    /// Destination rejected by the SSRF policy
    #[error("Security policy violation: {0}")]
    Security(String),

    /// OAuth refresh could not produce a usable token
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Caller input that can be corrected (e.g. a server URL that is not installed)
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    /// Returns the HTTP status carried by this error, if any.
    ///
    /// `McpUnauthorized` reports `401`.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            BridgeError::McpHttpStatus { status, .. } => Some(*status),
            BridgeError::McpUnauthorized(_) => Some(401),
            _ => None,
        }
    }
}

/// Result type alias for mcpbridge operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns the [`BridgeError`] wrapped in `err`, if there is one.
pub fn bridge_error(err: &anyhow::Error) -> Option<&BridgeError> {
    err.downcast_ref::<BridgeError>()
}

/// Returns `true` when `err` is an HTTP 401 from an MCP server.
pub fn is_unauthorized(err: &anyhow::Error) -> bool {
    matches!(bridge_error(err), Some(BridgeError::McpUnauthorized(_)))
}

/// Whether a failed tool call is worth re-invoking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Transient or caller-correctable; the agent may try again
    Retryable,
    /// Requires user action (re-authentication, a different server)
    Fatal,
}

/// Error surfaced to the calling agent by a tool invocation
///
/// # Examples
///
/// ```
/// use mcpbridge::error::{Severity, ToolCallError};
///
/// let err = ToolCallError::fatal("blocked by security policy");
/// assert_eq!(err.severity, Severity::Fatal);
/// assert!(!err.is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolCallError {
    /// Retry classification
    pub severity: Severity,
    /// User/agent-facing message with remediation or retry context
    pub message: String,
}

impl ToolCallError {
    /// Create an error with an explicit severity
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Retryable,
            message: message.into(),
        }
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    /// Returns `true` for [`Severity::Retryable`]
    pub fn is_retryable(&self) -> bool {
        self.severity == Severity::Retryable
    }
}
