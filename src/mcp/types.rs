//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types used by the bridge when talking to
//! third-party MCP servers. Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`. All `Option<>` fields omit their key
//! from JSON when `None`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Protocol revision announced in every `initialize` request.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Version reported in `clientInfo`.
pub const CLIENT_VERSION: &str = "1.0.0";

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Request the list of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Methods with this prefix are fire-and-forget and never carry an `id`.
pub const NOTIFICATION_PREFIX: &str = "notifications/";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// `id` is `None` only for notifications.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(Some(1), "tools/list", None);
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["jsonrpc"], "2.0");
/// assert_eq!(json["id"], 1);
/// assert!(json.get("params").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier. Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request envelope with `jsonrpc` set to `"2.0"`.
    pub fn new(id: Option<u64>, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Returns `true` when this envelope carries no `id`.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present in a well-formed response.
/// The `id` is kept as a raw value because some servers echo ids as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier.
    #[serde(default)]
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Numeric form of `id`, accepting both integer and string encodings.
    pub fn numeric_id(&self) -> Option<u64> {
        parse_numeric_id(self.id.as_ref()?)
    }
}

/// Parse an integer request id that may have been echoed as a string.
pub fn parse_numeric_id(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or the MCP protocol.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle types
// ---------------------------------------------------------------------------

/// Name and version of an MCP client or server implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version string.
    #[serde(default)]
    pub version: String,
}

/// Parameters of the `initialize` request.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::types::{Implementation, InitializeParams};
///
/// let params = InitializeParams::new(Implementation {
///     name: "mcpbridge".to_string(),
///     version: "1.0.0".to_string(),
/// });
/// let json = serde_json::to_value(&params).unwrap();
/// assert_eq!(json["protocolVersion"], "2025-03-26");
/// assert_eq!(json["capabilities"], serde_json::json!({}));
/// assert_eq!(json["clientInfo"]["name"], "mcpbridge");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Requested protocol revision.
    pub protocol_version: String,
    /// Client capabilities; always an empty object for this bridge.
    pub capabilities: serde_json::Value,
    /// Client identity.
    pub client_info: Implementation,
}

impl InitializeParams {
    /// Build the fixed `initialize` parameters for `client_info`.
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info,
        }
    }
}

/// Result of a successful `initialize` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision selected by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Raw server capabilities object.
    #[serde(default)]
    pub capabilities: serde_json::Value,
    /// Server identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Optional usage instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// One property in a tool's input schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// JSON schema `type`; usually a string, occasionally an array of types.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<serde_json::Value>,
    /// Parameter description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolParameter {
    /// Human-readable type name, `"any"` when the schema omits it.
    pub fn type_name(&self) -> String {
        match &self.param_type {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(types)) => types
                .iter()
                .filter_map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
            _ => "any".to_string(),
        }
    }
}

/// Input schema advertised for a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Parameters keyed by name.
    #[serde(default)]
    pub properties: BTreeMap<String, ToolParameter>,
    /// Names of required parameters.
    #[serde(default)]
    pub required: Vec<String>,
}

/// A tool as returned by `tools/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name used in `tools/call`.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments.
    #[serde(default)]
    pub input_schema: ToolInputSchema,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Tool arguments.
    pub arguments: serde_json::Value,
}

/// Concatenate the `text` parts of a `tools/call` result.
///
/// Only `content` entries with `"type": "text"` contribute; they are joined
/// with newlines. When the result carries no text parts the raw result JSON
/// is returned instead.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::types::extract_text_content;
///
/// let result = serde_json::json!({
///     "content": [
///         {"type": "text", "text": "first"},
///         {"type": "image", "data": "..."},
///         {"type": "text", "text": "second"}
///     ]
/// });
/// assert_eq!(extract_text_content(&result), "first\nsecond");
/// ```
pub fn extract_text_content(result: &serde_json::Value) -> String {
    let parts: Vec<&str> = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if parts.is_empty() {
        result.to_string()
    } else {
        parts.join("\n")
    }
}
