//! Tools module for mcpbridge
//!
//! This module contains the tool interface exposed to agent frameworks and
//! the [`call_mcp_server::CallMcpServerTool`] implementation.

pub mod call_mcp_server;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolCallError;

/// Tool definition structure
///
/// Follows the OpenAI function calling format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Name of the tool
    pub name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON schema for the tool's parameters
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Create a new tool definition
    pub fn new(name: String, description: String, parameters: serde_json::Value) -> Self {
        Self {
            name,
            description,
            parameters,
        }
    }

    /// The definition as a JSON value
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Successful tool output
///
/// `content` is shown to the model; `artifact` carries optional structured
/// data for the host application.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Text returned to the caller
    pub content: String,
    /// Structured side data, if any
    pub artifact: Option<serde_json::Value>,
}

impl ToolOutput {
    /// Create a text-only output
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifact: None,
        }
    }
}

/// Tool executor trait for implementing tool execution logic
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use mcpbridge::error::ToolCallError;
/// use mcpbridge::tools::{ToolExecutor, ToolOutput};
/// use serde_json::Value;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ToolExecutor for Echo {
///     fn tool_definition(&self) -> Value {
///         serde_json::json!({
///             "name": "echo",
///             "description": "Echo the input",
///             "parameters": {"type": "object", "properties": {}}
///         })
///     }
///
///     async fn execute(&self, args: Value) -> Result<ToolOutput, ToolCallError> {
///         Ok(ToolOutput::text(args.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool definition as a JSON value
    fn tool_definition(&self) -> serde_json::Value;

    /// Executes the tool with the given arguments
    ///
    /// # Errors
    ///
    /// Returns a [`ToolCallError`] whose severity tells the caller whether a
    /// retry can help.
    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolCallError>;
}
