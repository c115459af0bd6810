//! mcpbridge - MCP client and tool bridge library
//!
//! This library lets an agent call tools on remote MCP (Model Context
//! Protocol) servers that a user has installed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: JSON-RPC types, the Streamable HTTP and legacy SSE transports,
//!   the dual-transport client, and installation credentials
//! - `tools`: The `call_mcp_server` tool (allow-list, SSRF check, token
//!   refresh, session caching, recovery retry)
//! - `security`: Outbound URL policy
//! - `session_cache`: Shared session-id cache
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcpbridge::config::Config;
//! use mcpbridge::mcp::auth::installation::InMemoryInstallationStore;
//! use mcpbridge::mcp::auth::refresh::OAuthTokenRefresher;
//! use mcpbridge::mcp::client::HttpMcpClientFactory;
//! use mcpbridge::security::SsrfValidator;
//! use mcpbridge::session_cache::InMemorySessionCache;
//! use mcpbridge::tools::call_mcp_server::{CallMcpServerTool, McpToolDependencies};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let deps = McpToolDependencies::new(
//!         Arc::new(InMemoryInstallationStore::new()),
//!         Arc::new(OAuthTokenRefresher::default()),
//!         Arc::new(SsrfValidator::new()),
//!         Arc::new(InMemorySessionCache::new()),
//!         Arc::new(HttpMcpClientFactory::new(config.client.clone())),
//!     );
//!     let tool = CallMcpServerTool::new(deps, "conversation-1", config.installations);
//!     let (text, _) = tool
//!         .execute("https://mcp.example.com/mcp", "__list_tools__", serde_json::json!({}))
//!         .await?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod security;
pub mod session_cache;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, Result, Severity, ToolCallError};
pub use mcp::client::{HttpMcpClientFactory, McpClient, McpClientFactory, McpSession};
pub use tools::call_mcp_server::{CallMcpServerTool, McpToolDependencies};
