//! MCP (Model Context Protocol) client support for mcpbridge
//!
//! This module talks JSON-RPC 2.0 to remote MCP servers over HTTP, using the
//! Streamable HTTP transport and falling back to the legacy SSE transport
//! when a server does not accept Streamable HTTP.
//!
//! The implementation targets protocol revision **2025-03-26**.
//!
//! # Module Layout
//!
//! - `types`     -- Protocol constants, JSON-RPC envelopes, and tool types
//! - `jsonrpc`   -- Request id allocation and response decoding
//! - `transport` -- Streamable HTTP and legacy SSE transports
//! - `client`    -- [`client::McpClient`] plus the session/factory seams
//! - `auth`      -- Installations, credentials, and OAuth token refresh

pub mod auth;
pub mod client;
pub mod jsonrpc;
pub mod transport;
pub mod types;

pub use types::*;
