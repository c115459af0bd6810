//! Command-line interface definition for mcpbridge
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to list installed servers, list a server's tools,
//! and call a tool.

use clap::{Parser, Subcommand};

/// mcpbridge - call tools on remote MCP servers
///
/// Connects to installed MCP servers over Streamable HTTP (falling back to
/// legacy SSE) with session caching and OAuth token refresh.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcpbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Conversation id used to key cached sessions (random when omitted)
    #[arg(long, global = true)]
    pub conversation: Option<String>,

    /// Allow loopback and private server URLs (local development)
    #[arg(long, global = true)]
    pub allow_private_ips: bool,

    /// Override the per-request timeout in seconds
    #[arg(long, global = true)]
    pub request_timeout: Option<u64>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcpbridge
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List installed MCP servers
    Servers,

    /// List the tools offered by an installed server
    ListTools {
        /// Server URL, as configured under `installations`
        #[arg(short, long)]
        server: String,
    },

    /// Call a tool on an installed server
    Call {
        /// Server URL, as configured under `installations`
        #[arg(short, long)]
        server: String,

        /// Tool name
        #[arg(short, long)]
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            conversation: None,
            allow_private_ips: false,
            request_timeout: None,
            command: Commands::Servers,
        }
    }
}
