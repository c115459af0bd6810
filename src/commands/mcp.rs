//! MCP subcommand handlers
//!
//! Each handler builds a [`CallMcpServerTool`] from the loaded [`Config`]
//! using the real HTTP client factory, the SSRF validator, an in-memory
//! installation store seeded from `installations`, and an in-memory session
//! cache.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mcp::auth::installation::{AuthType, InMemoryInstallationStore, Installation};
use crate::mcp::auth::refresh::OAuthTokenRefresher;
use crate::mcp::client::HttpMcpClientFactory;
use crate::security::SsrfValidator;
use crate::session_cache::InMemorySessionCache;
use crate::tools::call_mcp_server::{CallMcpServerTool, McpToolDependencies, LIST_TOOLS_SENTINEL};

/// Owner under which configured installations are stored.
pub const LOCAL_OWNER: &str = "local";

/// Build the production dependency set from `config`.
pub fn build_dependencies(config: &Config) -> McpToolDependencies {
    let store = Arc::new(InMemoryInstallationStore::with_installations(
        LOCAL_OWNER,
        config.installations.clone(),
    ));

    let validator = if config.security.allow_private_ips {
        SsrfValidator::allow_private_ips()
    } else if config.security.resolve_dns {
        SsrfValidator::new().with_dns_resolution()
    } else {
        SsrfValidator::new()
    };

    McpToolDependencies::new(
        store,
        Arc::new(OAuthTokenRefresher::default()),
        Arc::new(validator),
        Arc::new(InMemorySessionCache::new()),
        Arc::new(HttpMcpClientFactory::new(config.client.clone())),
    )
    .with_session_ttl(Duration::from_secs(config.session_cache.ttl_seconds))
}

/// Build the tool for `conversation_id` over the configured installations.
///
/// # Errors
///
/// Propagates installation store failures.
pub async fn build_tool(config: &Config, conversation_id: &str) -> Result<CallMcpServerTool> {
    CallMcpServerTool::for_owner(build_dependencies(config), conversation_id, LOCAL_OWNER).await
}

/// Render the installed servers, one per line.
pub fn format_servers(installations: &[Installation]) -> String {
    if installations.is_empty() {
        return "No MCP servers installed.".to_string();
    }

    installations
        .iter()
        .map(|i| {
            let auth = match i.auth_type {
                AuthType::None => "none",
                AuthType::ApiKey => "api key",
                AuthType::Oauth => "oauth",
            };
            let name = if i.display_name.is_empty() {
                i.id.as_str()
            } else {
                i.display_name.as_str()
            };
            let mut line = format!("- {} {} (auth: {auth})", name.bold(), i.url);
            if i.sensitive_config.needs_reauth {
                line.push_str(&format!(" {}", "[needs re-authentication]".yellow()));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print the installed servers.
pub fn list_servers(config: &Config) {
    println!("{}", format_servers(&config.installations));
}

/// Print the tools offered by `server_url`.
///
/// # Errors
///
/// Returns the [`crate::error::ToolCallError`] produced by the call.
pub async fn list_tools(config: &Config, conversation_id: &str, server_url: &str) -> Result<()> {
    let tool = build_tool(config, conversation_id).await?;
    let (content, _) = tool
        .execute(server_url, LIST_TOOLS_SENTINEL, serde_json::json!({}))
        .await?;
    println!("{content}");
    Ok(())
}

/// Call `tool_name` on `server_url` with `args` (a JSON object) and print
/// the result.
///
/// # Errors
///
/// Returns [`BridgeError::Validation`] when `args` is not a JSON object, or
/// the [`crate::error::ToolCallError`] produced by the call.
pub async fn call_tool(
    config: &Config,
    conversation_id: &str,
    server_url: &str,
    tool_name: &str,
    args: &str,
) -> Result<()> {
    let arguments = parse_arguments(args)?;
    let tool = build_tool(config, conversation_id).await?;
    let (content, _) = tool.execute(server_url, tool_name, arguments).await?;
    println!("{content}");
    Ok(())
}

fn parse_arguments(args: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(args)
        .map_err(|e| BridgeError::Validation(format!("--args is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(BridgeError::Validation("--args must be a JSON object".to_string()).into());
    }
    Ok(value)
}
