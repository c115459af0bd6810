//! The `call_mcp_server` tool
//!
//! [`CallMcpServerTool`] lets an agent call a tool on one of the user's
//! installed MCP servers, or list that server's tools by passing the
//! [`LIST_TOOLS_SENTINEL`] tool name. A call goes through these steps:
//!
//! 1. The URL must belong to an installed server (allow-list) and pass the
//!    [`UrlAllowChecker`].
//! 2. An OAuth token past half its lifetime is refreshed first. If that
//!    refresh fails, the call goes ahead with the old token.
//! 3. A cached session id is looked up, first in this instance's local map
//!    and then in the shared [`SessionCache`]. With a cached session the
//!    `initialize` handshake is skipped.
//! 4. The operation runs, and the client is always closed afterwards.
//! 5. An HTTP 401 triggers a token refresh and one retry. Any other
//!    protocol or HTTP error on a cached session clears the cache and also
//!    retries once.
//! 6. The session id the server issued is cached for the next call.
//!
//! Failures come back as [`ToolCallError`], marked retryable or fatal.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{bridge_error, is_unauthorized, BridgeError, Result, Severity, ToolCallError};
use crate::mcp::auth::installation::{Installation, InstallationStore, SensitiveConfig};
use crate::mcp::auth::refresh::{InstallationTokenManager, TokenRefresher};
use crate::mcp::client::{McpClientFactory, McpSession};
use crate::mcp::types::ToolDescriptor;
use crate::security::UrlAllowChecker;
use crate::session_cache::{session_cache_key, SessionCache, SESSION_CACHE_TTL};
use crate::tools::{Tool, ToolExecutor, ToolOutput};

/// Tool name that lists the server's tools instead of calling one.
pub const LIST_TOOLS_SENTINEL: &str = "__list_tools__";

/// Listing returned when a server advertises no tools.
pub const NO_TOOLS_MESSAGE: &str = "No tools available on this MCP server.";

/// Name under which this tool is exposed to agents.
pub const TOOL_NAME: &str = "call_mcp_server";

/// Collaborators injected into [`CallMcpServerTool`].
#[derive(Clone)]
pub struct McpToolDependencies {
    /// Installation persistence
    pub store: Arc<dyn InstallationStore>,
    /// OAuth refresh grant
    pub refresher: Arc<dyn TokenRefresher>,
    /// Outbound URL policy
    pub url_checker: Arc<dyn UrlAllowChecker>,
    /// Shared session-id cache
    pub session_cache: Arc<dyn SessionCache>,
    /// Builds MCP clients
    pub client_factory: Arc<dyn McpClientFactory>,
    /// Lifetime of shared cache entries
    pub session_ttl: Duration,
}

impl McpToolDependencies {
    /// Bundle collaborators with the default session TTL.
    pub fn new(
        store: Arc<dyn InstallationStore>,
        refresher: Arc<dyn TokenRefresher>,
        url_checker: Arc<dyn UrlAllowChecker>,
        session_cache: Arc<dyn SessionCache>,
        client_factory: Arc<dyn McpClientFactory>,
    ) -> Self {
        Self {
            store,
            refresher,
            url_checker,
            session_cache,
            client_factory,
            session_ttl: SESSION_CACHE_TTL,
        }
    }

    /// Override the shared cache TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

/// What to do once connected.
#[derive(Debug, Clone)]
enum Operation {
    ListTools,
    CallTool {
        name: String,
        arguments: serde_json::Value,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Calls tools on a user's installed MCP servers within one conversation.
pub struct CallMcpServerTool {
    conversation_id: String,
    installations: Mutex<BTreeMap<String, Installation>>,
    local_sessions: Mutex<HashMap<String, String>>,
    token_manager: InstallationTokenManager,
    deps: McpToolDependencies,
}

impl CallMcpServerTool {
    /// Create the tool for `conversation_id` over the given installations.
    ///
    /// Only the URLs of `installations` can be called.
    pub fn new(
        deps: McpToolDependencies,
        conversation_id: impl Into<String>,
        installations: Vec<Installation>,
    ) -> Self {
        let installations = installations
            .into_iter()
            .map(|i| (i.url.clone(), i))
            .collect();

        Self {
            conversation_id: conversation_id.into(),
            installations: Mutex::new(installations),
            local_sessions: Mutex::new(HashMap::new()),
            token_manager: InstallationTokenManager::new(
                Arc::clone(&deps.store),
                Arc::clone(&deps.refresher),
            ),
            deps,
        }
    }

    /// Create the tool over every installation `owner` has in the store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn for_owner(
        deps: McpToolDependencies,
        conversation_id: impl Into<String>,
        owner: &str,
    ) -> Result<Self> {
        let installations = deps.store.installations(owner).await?;
        Ok(Self::new(deps, conversation_id, installations))
    }

    /// Conversation this instance caches sessions for.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Installed server URLs, sorted.
    pub fn allowed_urls(&self) -> Vec<String> {
        lock(&self.installations).keys().cloned().collect()
    }

    /// Current copy of the installation for `server_url`.
    pub fn installation(&self, server_url: &str) -> Option<Installation> {
        lock(&self.installations).get(server_url).cloned()
    }

    /// Call `tool_name` on `server_url`, or list its tools when `tool_name`
    /// is [`LIST_TOOLS_SENTINEL`].
    ///
    /// # Returns
    ///
    /// The text result and an artifact, which is always `None`.
    ///
    /// # Errors
    ///
    /// A retryable [`ToolCallError`] when the server is not installed or the
    /// call failed transiently. A fatal one when the URL is blocked or the
    /// user must re-authenticate.
    pub async fn execute(
        &self,
        server_url: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<(String, Option<serde_json::Value>), ToolCallError> {
        let installation = self.installation(server_url).ok_or_else(|| {
            let allowed = self.allowed_urls();
            let listing = if allowed.is_empty() {
                "(none)".to_string()
            } else {
                allowed.join(", ")
            };
            ToolCallError::retryable(format!(
                "MCP server '{server_url}' is not installed. Installed servers: {listing}"
            ))
        })?;

        let (allowed, reason) = self.deps.url_checker.is_url_allowed(server_url).await;
        if !allowed {
            tracing::warn!(server = %server_url, "MCP server URL rejected: {reason}");
            return Err(ToolCallError::fatal(format!(
                "MCP server '{server_url}' is blocked by security policy: {reason}"
            )));
        }

        if installation.sensitive_config.needs_reauth {
            return Err(reauth_error(&installation));
        }

        let installation = self.refresh_if_half_expired(installation).await;

        let operation = if tool_name == LIST_TOOLS_SENTINEL {
            Operation::ListTools
        } else {
            Operation::CallTool {
                name: tool_name.to_string(),
                arguments,
            }
        };

        let content = self
            .run_with_recovery(installation, server_url, &operation)
            .await?;
        Ok((content, None))
    }

    async fn run_with_recovery(
        &self,
        installation: Installation,
        server_url: &str,
        operation: &Operation,
    ) -> std::result::Result<String, ToolCallError> {
        let cached = self.cached_session(server_url).await;
        let had_session = cached.is_some();

        let err = match self
            .run_operation(&installation, server_url, cached, operation)
            .await
        {
            Ok(content) => return Ok(content),
            Err(e) => e,
        };

        let retry_with = if is_unauthorized(&err) {
            tracing::info!(server = %server_url, "MCP server returned 401; refreshing credentials");
            let refreshed = self.recover_from_unauthorized(&installation).await?;
            self.clear_session(server_url).await;
            refreshed
        } else if had_session && is_session_error(&err) {
            tracing::info!(
                server = %server_url,
                "cached MCP session failed ({err}); retrying with a new session"
            );
            self.clear_session(server_url).await;
            installation
        } else {
            return Err(classify(&err, server_url, &installation, false));
        };

        self.run_operation(&retry_with, server_url, None, operation)
            .await
            .map_err(|e| classify(&e, server_url, &retry_with, true))
    }

    /// Connect, run `operation`, always close, and cache the session id.
    async fn run_operation(
        &self,
        installation: &Installation,
        server_url: &str,
        session_id: Option<String>,
        operation: &Operation,
    ) -> Result<String> {
        let resume = session_id.is_some();
        let mut client =
            self.deps
                .client_factory
                .create(server_url, installation.auth_headers(), session_id)?;

        let outcome = drive(client.as_mut(), resume, operation).await;
        let issued_session = client.session_id();
        client.close().await;

        let content = outcome?;
        if let Some(id) = issued_session {
            self.store_session(server_url, &id).await;
        }
        Ok(content)
    }

    async fn refresh_if_half_expired(&self, installation: Installation) -> Installation {
        let now = chrono::Utc::now().timestamp();
        if !installation.can_refresh() || !installation.sensitive_config.is_half_expired(now) {
            return installation;
        }

        match self.token_manager.refresh(&installation).await {
            Ok(config) => self.remember_credentials(&installation, config),
            Err(e) => {
                tracing::warn!(
                    installation = %installation.id,
                    "proactive token refresh failed, continuing with current token: {e:#}"
                );
                installation
            }
        }
    }

    async fn recover_from_unauthorized(
        &self,
        installation: &Installation,
    ) -> std::result::Result<Installation, ToolCallError> {
        if !installation.can_refresh() {
            return Err(reauth_error(installation));
        }

        match self.token_manager.refresh(installation).await {
            Ok(config) => Ok(self.remember_credentials(installation, config)),
            Err(e) => {
                tracing::warn!(installation = %installation.id, "token refresh after 401 failed: {e:#}");
                if let Err(mark_err) = self.token_manager.mark_needs_reauth(installation).await {
                    tracing::warn!(
                        installation = %installation.id,
                        "failed to flag installation for re-authentication: {mark_err:#}"
                    );
                }
                let mut flagged = installation.sensitive_config.clone();
                flagged.needs_reauth = true;
                self.remember_credentials(installation, flagged);
                Err(reauth_error(installation))
            }
        }
    }

    /// Update the in-memory installation copy and return it.
    fn remember_credentials(
        &self,
        installation: &Installation,
        config: SensitiveConfig,
    ) -> Installation {
        let mut updated = installation.clone();
        updated.sensitive_config = config;
        lock(&self.installations).insert(updated.url.clone(), updated.clone());
        updated
    }

    async fn cached_session(&self, server_url: &str) -> Option<String> {
        if let Some(id) = lock(&self.local_sessions).get(server_url).cloned() {
            return Some(id);
        }

        let key = session_cache_key(&self.conversation_id, server_url);
        match self.deps.session_cache.get(&key).await {
            Ok(Some(id)) => {
                lock(&self.local_sessions).insert(server_url.to_string(), id.clone());
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("session cache read failed: {e:#}");
                None
            }
        }
    }

    async fn store_session(&self, server_url: &str, session_id: &str) {
        lock(&self.local_sessions).insert(server_url.to_string(), session_id.to_string());

        let key = session_cache_key(&self.conversation_id, server_url);
        if let Err(e) = self
            .deps
            .session_cache
            .set(&key, session_id, self.deps.session_ttl)
            .await
        {
            tracing::warn!("session cache write failed: {e:#}");
        }
    }

    async fn clear_session(&self, server_url: &str) {
        lock(&self.local_sessions).remove(server_url);

        let key = session_cache_key(&self.conversation_id, server_url);
        if let Err(e) = self.deps.session_cache.delete(&key).await {
            tracing::warn!("session cache delete failed: {e:#}");
        }
    }
}

async fn drive(
    client: &mut dyn McpSession,
    resume: bool,
    operation: &Operation,
) -> Result<String> {
    if !resume {
        client.initialize().await?;
    }

    match operation {
        Operation::ListTools => Ok(format_tool_list(&client.list_tools().await?)),
        Operation::CallTool { name, arguments } => client.call_tool(name, arguments.clone()).await,
    }
}

/// Errors that suggest the cached session is no longer valid.
fn is_session_error(err: &anyhow::Error) -> bool {
    matches!(
        bridge_error(err),
        Some(BridgeError::McpProtocol(_))
            | Some(BridgeError::McpRpc { .. })
            | Some(BridgeError::McpHttpStatus { .. })
            | Some(BridgeError::McpTransport(_))
            | Some(BridgeError::McpTimeout { .. })
    )
}

fn reauth_error(installation: &Installation) -> ToolCallError {
    let name = if installation.display_name.is_empty() {
        installation.url.as_str()
    } else {
        installation.display_name.as_str()
    };
    ToolCallError::fatal(format!(
        "Authorization for MCP server '{name}' is no longer valid. \
         Please re-authenticate with this MCP server."
    ))
}

/// Map an internal failure onto the error surfaced to the agent.
///
/// Protocol and RPC errors are fatal once the recovery retry is spent.
fn classify(
    err: &anyhow::Error,
    server_url: &str,
    installation: &Installation,
    retry_exhausted: bool,
) -> ToolCallError {
    let protocol_severity = if retry_exhausted {
        Severity::Fatal
    } else {
        Severity::Retryable
    };

    match bridge_error(err) {
        Some(BridgeError::Validation(msg)) => ToolCallError::retryable(msg.clone()),
        Some(BridgeError::Security(msg)) => ToolCallError::fatal(format!(
            "MCP server '{server_url}' is blocked by security policy: {msg}"
        )),
        Some(BridgeError::McpUnauthorized(_)) | Some(BridgeError::TokenRefresh(_)) => {
            reauth_error(installation)
        }
        Some(BridgeError::McpTimeout { method, .. }) => ToolCallError::retryable(format!(
            "MCP server '{server_url}' did not respond to '{method}' in time. Try again."
        )),
        Some(BridgeError::McpTransport(msg)) => ToolCallError::retryable(format!(
            "Could not reach MCP server '{server_url}': {msg}"
        )),
        Some(BridgeError::McpHttpStatus { status, body }) => ToolCallError::retryable(format!(
            "MCP server '{server_url}' returned HTTP {status}: {body}"
        )),
        Some(BridgeError::McpRpc { code, message }) => ToolCallError::new(
            protocol_severity,
            format!("MCP server '{server_url}' returned error {code}: {message}"),
        ),
        Some(BridgeError::McpProtocol(msg)) => ToolCallError::new(
            protocol_severity,
            format!("Unexpected response from MCP server '{server_url}': {msg}"),
        ),
        _ => ToolCallError::retryable(format!("Call to MCP server '{server_url}' failed: {err:#}")),
    }
}

/// Render a `tools/list` result as a markdown bullet list.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::types::ToolDescriptor;
/// use mcpbridge::tools::call_mcp_server::format_tool_list;
///
/// let tool: ToolDescriptor = serde_json::from_value(serde_json::json!({
///     "name": "search",
///     "description": "Search issues",
///     "inputSchema": {
///         "type": "object",
///         "properties": {"query": {"type": "string", "description": "Search text"}},
///         "required": ["query"]
///     }
/// })).unwrap();
///
/// assert_eq!(
///     format_tool_list(&[tool]),
///     "- **search**: Search issues\n  - query: string (required) - Search text"
/// );
/// ```
pub fn format_tool_list(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return NO_TOOLS_MESSAGE.to_string();
    }

    let mut lines = Vec::new();
    for tool in tools {
        lines.push(format!("- **{}**: {}", tool.name, tool.description));

        let schema = &tool.input_schema;
        if schema.properties.is_empty() {
            lines.push("  (no parameters)".to_string());
            continue;
        }

        for (name, param) in &schema.properties {
            let mut line = format!("  - {name}: {}", param.type_name());
            if schema.required.iter().any(|r| r == name) {
                line.push_str(" (required)");
            }
            if let Some(description) = param.description.as_deref().filter(|d| !d.is_empty()) {
                line.push_str(" - ");
                line.push_str(description);
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn required_str<'a>(
    args: &'a serde_json::Value,
    name: &str,
) -> std::result::Result<&'a str, ToolCallError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolCallError::retryable(format!("Missing required argument '{name}'")))
}

#[async_trait]
impl ToolExecutor for CallMcpServerTool {
    fn tool_definition(&self) -> serde_json::Value {
        Tool::new(
            TOOL_NAME.to_string(),
            format!(
                "Call a tool on one of the user's installed MCP servers. \
                 Use tool_name \"{LIST_TOOLS_SENTINEL}\" to list the server's tools. \
                 Installed servers: {}",
                self.allowed_urls().join(", ")
            ),
            serde_json::json!({
                "type": "object",
                "properties": {
                    "server_url": {
                        "type": "string",
                        "description": "URL of an installed MCP server"
                    },
                    "tool_name": {
                        "type": "string",
                        "description": "Tool to call, or __list_tools__"
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Arguments passed to the tool"
                    }
                },
                "required": ["server_url", "tool_name"]
            }),
        )
        .to_value()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolCallError> {
        let server_url = required_str(&args, "server_url")?;
        let tool_name = required_str(&args, "tool_name")?;
        let arguments = args
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let (content, artifact) =
            CallMcpServerTool::execute(self, server_url, tool_name, arguments).await?;
        Ok(ToolOutput { content, artifact })
    }
}
