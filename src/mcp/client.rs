//! Dual-transport MCP client
//!
//! [`McpClient`] speaks JSON-RPC 2.0 to one remote MCP server. The first
//! outbound message is POSTed using the Streamable HTTP transport. If the
//! server answers that POST with `404` or `405`, the client opens the legacy
//! SSE stream and resends the same message there. The choice is made once:
//! after the first exchange the transport never changes again.
//!
//! The client never retries on its own. Session recovery and credential
//! refresh are the caller's job (see
//! [`crate::tools::call_mcp_server::CallMcpServerTool`]).
//!
//! [`McpSession`] and [`McpClientFactory`] are the seams the orchestrator
//! depends on, so tests can substitute in-memory fakes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::{BridgeError, Result};
use crate::mcp::jsonrpc::{build_request, into_result, RequestIdCounter};
use crate::mcp::transport::http::StreamableHttpTransport;
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::TransportMode;
use crate::mcp::types::{
    extract_text_content, CallToolParams, Implementation, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ToolDescriptor, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// The transport bound to a client, once chosen.
#[derive(Debug)]
enum ActiveTransport {
    Unset,
    StreamableHttp(StreamableHttpTransport),
    Sse(SseTransport),
}

/// HTTP statuses on the first POST that mean "try legacy SSE instead".
fn is_fallback_status(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<BridgeError>()
            .and_then(BridgeError::http_status),
        Some(404) | Some(405)
    )
}

/// JSON-RPC client for a single remote MCP server.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcpbridge::config::ClientConfig;
/// use mcpbridge::mcp::client::McpClient;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let mut client = McpClient::new(
///     "https://mcp.example.com/mcp",
///     HashMap::new(),
///     None,
///     &ClientConfig::default(),
/// )?;
/// client.initialize().await?;
/// let tools = client.list_tools().await?;
/// println!("{} tools", tools.len());
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct McpClient {
    server_url: url::Url,
    http: Option<reqwest::Client>,
    headers: HashMap<String, String>,
    client_info: Implementation,
    request_timeout: Duration,
    sse_response_timeout: Duration,
    session_id: Option<String>,
    ids: RequestIdCounter,
    transport: ActiveTransport,
    closed: bool,
}

impl McpClient {
    /// Create a client for `server_url`.
    ///
    /// No network I/O happens here. `session_id` pre-seeds the
    /// `Mcp-Session-Id` header so a cached session can be resumed without a
    /// new `initialize`.
    ///
    /// # Arguments
    ///
    /// * `server_url` - MCP endpoint (Streamable HTTP POST target, or the SSE
    ///   stream URL for legacy servers)
    /// * `headers` - Extra headers sent on every request (authorization)
    /// * `session_id` - Previously issued session id, if any
    /// * `config` - Client identity and timeouts
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when `server_url` does not parse
    /// and [`BridgeError::McpTransport`] when the HTTP client cannot be built.
    pub fn new(
        server_url: &str,
        headers: HashMap<String, String>,
        session_id: Option<String>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let server_url = url::Url::parse(server_url).map_err(|e| {
            BridgeError::Validation(format!("invalid MCP server URL '{server_url}': {e}"))
        })?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| BridgeError::McpTransport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            server_url,
            http: Some(http),
            headers,
            client_info: Implementation {
                name: config.name.clone(),
                version: config.version.clone(),
            },
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            sse_response_timeout: Duration::from_secs(config.sse_response_timeout_seconds),
            session_id,
            ids: RequestIdCounter::new(),
            transport: ActiveTransport::Unset,
            closed: false,
        })
    }

    /// The server this client talks to.
    pub fn server_url(&self) -> &url::Url {
        &self.server_url
    }

    /// Where requests are POSTed: the server URL for Streamable HTTP, the
    /// discovered endpoint for SSE, `None` before the first exchange.
    pub fn message_url(&self) -> Option<&url::Url> {
        match &self.transport {
            ActiveTransport::Unset => None,
            ActiveTransport::StreamableHttp(t) => Some(t.endpoint()),
            ActiveTransport::Sse(t) => Some(t.message_url()),
        }
    }

    /// Current session id (pre-seeded or issued by the server).
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Which transport the client settled on.
    pub fn transport_mode(&self) -> TransportMode {
        match self.transport {
            ActiveTransport::Unset => TransportMode::Unset,
            ActiveTransport::StreamableHttp(_) => TransportMode::StreamableHttp,
            ActiveTransport::Sse(_) => TransportMode::Sse,
        }
    }

    /// Returns `true` once [`McpClient::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Perform the MCP handshake.
    ///
    /// Sends `initialize` and, once the result is in hand, the
    /// `notifications/initialized` notification. Failure of the notification
    /// is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpProtocol`] when the server answers with an
    /// empty result, plus any transport or JSON-RPC error.
    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::new(self.client_info.clone()))?;
        let result = self.request(METHOD_INITIALIZE, Some(params)).await?;

        let is_empty = match &result {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Err(BridgeError::McpProtocol(format!(
                "empty initialize result from {}",
                self.server_url
            ))
            .into());
        }

        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            BridgeError::McpProtocol(format!("invalid initialize result: {e}"))
        })?;

        if let Err(e) = self.notify(METHOD_INITIALIZED).await {
            tracing::debug!(server = %self.server_url, "initialized notification failed: {e:#}");
        }

        tracing::debug!(
            server = %self.server_url,
            protocol = ?init.protocol_version,
            mode = ?self.transport_mode(),
            "MCP session initialized"
        );
        Ok(init)
    }

    /// List the server's tools.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpProtocol`] when the result has no `tools`
    /// member. An empty list is not an error.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let result = self
            .request(METHOD_TOOLS_LIST, Some(serde_json::json!({})))
            .await?;

        let tools = result.get("tools").cloned().ok_or_else(|| {
            BridgeError::McpProtocol("tools/list result is missing 'tools'".to_string())
        })?;

        serde_json::from_value(tools).map_err(|e| {
            BridgeError::McpProtocol(format!("invalid tools/list result: {e}")).into()
        })
    }

    /// Invoke tool `name` and return its text output.
    ///
    /// Text content parts are joined with newlines; a result without text
    /// parts is returned as raw JSON.
    pub async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<String> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request(METHOD_TOOLS_CALL, Some(params)).await?;
        Ok(extract_text_content(&result))
    }

    /// Release the transport. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let ActiveTransport::Sse(sse) = &mut self.transport {
            sse.close().await;
        }
        self.transport = ActiveTransport::Unset;
        self.http = None;
        tracing::debug!(server = %self.server_url, "MCP client closed");
    }

    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let request = build_request(&self.ids, method, params);
        let response = self.dispatch(&request).await?.ok_or_else(|| {
            BridgeError::McpProtocol(format!("no response to '{method}'"))
        })?;
        into_result(response)
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        let request = build_request(&self.ids, method, None);
        self.dispatch(&request).await.map(|_| ())
    }

    /// Route one message, choosing the transport on the first call.
    async fn dispatch(&mut self, request: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>> {
        let http = match (&self.http, self.closed) {
            (Some(http), false) => http.clone(),
            _ => {
                return Err(BridgeError::McpTransport(format!(
                    "client for {} is closed",
                    self.server_url
                ))
                .into())
            }
        };

        if matches!(self.transport, ActiveTransport::Unset) {
            let streamable = StreamableHttpTransport::new(
                http.clone(),
                self.server_url.clone(),
                self.headers.clone(),
                self.request_timeout,
            );

            match streamable.send(request, &mut self.session_id).await {
                Err(e) if is_fallback_status(&e) => {
                    tracing::debug!(
                        server = %self.server_url,
                        "Streamable HTTP rejected ({e}); falling back to SSE"
                    );
                    let sse = SseTransport::connect(
                        http,
                        self.server_url.clone(),
                        self.headers.clone(),
                        self.request_timeout,
                        self.sse_response_timeout,
                    )
                    .await?;
                    self.transport = ActiveTransport::Sse(sse);
                }
                outcome => {
                    self.transport = ActiveTransport::StreamableHttp(streamable);
                    return outcome;
                }
            }
        }

        match &self.transport {
            ActiveTransport::StreamableHttp(t) => t.send(request, &mut self.session_id).await,
            ActiveTransport::Sse(t) => t.send(request, &mut self.session_id).await,
            ActiveTransport::Unset => Err(BridgeError::McpTransport(
                "no transport selected".to_string(),
            )
            .into()),
        }
    }
}

/// One MCP conversation as seen by the tool orchestrator.
#[async_trait]
pub trait McpSession: Send {
    /// Run the `initialize` handshake.
    async fn initialize(&mut self) -> Result<InitializeResult>;

    /// List the server's tools.
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>>;

    /// Call a tool and return its text output.
    async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<String>;

    /// Session id to cache for later calls.
    fn session_id(&self) -> Option<String>;

    /// Release all resources; idempotent.
    async fn close(&mut self);
}

#[async_trait]
impl McpSession for McpClient {
    async fn initialize(&mut self) -> Result<InitializeResult> {
        McpClient::initialize(self).await
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        McpClient::list_tools(self).await
    }

    async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<String> {
        McpClient::call_tool(self, name, arguments).await
    }

    fn session_id(&self) -> Option<String> {
        McpClient::session_id(self).map(str::to_string)
    }

    async fn close(&mut self) {
        McpClient::close(self).await
    }
}

/// Builds [`McpSession`]s for the orchestrator.
pub trait McpClientFactory: Send + Sync {
    /// Create a session for `server_url` with the given auth headers and an
    /// optional session id to resume.
    fn create(
        &self,
        server_url: &str,
        headers: HashMap<String, String>,
        session_id: Option<String>,
    ) -> Result<Box<dyn McpSession>>;
}

/// Factory producing real [`McpClient`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpMcpClientFactory {
    config: ClientConfig,
}

impl HttpMcpClientFactory {
    /// Create a factory using `config` for every client.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl McpClientFactory for HttpMcpClientFactory {
    fn create(
        &self,
        server_url: &str,
        headers: HashMap<String, String>,
        session_id: Option<String>,
    ) -> Result<Box<dyn McpSession>> {
        let client = McpClient::new(server_url, headers, session_id, &self.config)?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> McpClient {
        McpClient::new(url, HashMap::new(), None, &ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_new_starts_unset_and_open() {
        let c = client("http://localhost:3000/mcp");
        assert_eq!(c.transport_mode(), TransportMode::Unset);
        assert!(c.message_url().is_none());
        assert!(!c.is_closed());
        assert!(c.session_id().is_none());
    }

    #[test]
    fn test_new_keeps_seeded_session() {
        let c = McpClient::new(
            "http://localhost:3000/mcp",
            HashMap::new(),
            Some("sess-1".to_string()),
            &ClientConfig::default(),
        )
        .unwrap();
        assert_eq!(c.session_id(), Some("sess-1"));
    }

    #[test]
    fn test_invalid_url_is_validation_error() {
        let err = McpClient::new("not a url", HashMap::new(), None, &ClientConfig::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_requests() {
        let mut c = client("http://localhost:3000/mcp");
        c.close().await;
        c.close().await;
        assert!(c.is_closed());

        let err = c.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_fallback_status_detection() {
        let not_found: anyhow::Error = BridgeError::McpHttpStatus {
            status: 404,
            body: String::new(),
        }
        .into();
        let method_not_allowed: anyhow::Error = BridgeError::McpHttpStatus {
            status: 405,
            body: String::new(),
        }
        .into();
        let server_error: anyhow::Error = BridgeError::McpHttpStatus {
            status: 500,
            body: String::new(),
        }
        .into();
        let unauthorized: anyhow::Error = BridgeError::McpUnauthorized(String::new()).into();

        assert!(is_fallback_status(&not_found));
        assert!(is_fallback_status(&method_not_allowed));
        assert!(!is_fallback_status(&server_error));
        assert!(!is_fallback_status(&unauthorized));
    }

    #[test]
    fn test_factory_builds_sessions() {
        let factory = HttpMcpClientFactory::new(ClientConfig::default());
        let session = factory
            .create("http://localhost:3000/mcp", HashMap::new(), Some("s".into()))
            .unwrap();
        assert_eq!(session.session_id().as_deref(), Some("s"));
    }
}
