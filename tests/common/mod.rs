#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use mcpbridge::error::{BridgeError, Result};
use mcpbridge::mcp::auth::installation::{
    AuthType, InMemoryInstallationStore, Installation, InstallationStore, OAuthClientMetadata,
    SensitiveConfig,
};
use mcpbridge::mcp::auth::refresh::{TokenGrant, TokenRefresher};
use mcpbridge::mcp::client::{McpClientFactory, McpSession};
use mcpbridge::mcp::types::{InitializeResult, ToolDescriptor};
use mcpbridge::security::UrlAllowChecker;
use mcpbridge::session_cache::InMemorySessionCache;
use mcpbridge::tools::call_mcp_server::McpToolDependencies;

pub const SERVER_URL: &str = "https://mcp.example.com/mcp";

pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

// ---------------------------------------------------------------------------
// Installations
// ---------------------------------------------------------------------------

pub fn plain_installation(url: &str) -> Installation {
    Installation {
        id: "inst-plain".to_string(),
        display_name: "Plain".to_string(),
        url: url.to_string(),
        auth_type: AuthType::None,
        sensitive_config: SensitiveConfig::default(),
        oauth: None,
    }
}

/// OAuth installation whose token was issued `age_secs` ago with a one hour
/// lifetime.
pub fn oauth_installation(url: &str, age_secs: i64) -> Installation {
    Installation {
        id: "inst-oauth".to_string(),
        display_name: "Tracker".to_string(),
        url: url.to_string(),
        auth_type: AuthType::Oauth,
        sensitive_config: SensitiveConfig {
            access_token: Some("access-1".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            token_retrieved_at: Some(chrono::Utc::now().timestamp() - age_secs),
            expires_in: Some(3600),
            needs_reauth: false,
            api_key: None,
        },
        oauth: Some(OAuthClientMetadata {
            token_endpoint: "https://auth.example.com/token".to_string(),
            client_id: "client-1".to_string(),
            client_secret: None,
        }),
    }
}

// ---------------------------------------------------------------------------
// Fake MCP server (McpClientFactory + McpSession)
// ---------------------------------------------------------------------------

/// One `create` call seen by the fake factory.
#[derive(Debug, Clone)]
pub struct CreatedClient {
    pub server_url: String,
    pub headers: HashMap<String, String>,
    pub session_id: Option<String>,
}

#[derive(Default)]
struct FakeState {
    created: Vec<CreatedClient>,
    initialize_calls: usize,
    operation_calls: usize,
    close_calls: usize,
    issued_session: Option<String>,
    initialize_errors: VecDeque<BridgeError>,
    operation_errors: VecDeque<BridgeError>,
    tools: Vec<ToolDescriptor>,
    called: Vec<(String, Value)>,
}

/// In-memory stand-in for a remote MCP server.
///
/// Every client it creates shares the same counters and error queues.
/// Queued errors are returned by the next matching call, in order.
#[derive(Clone, Default)]
pub struct FakeMcpServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMcpServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id handed out by every successful `initialize`.
    pub fn issuing_session(self, id: &str) -> Self {
        self.state.lock().unwrap().issued_session = Some(id.to_string());
        self
    }

    pub fn with_tools(self, tools: Vec<ToolDescriptor>) -> Self {
        self.state.lock().unwrap().tools = tools;
        self
    }

    pub fn fail_next_initialize(&self, err: BridgeError) {
        self.state.lock().unwrap().initialize_errors.push_back(err);
    }

    pub fn fail_next_operation(&self, err: BridgeError) {
        self.state.lock().unwrap().operation_errors.push_back(err);
    }

    pub fn created(&self) -> Vec<CreatedClient> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn initialize_calls(&self) -> usize {
        self.state.lock().unwrap().initialize_calls
    }

    pub fn operation_calls(&self) -> usize {
        self.state.lock().unwrap().operation_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    pub fn called(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().called.clone()
    }
}

impl McpClientFactory for FakeMcpServer {
    fn create(
        &self,
        server_url: &str,
        headers: HashMap<String, String>,
        session_id: Option<String>,
    ) -> Result<Box<dyn McpSession>> {
        self.state.lock().unwrap().created.push(CreatedClient {
            server_url: server_url.to_string(),
            headers,
            session_id: session_id.clone(),
        });
        Ok(Box::new(FakeSession {
            server: self.clone(),
            session_id,
        }))
    }
}

struct FakeSession {
    server: FakeMcpServer,
    session_id: Option<String>,
}

#[async_trait]
impl McpSession for FakeSession {
    async fn initialize(&mut self) -> Result<InitializeResult> {
        let mut state = self.server.state.lock().unwrap();
        state.initialize_calls += 1;
        if let Some(err) = state.initialize_errors.pop_front() {
            return Err(err.into());
        }
        if let Some(id) = &state.issued_session {
            self.session_id = Some(id.clone());
        }
        Ok(InitializeResult {
            protocol_version: Some("2025-03-26".to_string()),
            ..Default::default()
        })
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let mut state = self.server.state.lock().unwrap();
        state.operation_calls += 1;
        if let Some(err) = state.operation_errors.pop_front() {
            return Err(err.into());
        }
        Ok(state.tools.clone())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String> {
        let mut state = self.server.state.lock().unwrap();
        state.operation_calls += 1;
        if let Some(err) = state.operation_errors.pop_front() {
            return Err(err.into());
        }
        state.called.push((name.to_string(), arguments.clone()));
        Ok(format!("{name} -> {arguments}"))
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    async fn close(&mut self) {
        self.server.state.lock().unwrap().close_calls += 1;
    }
}

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

/// Token refresher returning queued outcomes (success by default).
#[derive(Default)]
pub struct FakeRefresher {
    failures: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let refresher = Self::default();
        refresher
            .failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
        refresher
    }

    /// Refresh tokens presented so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh_token(
        &self,
        _token_url: &str,
        refresh_token: &str,
        _client_id: &str,
        _client_secret: Option<&str>,
    ) -> Result<TokenGrant> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(refresh_token.to_string());
            calls.len()
        };
        if let Some(message) = self.failures.lock().unwrap().pop_front() {
            return Err(BridgeError::TokenRefresh(message).into());
        }
        Ok(TokenGrant {
            access_token: format!("access-{}", attempt + 1),
            refresh_token: None,
            expires_in: Some(3600),
        })
    }
}

/// Installation store whose writes always fail.
pub struct ReadOnlyStore;

#[async_trait]
impl InstallationStore for ReadOnlyStore {
    async fn installations(&self, _owner: &str) -> Result<Vec<Installation>> {
        Ok(Vec::new())
    }

    async fn update_sensitive_config(&self, _id: &str, _config: SensitiveConfig) -> Result<()> {
        Err(BridgeError::Config("installation store is read-only".to_string()).into())
    }

    async fn mark_needs_reauth(&self, _id: &str) -> Result<()> {
        Err(BridgeError::Config("installation store is read-only".to_string()).into())
    }
}

/// URL checker with a fixed verdict.
pub struct StaticUrlChecker {
    pub allowed: bool,
}

#[async_trait]
impl UrlAllowChecker for StaticUrlChecker {
    async fn is_url_allowed(&self, _url: &str) -> (bool, String) {
        if self.allowed {
            (true, String::new())
        } else {
            (false, "destination is a private address".to_string())
        }
    }
}

/// Handles to everything a `CallMcpServerTool` test wants to inspect.
pub struct Harness {
    pub server: FakeMcpServer,
    pub store: Arc<InMemoryInstallationStore>,
    pub refresher: Arc<FakeRefresher>,
    pub cache: Arc<InMemorySessionCache>,
}

impl Harness {
    pub fn new(server: FakeMcpServer, installations: Vec<Installation>) -> Self {
        Self::with_refresher(server, installations, FakeRefresher::new())
    }

    pub fn with_refresher(
        server: FakeMcpServer,
        installations: Vec<Installation>,
        refresher: FakeRefresher,
    ) -> Self {
        Self {
            server,
            store: Arc::new(InMemoryInstallationStore::with_installations(
                "owner",
                installations,
            )),
            refresher: Arc::new(refresher),
            cache: Arc::new(InMemorySessionCache::new()),
        }
    }

    pub fn deps(&self) -> McpToolDependencies {
        self.deps_with_checker(StaticUrlChecker { allowed: true })
    }

    pub fn deps_with_checker(&self, checker: StaticUrlChecker) -> McpToolDependencies {
        McpToolDependencies::new(
            self.store.clone(),
            self.refresher.clone(),
            Arc::new(checker),
            self.cache.clone(),
            Arc::new(self.server.clone()),
        )
    }
}

// ---------------------------------------------------------------------------
// Legacy SSE test server (axum)
// ---------------------------------------------------------------------------

/// Behaviour switches for [`SseTestServer`].
#[derive(Clone, Copy, Debug)]
pub struct SseServerOptions {
    /// Status returned to Streamable HTTP POSTs on the stream path
    pub post_status: StatusCode,
    /// Whether the GET stream announces an endpoint before closing
    pub send_endpoint: bool,
    /// Whether JSON-RPC responses are pushed onto the stream
    pub respond: bool,
}

impl Default for SseServerOptions {
    fn default() -> Self {
        Self {
            post_status: StatusCode::NOT_FOUND,
            send_endpoint: true,
            respond: true,
        }
    }
}

#[derive(Clone)]
struct SseServerState {
    options: SseServerOptions,
    stream_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
    received: Arc<Mutex<Vec<Value>>>,
    stream_opens: Arc<Mutex<usize>>,
}

/// In-process MCP server that only speaks the legacy SSE transport.
pub struct SseTestServer {
    pub base_url: String,
    state: SseServerState,
}

impl SseTestServer {
    pub async fn start(options: SseServerOptions) -> Self {
        let state = SseServerState {
            options,
            stream_tx: Arc::new(Mutex::new(None)),
            received: Arc::new(Mutex::new(Vec::new())),
            stream_opens: Arc::new(Mutex::new(0)),
        };

        let app = Router::new()
            .route("/mcp", get(open_stream).post(reject_streamable))
            .route("/messages", post(receive_message))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url)
    }

    /// JSON-RPC messages POSTed to the message endpoint, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn received_methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn stream_opens(&self) -> usize {
        *self.state.stream_opens.lock().unwrap()
    }

    /// Push a raw JSON-RPC message onto the open stream.
    pub fn push(&self, message: Value) -> bool {
        match self.state.stream_tx.lock().unwrap().as_ref() {
            Some(tx) => tx
                .send(Event::default().event("message").data(message.to_string()))
                .is_ok(),
            None => false,
        }
    }

    /// Wait until the client has POSTed `count` messages.
    pub async fn wait_for_messages(&self, count: usize) {
        for _ in 0..200 {
            if self.received().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} messages");
    }
}

async fn reject_streamable(State(state): State<SseServerState>) -> StatusCode {
    state.options.post_status
}

async fn open_stream(
    State(state): State<SseServerState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    *state.stream_opens.lock().unwrap() += 1;

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    if state.options.send_endpoint {
        let _ = tx.send(
            Event::default()
                .event("endpoint")
                .data("/messages?session_id=test-session"),
        );
        *state.stream_tx.lock().unwrap() = Some(tx);
    } else {
        // A stray event, then the sender drops and the stream ends.
        let _ = tx.send(Event::default().event("ping").data("{}"));
        drop(tx);
    }

    Sse::new(UnboundedReceiverStream::new(rx).map(Ok))
}

async fn receive_message(
    State(state): State<SseServerState>,
    Json(message): Json<Value>,
) -> impl IntoResponse {
    state.received.lock().unwrap().push(message.clone());

    if state.options.respond {
        if let Some(reply) = reply_for(&message) {
            if let Some(tx) = state.stream_tx.lock().unwrap().as_ref() {
                let _ = tx.send(Event::default().event("message").data(reply.to_string()));
            }
        }
    }

    StatusCode::ACCEPTED
}

fn reply_for(message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let result = match message["method"].as_str()? {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "sse-test-server", "version": "0.1.0"}
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "echo",
                "description": "Echo the input",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string", "description": "Text to echo"}},
                    "required": ["text"]
                }
            }]
        }),
        "tools/call" => {
            let text = message["params"]["arguments"]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            json!({"content": [{"type": "text", "text": format!("echo: {text}")}]})
        }
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}
