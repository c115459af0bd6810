//! Legacy SSE transport for MCP
//!
//! The legacy transport splits a session across two HTTP exchanges:
//!
//! 1. `GET <server_url>` with `Accept: text/event-stream` opens a long-lived
//!    stream. The first `endpoint` event names the URL that requests must be
//!    POSTed to (relative paths are resolved against the server origin).
//! 2. A background reader keeps consuming the same stream. Every `message`
//!    event carries a JSON-RPC response, which is matched to its waiting
//!    caller by request id.
//! 3. Requests are POSTed to the discovered endpoint; the POST body is
//!    ignored and the caller waits (bounded by a timeout) for the matching
//!    response to arrive on the stream.
//!
//! Responses may arrive in any order. Correlation uses only the id, through
//! [`PendingRequests`], a map of single-shot senders. Entries are removed on
//! completion or timeout so the map never grows across a long session.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{apply_post_headers, capture_session_id, map_send_error, status_error};
use crate::mcp::types::{parse_numeric_id, JsonRpcRequest, JsonRpcResponse};

/// Boxed byte stream of an HTTP response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

// ---------------------------------------------------------------------------
// SSE framing
// ---------------------------------------------------------------------------

/// A single decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the `id:` field.
    pub id: Option<String>,
}

impl SseEvent {
    /// Returns `true` for events of (implicit or explicit) type `message`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Parse one SSE event block (the text between two blank lines).
///
/// Comment lines (starting with `:`) and unknown fields are ignored.
/// Returns `None` for blocks that carry neither an event type nor data.
///
/// # Examples
///
/// ```
/// use mcpbridge::mcp::transport::sse::parse_event_block;
///
/// let event = parse_event_block("event: endpoint\ndata: /messages?session=1").unwrap();
/// assert_eq!(event.event.as_deref(), Some("endpoint"));
/// assert_eq!(event.data, "/messages?session=1");
/// ```
pub fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = SseEvent::default();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event.event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            event.id = Some(value.trim().to_string());
        }
    }

    if data_lines.is_empty() && event.event.is_none() {
        return None;
    }

    event.data = data_lines.join("\n");
    Some(event)
}

/// Locate the first blank-line event terminator; returns `(start, len)`.
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Incremental SSE decoder over an HTTP byte stream.
///
/// Bytes are buffered until a complete event block is available, so events
/// split across chunks (including inside a UTF-8 sequence) decode correctly.
/// A read error ends the stream silently.
pub struct SseEventReader<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S> SseEventReader<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    /// Wrap a byte stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Return the next complete event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(event) = self.take_buffered_event() {
                return Some(event);
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.buffer);
                return parse_event_block(&String::from_utf8_lossy(&rest));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    tracing::debug!("SSE stream read error: {e}");
                    self.buffer.clear();
                    self.finished = true;
                }
                None => self.finished = true,
            }
        }
    }

    fn take_buffered_event(&mut self) -> Option<SseEvent> {
        while let Some((start, len)) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..start + len).collect();
            if let Some(event) = parse_event_block(&String::from_utf8_lossy(&block[..start])) {
                return Some(event);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Pending-response map
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PendingState {
    waiters: HashMap<u64, oneshot::Sender<serde_json::Value>>,
    closed: bool,
}

/// Concurrent map from request id to a single-shot response handle.
///
/// Once closed (the stream ended or the transport was shut down) every
/// waiter is released and new registrations fail immediately instead of
/// waiting for a response that cannot arrive.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<PendingState>>,
}

impl PendingRequests {
    /// Register interest in the response to request `id`.
    pub async fn register(&self, id: u64) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.lock().await;
        if !state.closed {
            state.waiters.insert(id, tx);
        }
        rx
    }

    /// Deliver `value` to the waiter for `id`. Returns `false` when nobody
    /// is waiting for that id.
    pub async fn resolve(&self, id: u64, value: serde_json::Value) -> bool {
        let waiter = self.inner.lock().await.waiters.remove(&id);
        match waiter {
            // The caller may have timed out in the meantime.
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Forget the waiter for `id` (used after a timeout or failed POST).
    pub async fn remove(&self, id: u64) {
        self.inner.lock().await.waiters.remove(&id);
    }

    /// Release every waiter and refuse future registrations.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        state.closed = true;
        state.waiters.clear();
    }

    /// Number of requests still waiting for a response.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.waiters.len()
    }

    /// Returns `true` when no request is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Route one SSE event to its waiting caller.
///
/// Non-message events, undecodable payloads, payloads without an id, and
/// ids nobody is waiting for are all skipped.
pub async fn dispatch_event(event: SseEvent, pending: &PendingRequests) {
    if !event.is_message() {
        tracing::debug!(event = ?event.event, "ignoring non-message SSE event");
        return;
    }

    let value: serde_json::Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("skipping undecodable SSE message: {e}");
            return;
        }
    };

    let Some(id) = value.get("id").and_then(parse_numeric_id) else {
        tracing::debug!("skipping SSE message without a numeric id");
        return;
    };

    if !pending.resolve(id, value).await {
        tracing::debug!("no pending request for SSE response id {id}; dropping");
    }
}

/// Background loop: consume `events` until the stream ends, a read fails,
/// or `cancel` fires, then close `pending`.
pub async fn run_reader<S>(
    mut events: SseEventReader<S>,
    pending: PendingRequests,
    cancel: CancellationToken,
) where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            next = events.next_event() => match next {
                Some(event) => dispatch_event(event, &pending).await,
                None => break,
            },
        }
    }

    pending.close().await;
}

/// Resolve the `endpoint` event payload against the server origin.
///
/// Absolute URLs are used as-is; paths are resolved against the scheme,
/// host, and port of `server_url`.
pub fn resolve_endpoint(server_url: &url::Url, endpoint: &str) -> Result<url::Url> {
    let mut origin = server_url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);

    origin.join(endpoint.trim()).map_err(|e| {
        BridgeError::McpProtocol(format!("invalid SSE endpoint '{endpoint}': {e}")).into()
    })
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Legacy SSE transport bound to one open GET stream.
///
/// Create with [`SseTransport::connect`]; always finish with
/// [`SseTransport::close`]. Dropping without closing still cancels the
/// background reader.
#[derive(Debug)]
pub struct SseTransport {
    http: reqwest::Client,
    server_url: url::Url,
    message_url: url::Url,
    headers: HashMap<String, String>,
    pending: PendingRequests,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    post_timeout: Duration,
    response_timeout: Duration,
}

impl SseTransport {
    /// Open the GET stream, wait for the `endpoint` event, and start the
    /// background reader.
    ///
    /// Waiting for the endpoint is unbounded: it ends when the server sends
    /// the event or closes the stream.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpProtocol`] with "SSE stream closed without
    /// providing endpoint" when the stream ends first, and the usual
    /// transport/status errors when the GET itself fails.
    pub async fn connect(
        http: reqwest::Client,
        server_url: url::Url,
        headers: HashMap<String, String>,
        post_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self> {
        let mut req = http
            .get(server_url.as_str())
            .header("Accept", "text/event-stream");
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| map_send_error(e, server_url.as_str(), "GET"))?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let stream: ByteStream = Box::pin(response.bytes_stream());
        let mut events = SseEventReader::new(stream);

        let message_url = loop {
            match events.next_event().await {
                Some(event) if event.event.as_deref() == Some("endpoint") => {
                    break resolve_endpoint(&server_url, &event.data)?;
                }
                Some(_) => {
                    tracing::debug!("skipping SSE event received before endpoint");
                }
                None => {
                    return Err(BridgeError::McpProtocol(
                        "SSE stream closed without providing endpoint".to_string(),
                    )
                    .into());
                }
            }
        };

        tracing::debug!(server = %server_url, endpoint = %message_url, "discovered SSE message endpoint");

        let pending = PendingRequests::default();
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(run_reader(events, pending.clone(), cancel.clone()));

        Ok(Self {
            http,
            server_url,
            message_url,
            headers,
            pending,
            reader: Some(reader),
            cancel,
            post_timeout,
            response_timeout,
        })
    }

    /// The endpoint requests are POSTed to.
    pub fn message_url(&self) -> &url::Url {
        &self.message_url
    }

    /// The URL the GET stream was opened against.
    pub fn server_url(&self) -> &url::Url {
        &self.server_url
    }

    /// POST `request` to the message endpoint and wait for its response on
    /// the stream.
    ///
    /// Notifications return `Ok(None)` right after the POST.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpTimeout`] when no response arrives within
    /// the response timeout and [`BridgeError::McpTransport`] when the stream
    /// closed before the response arrived.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
        session_id: &mut Option<String>,
    ) -> Result<Option<JsonRpcResponse>> {
        let waiter = match request.id {
            Some(id) => Some((id, self.pending.register(id).await)),
            None => None,
        };

        if let Err(e) = self.post(request, session_id).await {
            if let Some((id, _)) = &waiter {
                self.pending.remove(*id).await;
            }
            return Err(e);
        }

        let Some((id, rx)) = waiter else {
            return Ok(None);
        };

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(value)) => {
                let response: JsonRpcResponse = serde_json::from_value(value).map_err(|e| {
                    BridgeError::McpProtocol(format!("invalid JSON-RPC response: {e}"))
                })?;
                Ok(Some(response))
            }
            Ok(Err(_)) => Err(BridgeError::McpTransport(format!(
                "SSE stream from {} closed before response to request {id} arrived",
                self.server_url
            ))
            .into()),
            Err(_) => {
                self.pending.remove(id).await;
                Err(BridgeError::McpTimeout {
                    server: self.server_url.to_string(),
                    method: request.method.clone(),
                }
                .into())
            }
        }
    }

    async fn post(&self, request: &JsonRpcRequest, session_id: &mut Option<String>) -> Result<()> {
        let body = serde_json::to_string(request)?;
        let req = self
            .http
            .post(self.message_url.as_str())
            .timeout(self.post_timeout)
            .body(body);
        let req = apply_post_headers(req, &self.headers, session_id.as_deref());

        let response = req
            .send()
            .await
            .map_err(|e| map_send_error(e, self.message_url.as_str(), &request.method))?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        capture_session_id(&response, session_id);
        Ok(())
    }

    /// Stop the background reader, wait for it, and release all waiters.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.reader.take() {
            if let Err(e) = handle.await {
                tracing::debug!("SSE reader task ended abnormally: {e}");
            }
        }
        self.pending.close().await;
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::oneshot::error::TryRecvError;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn chunks(parts: &[&str]) -> impl Stream<Item = reqwest::Result<Bytes>> + Unpin {
        let items: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.as_bytes().to_vec())))
            .collect();
        futures::stream::iter(items)
    }

    /// Spawn a reader fed by a channel; returns the feeding sender.
    fn spawn_reader(
        pending: PendingRequests,
        cancel: CancellationToken,
    ) -> (
        mpsc::UnboundedSender<reqwest::Result<Bytes>>,
        JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel::<reqwest::Result<Bytes>>();
        let reader = SseEventReader::new(UnboundedReceiverStream::new(rx));
        let handle = tokio::spawn(run_reader(reader, pending, cancel));
        (tx, handle)
    }

    fn message(id: u64) -> reqwest::Result<Bytes> {
        let body = format!(
            "event: message\ndata: {{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"n\":{id}}}}}\n\n"
        );
        Ok(Bytes::from(body))
    }

    #[test]
    fn test_parse_event_block_joins_multiline_data() {
        let event = parse_event_block("data: line one\ndata: line two").unwrap();
        assert_eq!(event.data, "line one\nline two");
        assert!(event.is_message());
    }

    #[test]
    fn test_parse_event_block_ignores_comments() {
        assert!(parse_event_block(": keep-alive").is_none());
    }

    #[test]
    fn test_parse_event_block_reads_id() {
        let event = parse_event_block("id: evt-42\ndata: payload").unwrap();
        assert_eq!(event.id.as_deref(), Some("evt-42"));
    }

    #[tokio::test]
    async fn test_reader_handles_events_split_across_chunks() {
        let mut reader = SseEventReader::new(chunks(&[
            "event: endp",
            "oint\ndata: /messages\n",
            "\ndata: {\"a\":1}\n\n",
        ]));

        let first = reader.next_event().await.unwrap();
        assert_eq!(first.event.as_deref(), Some("endpoint"));
        assert_eq!(first.data, "/messages");

        let second = reader.next_event().await.unwrap();
        assert_eq!(second.data, r#"{"a":1}"#);

        assert!(reader.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_handles_crlf_and_trailing_event() {
        let mut reader = SseEventReader::new(chunks(&[
            "event: endpoint\r\ndata: /m\r\n\r\n",
            "data: tail",
        ]));

        assert_eq!(reader.next_event().await.unwrap().data, "/m");
        assert_eq!(reader.next_event().await.unwrap().data, "tail");
        assert!(reader.next_event().await.is_none());
    }

    #[test]
    fn test_resolve_relative_endpoint_against_origin() {
        let server = url::Url::parse("https://mcp.example.com/v1/sse?x=1").unwrap();
        let url = resolve_endpoint(&server, "/messages?sessionId=abc").unwrap();
        assert_eq!(url.as_str(), "https://mcp.example.com/messages?sessionId=abc");
    }

    #[test]
    fn test_resolve_absolute_endpoint_kept() {
        let server = url::Url::parse("https://mcp.example.com/sse").unwrap();
        let url = resolve_endpoint(&server, "https://other.example.com/post").unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/post");
    }

    #[tokio::test]
    async fn test_out_of_order_responses_resolve_correct_waiters() {
        let pending = PendingRequests::default();
        let mut rx1 = pending.register(1).await;
        let rx2 = pending.register(2).await;
        let rx3 = pending.register(3).await;

        let (feed, _handle) = spawn_reader(pending.clone(), CancellationToken::new());

        feed.send(message(3)).unwrap();
        let third = tokio::time::timeout(Duration::from_secs(2), rx3)
            .await
            .expect("response 3 should arrive")
            .unwrap();
        assert_eq!(third["result"]["n"], 3);

        // Response 1 has not arrived yet, so its waiter must still be pending.
        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));

        feed.send(message(1)).unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), rx1)
            .await
            .expect("response 1 should arrive")
            .unwrap();
        assert_eq!(first["id"], 1);

        feed.send(message(2)).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second["id"], 2);
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_reader_skips_undecodable_and_unknown_messages() {
        let pending = PendingRequests::default();
        let rx = pending.register(5).await;
        let (feed, _handle) = spawn_reader(pending.clone(), CancellationToken::new());

        feed.send(Ok(Bytes::from_static(b"event: message\ndata: not json\n\n")))
            .unwrap();
        feed.send(message(99)).unwrap();
        feed.send(Ok(Bytes::from_static(b"event: ping\ndata: {}\n\n")))
            .unwrap();
        feed.send(message(5)).unwrap();

        let value = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("reader must survive bad events")
            .unwrap();
        assert_eq!(value["id"], 5);
    }

    #[tokio::test]
    async fn test_stream_end_releases_waiters_and_refuses_new_ones() {
        let pending = PendingRequests::default();
        let rx = pending.register(1).await;
        let (feed, handle) = spawn_reader(pending.clone(), CancellationToken::new());

        drop(feed);
        handle.await.unwrap();

        assert!(rx.await.is_err(), "waiter must be released when stream ends");
        let late = pending.register(2).await;
        assert!(late.await.is_err(), "registration after close must fail fast");
    }

    #[tokio::test]
    async fn test_cancellation_stops_reader() {
        let pending = PendingRequests::default();
        let cancel = CancellationToken::new();
        let (_feed, handle) = spawn_reader(pending.clone(), cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reader should stop after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_waiter_removed() {
        let pending = PendingRequests::default();
        let _rx = pending.register(4).await;
        assert_eq!(pending.len().await, 1);
        pending.remove(4).await;
        assert!(pending.is_empty().await);
        assert!(!pending.resolve(4, serde_json::json!({})).await);
    }
}
