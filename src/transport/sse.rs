//! HTTP/SSE transport for remote MCP servers
//!
//! [`SseTransport`] speaks the HTTP+SSE flavour of MCP:
//!
//! - `connect()` opens the long-lived `text/event-stream` GET. A non-2xx
//!   status or network failure is a [`McpError::Connection`]. A reader task
//!   parses the body with [`SseParser`]: `data: <json>` events become
//!   envelopes, malformed payloads and `ping` events are dropped, and a
//!   `[DONE]` sentinel or the end of the body closes the inbound sequence.
//! - `send()` POSTs each envelope as JSON to the message endpoint. Any 2xx
//!   status is accepted. When the POST response body itself holds a JSON
//!   envelope it is queued for `receive()` like a streamed one.
//! - `receive()` hands out the inbound sequence filled by the reader task.
//!
//! # Endpoint discovery
//!
//! With a configured `message_url` that endpoint is used as is. Otherwise
//! `connect()` does not return until the server has announced its endpoint
//! with an `event: endpoint` frame (relative paths are resolved against the
//! stream URL), the stream has ended, or the endpoint timeout has passed. In
//! the timeout case POSTs go to the stream URL joined with `message`. A later
//! `endpoint` frame still replaces the endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::error::{McpError, Result};
use crate::transport::Transport;
use crate::types::Envelope;

const LOG_TARGET: &str = "mcplex::transport::sse";

/// Connection-establishment timeout for every HTTP request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `connect()` waits for an `endpoint` event.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser.
///
/// Feed it raw body chunks in arrival order; it buffers partial lines
/// (including split UTF-8 sequences) and returns every frame completed by a
/// blank line.
///
/// # Examples
///
/// ```
/// use mcplex::transport::sse::SseParser;
///
/// let mut parser = SseParser::default();
/// assert!(parser.feed(b"data: {\"a\"").is_empty());
/// let frames = parser.feed(b":1}\n\n");
/// assert_eq!(frames[0].data, "{\"a\":1}");
/// ```
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current: SseFrame,
    has_data: bool,
}

impl SseParser {
    /// Consume a chunk and return the frames it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(frame) = self.process_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let frame = std::mem::take(&mut self.current);
        let had_data = std::mem::replace(&mut self.has_data, false);
        if had_data || frame.event.is_some() {
            Some(frame)
        } else {
            None
        }
    }
}

/// What a frame means to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A protocol envelope.
    Message(Envelope),
    /// The server announced where to POST.
    Endpoint(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Interpret a frame, returning `None` for frames that carry nothing usable
/// (pings, empty data, malformed JSON).
pub fn interpret_frame(frame: &SseFrame) -> Option<SseEvent> {
    match frame.event.as_deref() {
        Some(e) if e.eq_ignore_ascii_case("ping") => return None,
        Some("endpoint") => return Some(SseEvent::Endpoint(frame.data.trim().to_string())),
        _ => {}
    }

    let data = frame.data.trim();
    if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<Envelope>(data) {
        Ok(envelope) => Some(SseEvent::Message(envelope)),
        Err(e) => {
            tracing::warn!(target: LOG_TARGET, "dropping malformed SSE data: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// State shared with the stream reader task.
#[derive(Debug)]
struct Shared {
    /// Producer side of the inbound queue; `None` once the stream closed.
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    message_url: RwLock<Url>,
    connected: AtomicBool,
    /// Set once the server announced its message endpoint.
    announced: AtomicBool,
    endpoint_changed: Notify,
}

impl Shared {
    fn push(&self, envelope: Envelope) {
        if let Ok(guard) = self.inbound_tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(envelope);
            }
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.inbound_tx.lock() {
            guard.take();
        }
        self.endpoint_changed.notify_one();
    }

    fn set_endpoint(&self, url: Url) {
        if let Ok(mut current) = self.message_url.write() {
            *current = url;
        }
        self.announced.store(true, Ordering::SeqCst);
        self.endpoint_changed.notify_one();
    }

    /// Resolves once an endpoint was announced or the stream is gone.
    async fn endpoint_settled(&self) {
        while !self.announced.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst) {
            self.endpoint_changed.notified().await;
        }
    }
}

/// HTTP/SSE transport.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use mcplex::transport::sse::SseTransport;
/// use mcplex::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> mcplex::error::Result<()> {
/// let transport = SseTransport::new("http://localhost:3000/sse", Duration::from_secs(30))?;
/// transport.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SseTransport {
    http: reqwest::Client,
    stream_url: Url,
    headers: HashMap<String, String>,
    request_timeout: Duration,
    endpoint_timeout: Duration,
    /// `message_url` was configured; skip discovery.
    fixed_endpoint: bool,
    shared: Arc<Shared>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Build a transport for `stream_url`. No I/O happens here.
    ///
    /// `request_timeout` bounds opening the event stream and each POST; the
    /// stream body itself is unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if `stream_url` does not parse, and
    /// [`McpError::Connection`] if the HTTP client cannot be built.
    pub fn new(stream_url: &str, request_timeout: Duration) -> Result<Self> {
        let stream_url = Url::parse(stream_url)
            .map_err(|e| McpError::Config(format!("invalid SSE url `{stream_url}`: {e}")))?;
        let message_url = stream_url
            .join("message")
            .map_err(|e| McpError::Config(format!("cannot derive message url: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            stream_url,
            headers: HashMap::new(),
            request_timeout,
            endpoint_timeout: ENDPOINT_TIMEOUT,
            fixed_endpoint: false,
            shared: Arc::new(Shared {
                inbound_tx: Mutex::new(None),
                message_url: RwLock::new(message_url),
                connected: AtomicBool::new(false),
                announced: AtomicBool::new(false),
                endpoint_changed: Notify::new(),
            }),
            inbound_rx: Mutex::new(None),
            reader: Mutex::new(None),
        })
    }

    /// Extra headers sent with every request (e.g. `Authorization`).
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Fixed message endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] unless `url` is an absolute URL.
    pub fn with_message_url(mut self, url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| McpError::Config(format!("invalid message url `{url}`: {e}")))?;
        if let Ok(mut current) = self.shared.message_url.write() {
            *current = parsed;
        }
        self.fixed_endpoint = true;
        Ok(self)
    }

    /// How long `connect()` waits for the server to announce its endpoint.
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// Endpoint that `send()` currently POSTs to.
    pub fn message_url(&self) -> Option<Url> {
        self.shared.message_url.read().ok().map(|u| u.clone())
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// Issue the event stream GET and wait for its response headers.
    async fn open_stream(&self) -> Result<reqwest::Response> {
        let request = self
            .apply_headers(self.http.get(self.stream_url.clone()))
            .header("Accept", "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| {
                McpError::Connection(format!(
                    "event stream at {} did not respond within {:?}",
                    self.stream_url, self.request_timeout
                ))
            })?
            .map_err(|e| McpError::Connection(format!("event stream at {} failed: {e}", self.stream_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!(
                "event stream at {} returned HTTP {status}",
                self.stream_url
            )));
        }
        Ok(response)
    }

    fn spawn_reader(&self, response: reqwest::Response) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let base = self.stream_url.clone();

        tokio::spawn(async move {
            read_event_stream(response.bytes_stream(), &shared, &base).await;
            tracing::debug!(target: LOG_TARGET, url = %base, "event stream closed");
            shared.close();
        })
    }
}

/// Pump a streamed body through the parser into the inbound queue.
async fn read_event_stream<S>(body: S, shared: &Shared, base: &Url)
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>>,
{
    let mut parser = SseParser::default();
    futures::pin_mut!(body);

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, "event stream read failed: {e}");
                return;
            }
        };
        for frame in parser.feed(&chunk) {
            if !apply_frame(&frame, shared, base) {
                return;
            }
        }
    }
    if let Some(frame) = parser.finish() {
        apply_frame(&frame, shared, base);
    }
}

/// Returns `false` when the stream should stop.
fn apply_frame(frame: &SseFrame, shared: &Shared, base: &Url) -> bool {
    match interpret_frame(frame) {
        Some(SseEvent::Message(envelope)) => shared.push(envelope),
        Some(SseEvent::Endpoint(path)) => match base.join(&path) {
            Ok(url) => {
                tracing::debug!(target: LOG_TARGET, endpoint = %url, "server announced message endpoint");
                shared.set_endpoint(url);
            }
            Err(e) => tracing::warn!(target: LOG_TARGET, "ignoring bad endpoint `{path}`: {e}"),
        },
        Some(SseEvent::Done) => return false,
        None => {}
    }
    true
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    /// Open the event stream and, unless the endpoint is fixed, wait for the
    /// server to announce where to POST.
    async fn connect(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let response = self.open_stream().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = self.shared.inbound_tx.lock() {
            *guard = Some(tx);
        }
        if let Ok(mut guard) = self.inbound_rx.lock() {
            *guard = Some(rx);
        }
        self.shared.announced.store(false, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);

        let handle = self.spawn_reader(response);
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(previous) = reader.replace(handle) {
                previous.abort();
            }
        }
        tracing::debug!(target: LOG_TARGET, url = %self.stream_url, "event stream open");

        if !self.fixed_endpoint {
            let settled =
                tokio::time::timeout(self.endpoint_timeout, self.shared.endpoint_settled()).await;
            if settled.is_err() {
                tracing::debug!(
                    target: LOG_TARGET,
                    url = %self.stream_url,
                    endpoint = ?self.message_url().map(|u| u.to_string()),
                    "no endpoint announced; using the default message endpoint"
                );
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(reader) = reader {
            reader.abort();
        }
        self.shared.close();
        if let Ok(mut guard) = self.inbound_rx.lock() {
            guard.take();
        }
        Ok(())
    }

    /// POST the envelope to the message endpoint.
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Connection("SSE transport is not connected".to_string()));
        }
        let url = self
            .message_url()
            .ok_or_else(|| McpError::Connection("message endpoint unavailable".to_string()))?;

        let response = self
            .apply_headers(self.http.post(url.clone()))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .timeout(self.request_timeout)
            .body(serde_json::to_vec(envelope)?)
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("POST to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!("POST to {url} returned HTTP {status}")));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        if is_json {
            let body = response
                .bytes()
                .await
                .map_err(|e| McpError::Connection(format!("reading POST response failed: {e}")))?;
            if !body.is_empty() {
                match serde_json::from_slice::<Envelope>(&body) {
                    Ok(reply) => self.shared.push(reply),
                    Err(e) => tracing::debug!(target: LOG_TARGET, "POST body is not an envelope: {e}"),
                }
            }
        }
        Ok(())
    }

    /// Envelopes read from the event stream since `connect()`.
    fn receive(&self) -> BoxStream<'static, Envelope> {
        let rx = self.inbound_rx.lock().ok().and_then(|mut guard| guard.take());
        let Some(rx) = rx else {
            tracing::warn!(
                target: LOG_TARGET,
                url = %self.stream_url,
                "receive() called without a fresh connection; returning empty stream"
            );
            return stream::empty().boxed();
        };
        UnboundedReceiverStream::new(rx).boxed()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}
