//! MCP protocol client
//!
//! [`McpClient`] owns one [`Transport`] and drives the MCP lifecycle on top
//! of it:
//!
//! ```text
//! Disconnected --connect()--> Connecting --transport up--> Handshaking
//!      ^                                                        |
//!      |                                  initialize/initialized|
//!      +---- disconnect() / I/O failure / failed handshake -- Ready
//! ```
//!
//! # Correlation
//!
//! Every outbound request gets a unique string id (`{name}_{counter}_{epoch
//! ms}`) and a completion slot in the pending table *before* its bytes are
//! written. A single dispatch task consumes the transport's inbound stream
//! and resolves slots by id. Each request waits under its own timeout; on
//! expiry only that slot is removed and the connection stays open. A
//! response whose id is no longer pending is dropped.
//!
//! When the connection goes away (explicit disconnect or the inbound stream
//! ending) the pending table is closed: every waiting request fails with
//! [`McpError::Connection`] and new requests are refused, so no caller can
//! hang on a dead connection.
//!
//! # Notifications
//!
//! Handlers registered with [`McpClient::on_notification`] (sync) or
//! [`McpClient::on_notification_async`] run on the dispatch task in arrival
//! order. A failing or panicking handler is logged and does not affect the
//! others. Handlers must not await requests on the same client, since the
//! response could only be delivered by the task that is running them; spawn
//! a task for that instead.
//!
//! # Caching
//!
//! `list_tools`, `list_resources` and `list_prompts` cache their result until
//! `force_refresh` is passed, the server sends the matching `list_changed`
//! notification, or the client reconnects.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::transport::Transport;
use crate::types::{
    ClientCapabilities, Envelope, GetPromptParams, Implementation, InitializeParams,
    InitializeResult, JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedParams, Prompt, PromptResult, ReadResourceParams, ReadResourceResult, RequestId,
    Resource, ResourceContents, ServerCapabilities, ServerCapabilityFlag, Tool, ToolCall,
    ToolResult, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_PING, METHOD_PROMPTS_GET,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, NOTIF_INITIALIZED, NOTIF_PROMPTS_LIST_CHANGED,
    NOTIF_RESOURCES_LIST_CHANGED, NOTIF_TOOLS_LIST_CHANGED, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Default deadline for calls (`tools/call`, `resources/read`, ...).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for each page of a listing request.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for the `initialize` request.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Identity sent as `clientInfo`.
    pub client_info: Implementation,
    /// Capabilities sent during the handshake.
    pub capabilities: ClientCapabilities,
    /// Deadline for non-listing requests.
    pub request_timeout: Duration,
    /// Deadline for each listing page.
    pub list_timeout: Duration,
    /// Deadline for `initialize`.
    pub init_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation::mcplex(),
            capabilities: ClientCapabilities::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

/// Lifecycle state of an [`McpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No transport, or the last one is gone.
    Disconnected,
    /// The transport is being connected.
    Connecting,
    /// Transport up, `initialize` in flight.
    Handshaking,
    /// Handshake complete; all operations allowed.
    Ready,
}

/// What the server told us during the handshake.
#[derive(Debug, Clone)]
pub struct ServerSession {
    /// Protocol revision the server selected.
    pub protocol_version: String,
    /// Capabilities the server advertised.
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: Implementation,
    /// Optional usage instructions.
    pub instructions: Option<String>,
}

type NotificationHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
struct PendingTable {
    open: bool,
    entries: HashMap<RequestId, oneshot::Sender<Result<Value>>>,
}

impl PendingTable {
    /// Refuse new requests and fail every waiting one.
    fn close(&mut self, reason: &str) {
        self.open = false;
        for (_, slot) in self.entries.drain() {
            let _ = slot.send(Err(McpError::Connection(reason.to_string())));
        }
    }
}

struct Slot<T> {
    value: Option<Vec<T>>,
    generation: u64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: None,
            generation: 0,
        }
    }
}

impl<T> Slot<T> {
    fn invalidate(&mut self) {
        self.value = None;
        self.generation += 1;
    }
}

#[derive(Default)]
struct ListCache {
    tools: Slot<Tool>,
    resources: Slot<Resource>,
    prompts: Slot<Prompt>,
}

fn tools_slot(cache: &mut ListCache) -> &mut Slot<Tool> {
    &mut cache.tools
}

fn resources_slot(cache: &mut ListCache) -> &mut Slot<Resource> {
    &mut cache.resources
}

fn prompts_slot(cache: &mut ListCache) -> &mut Slot<Prompt> {
    &mut cache.prompts
}

impl ListCache {
    fn clear(&mut self) {
        self.tools.invalidate();
        self.resources.invalidate();
        self.prompts.invalidate();
    }
}

struct Dispatch {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    name: String,
    options: ClientOptions,
    counter: AtomicU64,
    state: RwLock<ClientState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    pending: Mutex<PendingTable>,
    handlers: RwLock<HashMap<String, Vec<NotificationHandler>>>,
    session: RwLock<Option<ServerSession>>,
    cache: Mutex<ListCache>,
    dispatch: Mutex<Option<Dispatch>>,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

/// A client for one MCP server.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mcplex::client::{ClientOptions, McpClient};
/// use mcplex::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> mcplex::error::Result<()> {
/// let client = McpClient::new("files", ClientOptions::default());
/// client
///     .connect(Arc::new(StdioTransport::new("mcp-server-files", vec![])))
///     .await?;
/// for tool in client.list_tools(false).await? {
///     println!("{}", tool.name);
/// }
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a disconnected client. `name` prefixes request ids and labels
    /// log lines.
    pub fn new(name: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                options,
                counter: AtomicU64::new(0),
                state: RwLock::new(ClientState::Disconnected),
                transport: Mutex::new(None),
                pending: Mutex::new(PendingTable::default()),
                handlers: RwLock::new(HashMap::new()),
                session: RwLock::new(None),
                cache: Mutex::new(ListCache::default()),
                dispatch: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Client name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    /// `true` once the handshake has completed and the transport is still up.
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Ready
            && self
                .inner
                .transport()
                .map(|t| t.is_connected())
                .unwrap_or(false)
    }

    /// Negotiated server capabilities; `None` until the handshake completes.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.session().map(|s| s.capabilities)
    }

    /// Server identity from the handshake.
    pub fn server_info(&self) -> Option<Implementation> {
        self.session().map(|s| s.server_info)
    }

    /// Negotiated protocol revision.
    pub fn protocol_version(&self) -> Option<String> {
        self.session().map(|s| s.protocol_version)
    }

    /// Everything learned during the handshake.
    pub fn session(&self) -> Option<ServerSession> {
        self.inner.session.read().ok().and_then(|s| s.clone())
    }

    /// Whether the server advertised `flag`.
    pub fn supports(&self, flag: ServerCapabilityFlag) -> bool {
        self.capabilities()
            .map(|c| c.supports(flag))
            .unwrap_or(false)
    }

    /// Connect `transport`, start the dispatch task, and perform the
    /// handshake.
    ///
    /// On any failure the transport and task are torn down again, the
    /// client is left `Disconnected`, and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`McpError::Protocol`] if the client is already connected or the
    ///   server selects an unsupported protocol version.
    /// - [`McpError::Connection`] if the transport cannot be connected.
    /// - [`McpError::Timeout`] if `initialize` is not answered in time.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() != ClientState::Disconnected {
            return Err(McpError::Protocol(format!(
                "client '{}' is already connected",
                self.inner.name
            )));
        }
        // Leftovers from a connection that died on its own.
        self.inner.teardown().await;

        self.inner.set_state(ClientState::Connecting);
        if let Err(e) = transport.connect().await {
            self.inner.set_state(ClientState::Disconnected);
            return Err(e);
        }

        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.open = true;
        }
        if let Ok(mut slot) = self.inner.transport.lock() {
            *slot = Some(Arc::clone(&transport));
        }
        let token = CancellationToken::new();
        let task = spawn_dispatch(Arc::clone(&self.inner), transport.receive(), token.clone());
        if let Ok(mut dispatch) = self.inner.dispatch.lock() {
            *dispatch = Some(Dispatch { token, task });
        }

        self.inner.set_state(ClientState::Handshaking);
        match self.handshake(&transport).await {
            Ok(session) => {
                tracing::info!(
                    client = %self.inner.name,
                    server = %session.server_info.name,
                    protocol_version = %session.protocol_version,
                    "MCP handshake complete"
                );
                self.inner.set_state(ClientState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(client = %self.inner.name, "MCP handshake failed: {e}");
                self.inner.teardown().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, transport: &Arc<dyn Transport>) -> Result<ServerSession> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.inner.options.capabilities.clone(),
            client_info: self.inner.options.client_info.clone(),
        };
        let value = self
            .inner
            .request_value(
                METHOD_INITIALIZE,
                Some(serde_json::to_value(params)?),
                self.inner.options.init_timeout,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("malformed initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(McpError::Protocol(format!(
                "server selected unsupported protocol version {} (supported: {})",
                result.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }

        let session = ServerSession {
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
            server_info: result.server_info,
            instructions: result.instructions,
        };
        if let Ok(mut slot) = self.inner.session.write() {
            *slot = Some(session.clone());
        }

        transport
            .send(&Envelope::notification(NOTIF_INITIALIZED, None))
            .await?;
        Ok(session)
    }

    /// Stop the dispatch task, fail every pending request with
    /// [`McpError::Connection`], disconnect the transport and forget all
    /// negotiated and cached state. Calling it again is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() != ClientState::Disconnected {
            tracing::debug!(client = %self.inner.name, "disconnecting");
        }
        self.inner.teardown().await;
        Ok(())
    }

    /// Register a synchronous handler for a notification method.
    ///
    /// Several handlers may be registered for one method; all of them run,
    /// in registration order.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcplex::client::{ClientOptions, McpClient};
    /// use mcplex::types::NOTIF_MESSAGE;
    ///
    /// let client = McpClient::new("files", ClientOptions::default());
    /// client.on_notification(NOTIF_MESSAGE, |params| {
    ///     println!("server log: {params}");
    /// });
    /// ```
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.register(
            method.into(),
            Arc::new(move |params: Value| {
                handler(params);
                futures::future::ready(Ok::<(), McpError>(())).boxed()
            }),
        );
    }

    /// Register an asynchronous handler for a notification method.
    ///
    /// An `Err` return is logged and does not stop other handlers.
    pub fn on_notification_async<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            method.into(),
            Arc::new(move |params: Value| handler(params).boxed()),
        );
    }

    fn register(&self, method: String, handler: NotificationHandler) {
        if let Ok(mut handlers) = self.inner.handlers.write() {
            handlers.entry(method).or_default().push(handler);
        }
    }

    /// Send a raw request and decode its result.
    ///
    /// `timeout` overrides the client's default request deadline.
    ///
    /// # Errors
    ///
    /// [`McpError::Connection`] if the client is not ready or the connection
    /// drops, [`McpError::Timeout`] on expiry, or the typed error the server
    /// replied with.
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<R> {
        self.ensure_ready()?;
        let value = self
            .inner
            .request_value(
                method,
                params,
                timeout.unwrap_or(self.inner.options.request_timeout),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("malformed {method} result: {e}")))
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_ready()?;
        self.inner
            .transport()
            .ok_or_else(|| self.inner.not_connected())?
            .send(&Envelope::notification(method, params))
            .await
    }

    /// Health check.
    pub async fn ping(&self) -> Result<()> {
        let _: Value = self.request(METHOD_PING, None, None).await?;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state() == ClientState::Ready {
            Ok(())
        } else {
            Err(self.inner.not_connected())
        }
    }

    fn require(&self, flag: ServerCapabilityFlag) -> Result<()> {
        self.ensure_ready()?;
        if self.supports(flag) {
            Ok(())
        } else {
            Err(McpError::Capability {
                server: self.inner.name.clone(),
                capability: flag.as_str().to_string(),
            })
        }
    }

    async fn paginate<P, T>(&self, method: &str, split: fn(P) -> (Vec<T>, Option<String>)) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let params = serde_json::to_value(PaginatedParams {
                cursor: cursor.clone(),
            })?;
            let page: P = self
                .request(method, Some(params), Some(self.inner.options.list_timeout))
                .await?;
            let (mut batch, next) = split(page);
            items.append(&mut batch);
            match next {
                Some(next) if next.is_empty() => break,
                Some(next) if !seen.insert(next.clone()) => {
                    tracing::warn!(client = %self.inner.name, method, cursor = %next, "server repeated a page cursor; stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    async fn cached_list<P, T>(
        &self,
        flag: ServerCapabilityFlag,
        method: &str,
        force_refresh: bool,
        slot: fn(&mut ListCache) -> &mut Slot<T>,
        split: fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
        T: Clone,
    {
        self.require(flag)?;
        let generation = {
            let mut cache = self.inner.lock_cache()?;
            let slot = slot(&mut *cache);
            if !force_refresh {
                if let Some(cached) = &slot.value {
                    return Ok(cached.clone());
                }
            }
            slot.generation
        };

        let fresh = self.paginate(method, split).await?;

        let mut cache = self.inner.lock_cache()?;
        let slot = slot(&mut *cache);
        if slot.generation == generation {
            slot.value = Some(fresh.clone());
        }
        Ok(fresh)
    }

    /// List the server's tools.
    ///
    /// # Errors
    ///
    /// [`McpError::Capability`] if the server never advertised tools.
    pub async fn list_tools(&self, force_refresh: bool) -> Result<Vec<Tool>> {
        self.cached_list(
            ServerCapabilityFlag::Tools,
            METHOD_TOOLS_LIST,
            force_refresh,
            tools_slot,
            |r: ListToolsResult| (r.tools, r.next_cursor),
        )
        .await
    }

    /// List the server's resources.
    pub async fn list_resources(&self, force_refresh: bool) -> Result<Vec<Resource>> {
        self.cached_list(
            ServerCapabilityFlag::Resources,
            METHOD_RESOURCES_LIST,
            force_refresh,
            resources_slot,
            |r: ListResourcesResult| (r.resources, r.next_cursor),
        )
        .await
    }

    /// List the server's prompts.
    pub async fn list_prompts(&self, force_refresh: bool) -> Result<Vec<Prompt>> {
        self.cached_list(
            ServerCapabilityFlag::Prompts,
            METHOD_PROMPTS_LIST,
            force_refresh,
            prompts_slot,
            |r: ListPromptsResult| (r.prompts, r.next_cursor),
        )
        .await
    }

    /// Invoke a tool. Never cached.
    ///
    /// `arguments` must be a JSON object or `null`. A tool-level failure
    /// (`isError: true`) is returned as data, not as an error.
    ///
    /// # Errors
    ///
    /// [`McpError::InvalidParams`] for non-object arguments, or whatever the
    /// server or connection reports (e.g. [`McpError::MethodNotFound`]).
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        self.require(ServerCapabilityFlag::Tools)?;
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(McpError::InvalidParams {
                    message: format!("tool arguments must be a JSON object, got {other}"),
                    data: None,
                })
            }
        };
        let params = serde_json::to_value(ToolCall {
            name: name.to_string(),
            arguments,
        })?;
        self.request(METHOD_TOOLS_CALL, Some(params), None).await
    }

    /// Read a resource by URI. Never cached.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.require(ServerCapabilityFlag::Resources)?;
        let params = serde_json::to_value(ReadResourceParams {
            uri: uri.to_string(),
        })?;
        let result: ReadResourceResult = self
            .request(METHOD_RESOURCES_READ, Some(params), None)
            .await?;
        Ok(result.contents)
    }

    /// Render a prompt. Never cached.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<PromptResult> {
        self.require(ServerCapabilityFlag::Prompts)?;
        let params = serde_json::to_value(GetPromptParams {
            name: name.to_string(),
            arguments,
        })?;
        self.request(METHOD_PROMPTS_GET, Some(params), None).await
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner
            .pending
            .lock()
            .map(|p| p.entries.len())
            .unwrap_or(0)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Ok(dispatch) = self.inner.dispatch.lock() {
            if let Some(dispatch) = dispatch.as_ref() {
                dispatch.token.cancel();
                dispatch.task.abort();
            }
        }
    }
}

impl Inner {
    fn state(&self) -> ClientState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ClientState::Disconnected)
    }

    fn set_state(&self, state: ClientState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().ok().and_then(|t| t.clone())
    }

    fn not_connected(&self) -> McpError {
        McpError::Connection(format!("client '{}' is not connected", self.name))
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, ListCache>> {
        self.cache
            .lock()
            .map_err(|_| McpError::Protocol("list cache poisoned".to_string()))
    }

    fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        RequestId::String(format!(
            "{}_{}_{}",
            self.name,
            n,
            chrono::Utc::now().timestamp_millis()
        ))
    }

    fn forget(&self, id: &RequestId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.entries.remove(id);
        }
    }

    /// Register, send, and await one request.
    async fn request_value(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let transport = self.transport().ok_or_else(|| self.not_connected())?;
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| McpError::Protocol("pending table poisoned".to_string()))?;
            if !pending.open {
                return Err(self.not_connected());
            }
            pending.entries.insert(id.clone(), tx);
        }

        if let Err(e) = transport
            .send(&Envelope::request(id.clone(), method, params))
            .await
        {
            self.forget(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Connection(format!(
                "connection to '{}' closed before {method} completed",
                self.name
            ))),
            Err(_) => {
                self.forget(&id);
                tracing::warn!(client = %self.name, %id, method, ?timeout, "request timed out");
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Tear down whatever is left of the current connection.
    ///
    /// Called with the lifecycle lock held (or from `connect`'s failure path).
    async fn teardown(&self) {
        let dispatch = self.dispatch.lock().ok().and_then(|mut d| d.take());
        if let Some(Dispatch { token, .. }) = &dispatch {
            token.cancel();
        }

        // Pending callers must not wait on a handler still running in the
        // dispatch task.
        self.close_connection("client disconnected");

        if let Some(Dispatch { task, .. }) = dispatch {
            task.abort();
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(client = %self.name, "dispatch task panicked");
                }
            }
        }

        let transport = self.transport.lock().ok().and_then(|mut t| t.take());
        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(client = %self.name, "transport disconnect failed: {e}");
            }
        }
    }

    /// Fail pending requests and forget negotiated state.
    fn close_connection(&self, reason: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.close(reason);
        }
        if let Ok(mut session) = self.session.write() {
            *session = None;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        self.set_state(ClientState::Disconnected);
    }

    /// The inbound stream ended: the peer is gone.
    fn on_stream_closed(&self) {
        tracing::warn!(client = %self.name, "server closed the connection");
        self.close_connection("server closed the connection");
        let transport = self.transport.lock().ok().and_then(|mut t| t.take());
        if let Some(transport) = transport {
            let name = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.disconnect().await {
                    tracing::debug!(client = %name, "transport cleanup failed: {e}");
                }
            });
        }
    }

    async fn route(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => self.handle_response(response),
            Envelope::Notification(notification) => {
                self.handle_notification(&notification.method, notification.params.unwrap_or(Value::Null))
                    .await
            }
            Envelope::Request(request) => {
                tracing::debug!(
                    client = %self.name,
                    method = %request.method,
                    id = %request.id,
                    "ignoring server-initiated request"
                );
            }
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            if let Some(error) = response.error {
                tracing::warn!(client = %self.name, "server reported an unattributed error: {error}");
            }
            return;
        };
        let slot = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.entries.remove(&id));
        let Some(slot) = slot else {
            tracing::debug!(client = %self.name, %id, "dropping response for unknown request id");
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(McpError::from_rpc_error(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = slot.send(outcome);
    }

    async fn handle_notification(&self, method: &str, params: Value) {
        if let Ok(mut cache) = self.cache.lock() {
            match method {
                NOTIF_TOOLS_LIST_CHANGED => cache.tools.invalidate(),
                NOTIF_RESOURCES_LIST_CHANGED => cache.resources.invalidate(),
                NOTIF_PROMPTS_LIST_CHANGED => cache.prompts.invalidate(),
                _ => {}
            }
        }

        let handlers: Vec<NotificationHandler> = self
            .handlers
            .read()
            .ok()
            .and_then(|h| h.get(method).cloned())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::trace!(client = %self.name, method, "no handler for notification");
            return;
        }

        for handler in handlers {
            let params = params.clone();
            let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
                Ok(future) => future,
                Err(_) => {
                    tracing::error!(client = %self.name, method, "notification handler panicked");
                    continue;
                }
            };
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(client = %self.name, method, "notification handler failed: {e}")
                }
                Err(_) => {
                    tracing::error!(client = %self.name, method, "notification handler panicked")
                }
            }
        }
    }
}

fn spawn_dispatch(
    inner: Arc<Inner>,
    mut inbound: BoxStream<'static, Envelope>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                next = inbound.next() => match next {
                    Some(envelope) => inner.route(envelope).await,
                    None => {
                        inner.on_stream_closed();
                        break;
                    }
                },
            }
        }
    })
}
