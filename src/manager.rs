//! Multi-server session manager
//!
//! A [`SessionManager`] owns one [`McpClient`] per configured server and
//! presents the whole pool as a single surface:
//!
//! - [`SessionManager::initialize`] connects the system-default servers and
//!   then the user's own records from a [`ServerConfigStore`].
//! - [`SessionManager::add_server`], [`SessionManager::remove_server`] and
//!   [`SessionManager::reconnect_server`] change membership at runtime.
//!   Each is serialized per server id.
//! - `list_all_*` and `find_*` fan out over every connected server. A server
//!   that fails contributes nothing; it never fails the aggregate.
//! - [`SessionManager::get_server_status`] and [`SessionManager::status`]
//!   report connectivity, negotiated capabilities and (only for advertised
//!   categories) the server's listings.
//!
//! Servers whose connection fails stay registered in a disconnected state
//! with their last error, so status reports them and
//! [`SessionManager::reconnect_server`] can bring them back.
//!
//! # Examples
//!
//! ```no_run
//! use mcplex::config::Config;
//! use mcplex::manager::SessionManager;
//!
//! # async fn example() -> mcplex::error::Result<()> {
//! let config = Config::load("mcplex.yaml")?;
//! let manager = SessionManager::from_config(&config);
//! let summary = manager.initialize(Some("alice")).await;
//! println!("{} connected, {} failed", summary.connected.len(), summary.failed.len());
//!
//! for entry in manager.list_all_tools(false).await {
//!     println!("{}: {}", entry.server_id, entry.tool.name);
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::client::{ClientOptions, ClientState, McpClient};
use crate::config::{Config, ServerConfig, ServerRecord, TransportKind};
use crate::error::{McpError, Result};
use crate::store::{ServerConfigStore, StaticConfigStore};
use crate::transport::{self, Transport};
use crate::types::{
    Implementation, Prompt, PromptResult, Resource, ResourceContents, ServerCapabilities,
    ServerCapabilityFlag, Tool, ToolResult,
};

// ---------------------------------------------------------------------------
// Transport factory
// ---------------------------------------------------------------------------

/// Builds a fresh transport for each connection attempt.
pub trait TransportFactory: Send + Sync {
    /// Create an unconnected transport for `record`.
    fn create(&self, record: &ServerRecord) -> Result<Arc<dyn Transport>>;
}

/// Builds stdio and SSE transports from the record's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigTransportFactory;

impl TransportFactory for ConfigTransportFactory {
    fn create(&self, record: &ServerRecord) -> Result<Arc<dyn Transport>> {
        transport::from_config(&record.config)
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Where a server record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "user")]
pub enum ServerSource {
    /// The `servers` section of the configuration
    System,
    /// A user's record from the config store
    User(String),
    /// Added at runtime through [`SessionManager::add_server`]
    Dynamic,
}

/// One managed server: its record, its client and its last failure.
#[derive(Debug)]
pub struct ServerConnection {
    record: ServerRecord,
    source: ServerSource,
    client: McpClient,
    last_error: Mutex<Option<String>>,
}

impl ServerConnection {
    fn new(record: ServerRecord, source: ServerSource, options: &ClientOptions) -> Self {
        let mut options = options.clone();
        options.request_timeout = record.config.request_timeout();
        let client = McpClient::new(record.id.clone(), options);
        Self {
            record,
            source,
            client,
            last_error: Mutex::new(None),
        }
    }

    /// Server id
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Connection settings
    pub fn config(&self) -> &ServerConfig {
        &self.record.config
    }

    /// Origin of the record
    pub fn source(&self) -> &ServerSource {
        &self.source
    }

    /// The server's client
    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// Whether the handshake completed and the transport is up
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Message of the most recent connection failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error;
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate and status types
// ---------------------------------------------------------------------------

/// A tool together with the server exposing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerTool {
    /// Owning server id
    pub server_id: String,
    /// Tool definition
    pub tool: Tool,
}

/// A resource together with the server exposing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerResource {
    /// Owning server id
    pub server_id: String,
    /// Resource definition
    pub resource: Resource,
}

/// A prompt together with the server exposing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerPrompt {
    /// Owning server id
    pub server_id: String,
    /// Prompt definition
    pub prompt: Prompt,
}

/// Outcome of [`SessionManager::initialize`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitSummary {
    /// Servers that completed the handshake
    pub connected: Vec<String>,
    /// Servers that could not be connected, with the error message
    pub failed: Vec<(String, String)>,
    /// Records skipped because they are disabled, not auto-started,
    /// invalid or duplicated
    pub skipped: Vec<String>,
}

/// Snapshot of one server
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server id
    pub id: String,
    /// Record origin
    pub source: ServerSource,
    /// Transport kind
    pub transport: TransportKind,
    /// Whether the server is ready for requests
    pub connected: bool,
    /// Client lifecycle state
    pub state: String,
    /// Negotiated protocol revision
    pub protocol_version: Option<String>,
    /// Server identity from the handshake
    pub server_info: Option<Implementation>,
    /// Advertised capabilities
    pub capabilities: Option<ServerCapabilities>,
    /// Tools, when the server advertises them
    pub tools: Option<Vec<Tool>>,
    /// Resources, when the server advertises them
    pub resources: Option<Vec<Resource>>,
    /// Prompts, when the server advertises them
    pub prompts: Option<Vec<Prompt>>,
    /// Most recent connection failure
    pub last_error: Option<String>,
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Per-server status in registration order
    pub servers: Vec<ServerStatus>,
    /// Registered servers
    pub total_servers: usize,
    /// Connected servers
    pub connected_servers: usize,
    /// Tools across connected servers
    pub total_tools: usize,
    /// Resources across connected servers
    pub total_resources: usize,
    /// Prompts across connected servers
    pub total_prompts: usize,
}

fn state_label(state: ClientState) -> &'static str {
    match state {
        ClientState::Disconnected => "disconnected",
        ClientState::Connecting => "connecting",
        ClientState::Handshaking => "handshaking",
        ClientState::Ready => "ready",
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Owns and multiplexes the MCP connections of one application or user.
pub struct SessionManager {
    system_servers: Vec<ServerRecord>,
    options: ClientOptions,
    store: Arc<dyn ServerConfigStore>,
    factory: Arc<dyn TransportFactory>,
    connections: RwLock<Vec<Arc<ServerConnection>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("system_servers", &self.system_servers.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager.
    ///
    /// # Arguments
    ///
    /// * `system_servers` - Records connected for every user
    /// * `options` - Client settings shared by every connection; each
    ///   record's `timeout` replaces the request deadline
    /// * `store` - Source of per-user records
    pub fn new(
        system_servers: Vec<ServerRecord>,
        options: ClientOptions,
        store: Arc<dyn ServerConfigStore>,
    ) -> Self {
        Self {
            system_servers,
            options,
            store,
            factory: Arc::new(ConfigTransportFactory),
            connections: RwLock::new(Vec::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager for a loaded configuration, serving user records from its
    /// `users` section.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.servers.clone(),
            config.client.to_options(),
            Arc::new(StaticConfigStore::from_config(config)),
        )
    }

    /// Replace the transport factory.
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    fn server_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Connect the system-default servers, then `user`'s records.
    ///
    /// Disabled records are skipped. User records must also be
    /// `auto_start`; the others are registered without connecting so
    /// [`reconnect_server`](Self::reconnect_server) can start them later.
    /// No single failure aborts initialization: failed servers are logged,
    /// reported in the summary and kept registered.
    pub async fn initialize(&self, user: Option<&str>) -> InitSummary {
        let mut summary = InitSummary::default();
        let mut to_connect = Vec::new();

        for record in &self.system_servers {
            if !record.config.enabled {
                tracing::debug!(server = %record.id, "skipping disabled server");
                summary.skipped.push(record.id.clone());
                continue;
            }
            match self.register(record.clone(), ServerSource::System).await {
                Ok(conn) => to_connect.push(conn),
                Err(e) => {
                    tracing::warn!(server = %record.id, "skipping server: {e}");
                    summary.skipped.push(record.id.clone());
                }
            }
        }

        if let Some(user) = user {
            let records = match self.store.load_user_servers(user).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(user, "failed to load user servers: {e}");
                    Vec::new()
                }
            };
            for record in records {
                if !record.config.enabled {
                    tracing::debug!(server = %record.id, user, "skipping disabled server");
                    summary.skipped.push(record.id);
                    continue;
                }
                let auto_start = record.config.auto_start;
                let id = record.id.clone();
                match self
                    .register(record, ServerSource::User(user.to_string()))
                    .await
                {
                    Ok(conn) if auto_start => to_connect.push(conn),
                    Ok(_) => summary.skipped.push(id),
                    Err(e) => {
                        tracing::warn!(server = %id, user, "skipping server: {e}");
                        summary.skipped.push(id);
                    }
                }
            }
        }

        let outcomes = join_all(to_connect.iter().map(|conn| async move {
            let lock = self.server_lock(conn.id());
            let _guard = lock.lock().await;
            self.establish(conn).await
        }))
        .await;

        for (conn, outcome) in to_connect.iter().zip(outcomes) {
            match outcome {
                Ok(()) => summary.connected.push(conn.id().to_string()),
                Err(e) => summary.failed.push((conn.id().to_string(), e.to_string())),
            }
        }

        tracing::info!(
            connected = summary.connected.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "session manager initialized"
        );
        summary
    }

    async fn register(
        &self,
        record: ServerRecord,
        source: ServerSource,
    ) -> Result<Arc<ServerConnection>> {
        record.config.validate()?;
        let mut connections = self.connections.write().await;
        if connections.iter().any(|c| c.id() == record.id) {
            return Err(McpError::Config(format!(
                "server '{}' is already registered",
                record.id
            )));
        }
        let conn = Arc::new(ServerConnection::new(record, source, &self.options));
        connections.push(Arc::clone(&conn));
        Ok(conn)
    }

    /// Connect with the record's retry policy: one attempt plus
    /// `retry_attempts` more, `retry_delay` apart.
    async fn establish(&self, conn: &ServerConnection) -> Result<()> {
        let config = conn.config();
        let attempts = config.retry_attempts.saturating_add(1);
        let mut attempt = 1;
        loop {
            let outcome = match self.factory.create(&conn.record) {
                Ok(transport) => conn.client.connect(transport).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    conn.set_last_error(None);
                    tracing::info!(server = %conn.id(), attempt, "connected to MCP server");
                    return Ok(());
                }
                Err(e) => {
                    conn.set_last_error(Some(e.to_string()));
                    if attempt >= attempts {
                        tracing::error!(
                            server = %conn.id(),
                            attempts,
                            "failed to connect to MCP server: {e}"
                        );
                        return Err(e);
                    }
                    tracing::warn!(
                        server = %conn.id(),
                        attempt,
                        "connection attempt failed, retrying: {e}"
                    );
                    attempt += 1;
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
        }
    }

    /// Register and connect a server at runtime.
    ///
    /// # Errors
    ///
    /// - [`McpError::Config`] if the record is invalid, disabled or its id
    ///   is already registered.
    /// - The connection error if every attempt fails. The server then stays
    ///   registered as disconnected.
    pub async fn add_server(&self, record: ServerRecord) -> Result<()> {
        if !record.config.enabled {
            return Err(McpError::Config(format!(
                "server '{}' is disabled",
                record.id
            )));
        }
        let lock = self.server_lock(&record.id);
        let _guard = lock.lock().await;
        let conn = self.register(record, ServerSource::Dynamic).await?;
        self.establish(&conn).await
    }

    /// Disconnect and forget a server.
    ///
    /// # Errors
    ///
    /// [`McpError::ServerNotFound`] if `id` is not registered.
    pub async fn remove_server(&self, id: &str) -> Result<()> {
        let lock = self.server_lock(id);
        let guard = lock.lock().await;
        let removed = {
            let mut connections = self.connections.write().await;
            let index = connections
                .iter()
                .position(|c| c.id() == id)
                .ok_or_else(|| McpError::ServerNotFound(id.to_string()))?;
            connections.remove(index)
        };
        if let Err(e) = removed.client.disconnect().await {
            tracing::warn!(server = %id, "error while disconnecting removed server: {e}");
        }
        drop(guard);
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(id);
        }
        tracing::info!(server = %id, "removed MCP server");
        Ok(())
    }

    /// Tear down a server's client and connect a fresh one from the stored
    /// record. Overlapping calls for the same id run one after the other.
    ///
    /// # Errors
    ///
    /// [`McpError::ServerNotFound`] if `id` is not registered, otherwise the
    /// connection error once every attempt has failed.
    pub async fn reconnect_server(&self, id: &str) -> Result<()> {
        let lock = self.server_lock(id);
        let _guard = lock.lock().await;

        let old = self
            .connection(id)
            .await
            .ok_or_else(|| McpError::ServerNotFound(id.to_string()))?;
        if let Err(e) = old.client.disconnect().await {
            tracing::warn!(server = %id, "error while disconnecting before reconnect: {e}");
        }

        let fresh = Arc::new(ServerConnection::new(
            old.record.clone(),
            old.source.clone(),
            &self.options,
        ));
        {
            let mut connections = self.connections.write().await;
            match connections.iter_mut().find(|c| c.id() == id) {
                Some(slot) => *slot = Arc::clone(&fresh),
                None => return Err(McpError::ServerNotFound(id.to_string())),
            }
        }

        tracing::info!(server = %id, "reconnecting MCP server");
        self.establish(&fresh).await
    }

    /// Disconnect every server concurrently and clear the registry.
    ///
    /// A failing disconnect is logged and does not affect the others.
    pub async fn shutdown(&self) {
        let connections: Vec<_> = self.connections.write().await.drain(..).collect();
        let outcomes = join_all(connections.iter().map(|conn| conn.client.disconnect())).await;
        for (conn, outcome) in connections.iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(server = %conn.id(), "error during shutdown: {e}");
            }
        }
        if let Ok(mut locks) = self.locks.lock() {
            locks.clear();
        }
        tracing::info!(servers = connections.len(), "session manager shut down");
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Registered server ids in registration order
    pub async fn server_ids(&self) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .map(|c| c.id().to_string())
            .collect()
    }

    /// A registered server
    pub async fn connection(&self, id: &str) -> Option<Arc<ServerConnection>> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    async fn connected(&self) -> Vec<Arc<ServerConnection>> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|c| c.is_connected())
            .cloned()
            .collect()
    }

    async fn ready(&self, id: &str) -> Result<Arc<ServerConnection>> {
        let conn = self
            .connection(id)
            .await
            .ok_or_else(|| McpError::ServerNotFound(id.to_string()))?;
        if !conn.is_connected() {
            return Err(McpError::Connection(format!(
                "server '{id}' is not connected"
            )));
        }
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Tools of every connected server that advertises tools.
    pub async fn list_all_tools(&self, force_refresh: bool) -> Vec<ServerTool> {
        let connections = self.connected().await;
        let lists = join_all(connections.iter().map(|conn| async move {
            if !conn.client.supports(ServerCapabilityFlag::Tools) {
                return Vec::new();
            }
            settle(conn, "tools", conn.client.list_tools(force_refresh).await).unwrap_or_default()
        }))
        .await;
        connections
            .iter()
            .zip(lists)
            .flat_map(|(conn, tools)| {
                tools.into_iter().map(|tool| ServerTool {
                    server_id: conn.id().to_string(),
                    tool,
                })
            })
            .collect()
    }

    /// Resources of every connected server that advertises resources.
    pub async fn list_all_resources(&self, force_refresh: bool) -> Vec<ServerResource> {
        let connections = self.connected().await;
        let lists = join_all(connections.iter().map(|conn| async move {
            if !conn.client.supports(ServerCapabilityFlag::Resources) {
                return Vec::new();
            }
            settle(conn, "resources", conn.client.list_resources(force_refresh).await).unwrap_or_default()
        }))
        .await;
        connections
            .iter()
            .zip(lists)
            .flat_map(|(conn, resources)| {
                resources.into_iter().map(|resource| ServerResource {
                    server_id: conn.id().to_string(),
                    resource,
                })
            })
            .collect()
    }

    /// Prompts of every connected server that advertises prompts.
    pub async fn list_all_prompts(&self, force_refresh: bool) -> Vec<ServerPrompt> {
        let connections = self.connected().await;
        let lists = join_all(connections.iter().map(|conn| async move {
            if !conn.client.supports(ServerCapabilityFlag::Prompts) {
                return Vec::new();
            }
            settle(conn, "prompts", conn.client.list_prompts(force_refresh).await).unwrap_or_default()
        }))
        .await;
        connections
            .iter()
            .zip(lists)
            .flat_map(|(conn, prompts)| {
                prompts.into_iter().map(|prompt| ServerPrompt {
                    server_id: conn.id().to_string(),
                    prompt,
                })
            })
            .collect()
    }

    /// First tool named `name`, in registration order.
    pub async fn find_tool(&self, name: &str) -> Option<ServerTool> {
        self.list_all_tools(false)
            .await
            .into_iter()
            .find(|entry| entry.tool.name == name)
    }

    /// First resource with `uri`, in registration order.
    pub async fn find_resource(&self, uri: &str) -> Option<ServerResource> {
        self.list_all_resources(false)
            .await
            .into_iter()
            .find(|entry| entry.resource.uri == uri)
    }

    /// First prompt named `name`, in registration order.
    pub async fn find_prompt(&self, name: &str) -> Option<ServerPrompt> {
        self.list_all_prompts(false)
            .await
            .into_iter()
            .find(|entry| entry.prompt.name == name)
    }

    // -----------------------------------------------------------------------
    // Per-server operations
    // -----------------------------------------------------------------------

    /// Call a tool on a specific server.
    ///
    /// # Errors
    ///
    /// [`McpError::ServerNotFound`] for an unknown id,
    /// [`McpError::Connection`] if the server is not connected, otherwise
    /// whatever the server reports.
    pub async fn call_tool(&self, server_id: &str, name: &str, arguments: Value) -> Result<ToolResult> {
        let conn = self.ready(server_id).await?;
        conn.client.call_tool(name, arguments).await
    }

    /// Call a tool on whichever server exposes it first.
    ///
    /// # Errors
    ///
    /// [`McpError::Tool`] if no connected server exposes `name`.
    pub async fn call_tool_by_name(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let entry = self
            .find_tool(name)
            .await
            .ok_or_else(|| McpError::Tool(format!("no connected server exposes tool '{name}'")))?;
        self.call_tool(&entry.server_id, name, arguments).await
    }

    /// Read a resource from a specific server.
    pub async fn read_resource(&self, server_id: &str, uri: &str) -> Result<Vec<ResourceContents>> {
        let conn = self.ready(server_id).await?;
        conn.client.read_resource(uri).await
    }

    /// Render a prompt from a specific server.
    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<PromptResult> {
        let conn = self.ready(server_id).await?;
        conn.client.get_prompt(name, arguments).await
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Status of one server.
    ///
    /// Listings are fetched only for categories the server advertised.
    ///
    /// # Errors
    ///
    /// [`McpError::ServerNotFound`] if `id` is not registered.
    pub async fn get_server_status(&self, id: &str) -> Result<ServerStatus> {
        let conn = self
            .connection(id)
            .await
            .ok_or_else(|| McpError::ServerNotFound(id.to_string()))?;
        Ok(server_status(&conn).await)
    }

    /// Status of every registered server plus totals.
    pub async fn status(&self) -> SessionStatus {
        let connections: Vec<_> = self.connections.read().await.clone();
        let servers = join_all(connections.iter().map(|conn| server_status(conn))).await;
        let count = |f: fn(&ServerStatus) -> usize| servers.iter().map(f).sum::<usize>();
        SessionStatus {
            total_servers: servers.len(),
            connected_servers: servers.iter().filter(|s| s.connected).count(),
            total_tools: count(|s| s.tools.as_ref().map_or(0, Vec::len)),
            total_resources: count(|s| s.resources.as_ref().map_or(0, Vec::len)),
            total_prompts: count(|s| s.prompts.as_ref().map_or(0, Vec::len)),
            servers,
        }
    }
}

/// Items of a listing, or nothing (logged) if it failed.
fn settle<T>(conn: &ServerConnection, what: &str, result: Result<Vec<T>>) -> Option<Vec<T>> {
    match result {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!(server = %conn.id(), "failed to list {what}: {e}");
            None
        }
    }
}

async fn server_status(conn: &ServerConnection) -> ServerStatus {
    let session = conn.client.session();
    let connected = conn.is_connected();
    let mut tools = None;
    let mut resources = None;
    let mut prompts = None;
    // Never ask for a category the server did not advertise.
    if connected {
        if conn.client.supports(ServerCapabilityFlag::Tools) {
            tools = Some(
                settle(conn, "tools", conn.client.list_tools(false).await).unwrap_or_default(),
            );
        }
        if conn.client.supports(ServerCapabilityFlag::Resources) {
            resources = Some(
                settle(conn, "resources", conn.client.list_resources(false).await)
                    .unwrap_or_default(),
            );
        }
        if conn.client.supports(ServerCapabilityFlag::Prompts) {
            prompts = Some(
                settle(conn, "prompts", conn.client.list_prompts(false).await)
                    .unwrap_or_default(),
            );
        }
    }

    ServerStatus {
        id: conn.id().to_string(),
        source: conn.source.clone(),
        transport: conn.config().transport,
        connected,
        state: state_label(conn.client.state()).to_string(),
        protocol_version: session.as_ref().map(|s| s.protocol_version.clone()),
        server_info: session.as_ref().map(|s| s.server_info.clone()),
        capabilities: session.map(|s| s.capabilities),
        tools,
        resources,
        prompts,
        last_error: conn.last_error(),
    }
}
