//! In-process fake transport for unit tests
//!
//! [`FakeTransport::new`] returns a transport plus a [`FakeTransportHandle`]:
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx ----------------> inbound_rx  (client receive())
//! ```
//!
//! [`FakeServer`] drives a handle with scripted MCP behaviour (handshake,
//! paginated listings, an `echo` tool, a tool that never answers) and counts
//! the requests it saw, so caching and timeout behaviour can be asserted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{McpError, Result};
use crate::transport::Transport;
use crate::types::{
    Envelope, JsonRpcError, JsonRpcRequest, Prompt, Resource, Tool, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// In-process fake transport.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    connected: AtomicBool,
    refuse_connect: bool,
}

/// Test side of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Envelopes the client sent.
    pub outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    /// Envelopes the client will receive. Dropping this ends the stream.
    pub inbound_tx: mpsc::UnboundedSender<Envelope>,
}

impl FakeTransport {
    /// Create a connected-on-demand transport and its handle.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                connected: AtomicBool::new(false),
                refuse_connect: false,
            },
            FakeTransportHandle {
                outbound_rx,
                inbound_tx,
            },
        )
    }

    /// A transport whose `connect()` always fails.
    pub fn unreachable() -> Self {
        let (transport, _handle) = Self::new();
        Self {
            refuse_connect: true,
            ..transport
        }
    }

    /// A transport answered by `server`, plus a sender for injecting
    /// unsolicited envelopes (notifications, stray responses).
    pub fn with_server(server: FakeServer) -> (Arc<Self>, mpsc::UnboundedSender<Envelope>) {
        let (transport, handle) = Self::new();
        let injector = handle.inbound_tx.clone();
        server.spawn(handle);
        (Arc::new(transport), injector)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        if self.refuse_connect {
            return Err(McpError::Connection("fake server unreachable".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Connection("fake transport is not connected".to_string()));
        }
        self.outbound_tx
            .send(envelope.clone())
            .map_err(|_| McpError::Connection("fake peer hung up".to_string()))
    }

    fn receive(&self) -> BoxStream<'static, Envelope> {
        match self.inbound_rx.lock().ok().and_then(|mut g| g.take()) {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Scripted MCP server behind a [`FakeTransportHandle`].
#[derive(Debug, Clone)]
pub struct FakeServer {
    /// Server name reported in `serverInfo`.
    pub name: String,
    /// Capabilities returned from `initialize`.
    pub capabilities: Value,
    /// Protocol version returned from `initialize`.
    pub protocol_version: String,
    /// Advertised tools.
    pub tools: Vec<Tool>,
    /// Advertised resources.
    pub resources: Vec<Resource>,
    /// Advertised prompts.
    pub prompts: Vec<Prompt>,
    /// Items per listing page; `None` returns everything at once.
    pub page_size: Option<usize>,
    /// Drop the `initialize` request without replying.
    pub silent_initialize: bool,
    /// Stop serving (closing the inbound stream) when this method arrives.
    pub hang_up_on: Option<String>,
    seen: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeServer {
    /// A server advertising tools, resources and prompts with one of each,
    /// plus the `slow` tool that never answers.
    pub fn new(name: &str) -> Self {
        let tools = vec![
            serde_json::from_value(json!({
                "name": "echo",
                "description": "Echo the message argument",
                "inputSchema": {"type": "object", "properties": {"message": {"type": "string"}}}
            })),
            serde_json::from_value(json!({"name": "slow", "description": "Never answers"})),
        ]
        .into_iter()
        .filter_map(|t| t.ok())
        .collect();
        let resources = vec![Resource {
            uri: format!("mem://{name}/readme"),
            name: "readme".to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        }];
        let prompts = vec![Prompt {
            name: "greet".to_string(),
            description: Some("Say hello".to_string()),
            arguments: Vec::new(),
        }];
        Self {
            name: name.to_string(),
            capabilities: json!({"tools": {"listChanged": true}, "resources": {}, "prompts": {}}),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            tools,
            resources,
            prompts,
            page_size: None,
            silent_initialize: false,
            hang_up_on: None,
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// How many times `method` was received.
    pub fn count(&self, method: &str) -> usize {
        self.seen
            .lock()
            .map(|seen| seen.get(method).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Serve `handle` until the client side goes away.
    pub fn spawn(self, mut handle: FakeTransportHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = handle.outbound_rx.recv().await {
                let method = match envelope.method() {
                    Some(m) => m.to_string(),
                    None => continue,
                };
                if let Ok(mut seen) = self.seen.lock() {
                    *seen.entry(method.clone()).or_insert(0) += 1;
                }
                if self.hang_up_on.as_deref() == Some(method.as_str()) {
                    break;
                }
                let Envelope::Request(request) = envelope else {
                    continue;
                };
                let reply = match self.answer(&request) {
                    Some(Ok(result)) => Envelope::response(request.id.clone(), result),
                    Some(Err(error)) => Envelope::error_response(Some(request.id.clone()), error),
                    None => continue,
                };
                if handle.inbound_tx.send(reply).is_err() {
                    break;
                }
            }
        })
    }

    fn page<T: serde::Serialize>(&self, items: &[T], params: &Option<Value>, key: &str) -> Value {
        let start = params
            .as_ref()
            .and_then(|p| p.get("cursor"))
            .and_then(|c| c.as_str())
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let size = self.page_size.unwrap_or(items.len().max(1));
        let end = (start + size).min(items.len());
        let mut body = serde_json::Map::new();
        body.insert(
            key.to_string(),
            serde_json::to_value(&items[start.min(end)..end]).unwrap_or_default(),
        );
        if end < items.len() {
            body.insert("nextCursor".to_string(), json!(end.to_string()));
        }
        Value::Object(body)
    }

    fn answer(&self, request: &JsonRpcRequest) -> Option<std::result::Result<Value, JsonRpcError>> {
        let params = &request.params;
        let reply = match request.method.as_str() {
            METHOD_INITIALIZE if self.silent_initialize => return None,
            METHOD_INITIALIZE => Ok(json!({
                "protocolVersion": self.protocol_version,
                "capabilities": self.capabilities,
                "serverInfo": {"name": self.name, "version": "0.0.1"}
            })),
            METHOD_PING => Ok(json!({})),
            METHOD_TOOLS_LIST => Ok(self.page(&self.tools, params, "tools")),
            METHOD_RESOURCES_LIST => Ok(self.page(&self.resources, params, "resources")),
            METHOD_PROMPTS_LIST => Ok(self.page(&self.prompts, params, "prompts")),
            METHOD_TOOLS_CALL => {
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                match name {
                    "echo" => {
                        let message = params
                            .as_ref()
                            .and_then(|p| p.pointer("/arguments/message"))
                            .and_then(|m| m.as_str())
                            .unwrap_or_default();
                        Ok(json!({"content": [{"type": "text", "text": message}]}))
                    }
                    "slow" => return None,
                    other => Err(JsonRpcError::new(-32601, format!("Unknown tool: {other}"))),
                }
            }
            METHOD_RESOURCES_READ => {
                let uri = params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(|u| u.as_str())
                    .unwrap_or_default();
                if self.resources.iter().any(|r| r.uri == uri) {
                    Ok(json!({"contents": [{"uri": uri, "mimeType": "text/plain", "text": format!("contents of {uri}")}]}))
                } else {
                    Err(JsonRpcError::new(-32002, format!("Resource not found: {uri}")))
                }
            }
            METHOD_PROMPTS_GET => Ok(json!({
                "description": "Say hello",
                "messages": [{"role": "user", "content": {"type": "text", "text": format!("hello from {}", self.name)}}]
            })),
            other => Err(JsonRpcError::new(-32601, format!("Method not found: {other}"))),
        };
        Some(reply)
    }
}
