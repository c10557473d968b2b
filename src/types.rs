//! MCP protocol types and JSON-RPC 2.0 envelopes
//!
//! This module defines the wire model used by every other layer:
//!
//! - [`Envelope`] -- the closed union of request, response, and notification
//!   messages. Its kind is decided exactly once, when the JSON object is
//!   deserialized, and carried forward as the enum discriminant.
//! - Identity and capability structures exchanged during the handshake.
//! - Tool, resource, and prompt payloads.
//!
//! Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`. `Option<>` fields omit their key from
//! JSON when `None`.

use std::collections::HashMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// JSON-RPC version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// The most recent supported MCP protocol revision.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// All protocol versions that this client accepts during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, "2025-06-18", "2025-03-26", "2024-11-05"];

// ---------------------------------------------------------------------------
// Method and notification constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends this notification after the server ACKs.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
/// Keepalive ping.
pub const METHOD_PING: &str = "ping";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Request a page of available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read the contents of a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Request a page of available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Retrieve a rendered prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";

/// Server notifies that the tool list has changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Server notifies that the resource list has changed.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// Server notifies that the prompt list has changed.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// Server emits a log message.
pub const NOTIF_MESSAGE: &str = "notifications/message";
/// Progress on a long-running operation.
pub const NOTIF_PROGRESS: &str = "notifications/progress";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 envelopes
// ---------------------------------------------------------------------------

/// A request correlation identifier.
///
/// The client always issues string ids; numeric ids are accepted from peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A JSON-RPC 2.0 request object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"` for envelopes we build.
    pub jsonrpc: String,
    /// Request correlation identifier.
    pub id: RequestId,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present. `id` is `None` only for
/// errors the peer could not attribute to a request (e.g. parse errors).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    pub id: Option<RequestId>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 notification (a request with no `id`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcNotification {
    /// Protocol version identifier.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Optional notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use mcplex::types::JsonRpcError;
///
/// let e = JsonRpcError::new(-32600, "Invalid Request");
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or this protocol.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build an error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Any message exchanged over a transport.
///
/// Deserialization classifies the object once:
///
/// | `id` (non-null) | `method` | `result`/`error` | kind         |
/// |-----------------|----------|------------------|--------------|
/// | yes             | yes      | --               | Request      |
/// | --              | yes      | --               | Notification |
/// | any             | no       | yes              | Response     |
///
/// Anything else is rejected as malformed.
///
/// # Examples
///
/// ```
/// use mcplex::types::Envelope;
///
/// let env: Envelope = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
/// assert!(matches!(env, Envelope::Notification(_)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A call expecting a response.
    Request(JsonRpcRequest),
    /// The answer to a request.
    Response(JsonRpcResponse),
    /// A one-way message.
    Notification(JsonRpcNotification),
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build a successful response envelope.
    pub fn response(id: impl Into<RequestId>, result: Value) -> Self {
        Envelope::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        })
    }

    /// Build an error response envelope.
    pub fn error_response(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Envelope::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        })
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        })
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }

    /// Classify a parsed JSON value.
    ///
    /// `null` members are kept as `Some(Value::Null)` so that re-serializing
    /// yields the same object.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the value is not an object
    /// or matches none of the three envelope shapes.
    pub fn from_value(value: Value) -> std::result::Result<Self, String> {
        let Value::Object(mut obj) = value else {
            return Err("envelope must be a JSON object".to_string());
        };

        let jsonrpc = match obj.remove("jsonrpc") {
            Some(Value::String(s)) => s,
            Some(other) => return Err(format!("invalid jsonrpc field: {other}")),
            None => return Err("missing jsonrpc field".to_string()),
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw.clone())
                    .map_err(|_| format!("invalid id: {raw}"))?,
            ),
        };

        let method = match obj.remove("method") {
            Some(Value::String(m)) => Some(m),
            Some(other) => return Err(format!("invalid method field: {other}")),
            None => None,
        };

        let params = obj.remove("params");

        match (id, method) {
            (Some(id), Some(method)) => Ok(Envelope::Request(JsonRpcRequest {
                jsonrpc,
                id,
                method,
                params,
            })),
            (None, Some(method)) => Ok(Envelope::Notification(JsonRpcNotification {
                jsonrpc,
                method,
                params,
            })),
            (id, None) => {
                let result = obj.remove("result");
                let error = match obj.remove("error") {
                    Some(raw) => Some(
                        serde_json::from_value::<JsonRpcError>(raw.clone())
                            .map_err(|_| format!("malformed error object: {raw}"))?,
                    ),
                    None => None,
                };
                match (&result, &error) {
                    (Some(_), Some(_)) => Err("response carries both result and error".to_string()),
                    (None, None) => Err("message has neither method nor result/error".to_string()),
                    _ => Ok(Envelope::Response(JsonRpcResponse {
                        jsonrpc,
                        id,
                        result,
                        error,
                    })),
                }
            }
        }
    }

    /// Convert into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Request(r) => serde_json::to_value(r),
            Envelope::Response(r) => serde_json::to_value(r),
            Envelope::Notification(n) => serde_json::to_value(n),
        }
        .unwrap_or(Value::Null)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Envelope::Request(r) => r.serialize(serializer),
            Envelope::Response(r) => r.serialize(serializer),
            Envelope::Notification(n) => n.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Envelope::from_value(value).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Identity and capabilities
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl Implementation {
    /// Identity of this crate.
    pub fn mcplex() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capabilities a client advertises to a server.
///
/// This client serves no server-initiated requests, so the default is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    /// Filesystem root capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    /// LLM sampling capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Capabilities a server advertises to a client.
///
/// Each category is present (possibly as `{}`) when supported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    /// Server supports `logging/setLevel` and log notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    /// Server supports `completion/complete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<Value>,
    /// Server exposes prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    /// Server exposes resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Server exposes tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

/// A capability category a server may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerCapabilityFlag {
    /// `tools/list` and `tools/call`.
    Tools,
    /// `resources/list` and `resources/read`.
    Resources,
    /// `prompts/list` and `prompts/get`.
    Prompts,
    /// Log notifications.
    Logging,
}

impl ServerCapabilityFlag {
    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerCapabilityFlag::Tools => "tools",
            ServerCapabilityFlag::Resources => "resources",
            ServerCapabilityFlag::Prompts => "prompts",
            ServerCapabilityFlag::Logging => "logging",
        }
    }
}

impl fmt::Display for ServerCapabilityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerCapabilities {
    /// Whether the server advertised `flag`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcplex::types::{ServerCapabilities, ServerCapabilityFlag};
    ///
    /// let caps: ServerCapabilities = serde_json::from_str(r#"{"tools":{}}"#).unwrap();
    /// assert!(caps.supports(ServerCapabilityFlag::Tools));
    /// assert!(!caps.supports(ServerCapabilityFlag::Prompts));
    /// ```
    pub fn supports(&self, flag: ServerCapabilityFlag) -> bool {
        match flag {
            ServerCapabilityFlag::Tools => self.tools.is_some(),
            ServerCapabilityFlag::Resources => self.resources.is_some(),
            ServerCapabilityFlag::Prompts => self.prompts.is_some(),
            ServerCapabilityFlag::Logging => self.logging.is_some(),
        }
    }
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    pub capabilities: ClientCapabilities,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Response returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Information identifying this server implementation.
    pub server_info: Implementation,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// A single content block returned by a tool or carried in a prompt message.
///
/// Discriminated by the `"type"` field on the wire.
///
/// # Examples
///
/// ```
/// use mcplex::types::Content;
///
/// let c = Content::Text { text: "hello".to_string() };
/// let json = serde_json::to_value(&c).unwrap();
/// assert_eq!(json["type"], "text");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// A base64-encoded audio clip.
    Audio {
        /// Base64-encoded audio bytes.
        data: String,
        /// MIME type of the audio.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
}

impl Content {
    /// Text of a `Text` block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique name of the tool within the server.
    pub name: String,
    /// Human-readable description of the tool's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// Behavioral hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A request to invoke a tool; the `params` of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// The outcome of a tool invocation.
///
/// `is_error` is the tool's own failure signal; it is returned as data, not
/// raised, so the caller can show the content to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// The content items produced by the tool.
    #[serde(default)]
    pub content: Vec<Content>,
    /// When `true`, the tool signalled an error within its content.
    #[serde(default)]
    pub is_error: bool,
    /// Structured output matching the tool's output schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolResult {
    /// Concatenate all text blocks, newline separated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Tools in this page of results.
    pub tools: Vec<Tool>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Text-based resource contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    /// URI that identifies this resource.
    pub uri: String,
    /// MIME type of the text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The text content.
    pub text: String,
}

/// Binary resource contents, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    /// URI that identifies this resource.
    pub uri: String,
    /// MIME type of the binary data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded binary data.
    pub blob: String,
}

/// Either text or binary resource contents.
///
/// The discriminator is the presence of `"text"` vs `"blob"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    /// UTF-8 text resource.
    Text(TextResourceContents),
    /// Binary resource.
    Blob(BlobResourceContents),
}

impl ResourceContents {
    /// URI of the contents.
    pub fn uri(&self) -> &str {
        match self {
            ResourceContents::Text(t) => &t.uri,
            ResourceContents::Blob(b) => &b.uri,
        }
    }

    /// MIME type, if the server supplied one.
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            ResourceContents::Text(t) => t.mime_type.as_deref(),
            ResourceContents::Blob(b) => b.mime_type.as_deref(),
        }
    }
}

/// Metadata describing a resource exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// URI for this resource.
    pub uri: String,
    /// Human-readable resource name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Response to a `resources/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Resources in this page.
    pub resources: Vec<Resource>,
    /// Opaque cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Response to a `resources/read` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceResult {
    /// One or more content objects for the resource.
    pub contents: Vec<ResourceContents>,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The AI assistant.
    Assistant,
}

/// Describes a single argument accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// What this argument controls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When `true`, the caller must supply this argument.
    #[serde(default)]
    pub required: bool,
}

/// Metadata describing a prompt template exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Unique name of this prompt.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument descriptors for this template.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Response to a `prompts/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Prompts in this page.
    pub prompts: Vec<Prompt>,
    /// Opaque cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptParams {
    /// Name of the prompt to retrieve.
    pub name: String,
    /// Template argument substitutions.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub arguments: HashMap<String, String>,
}

/// A single message in a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    /// Who authored this message.
    pub role: Role,
    /// The message body.
    pub content: Content,
}

/// Response to a `prompts/get` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// What this prompt does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The rendered prompt messages.
    pub messages: Vec<PromptMessage>,
}

/// Generic paginated request parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Opaque cursor from a previous paged response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
