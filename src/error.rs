//! Error types for mcplex
//!
//! This module defines the error taxonomy shared by the transports, the
//! protocol client, and the session manager, using `thiserror` for ergonomic
//! error handling.
//!
//! Remote JSON-RPC error objects are rehydrated into typed [`McpError`]
//! variants through a fixed code table (see [`error_kind_for_code`]), so a
//! caller can match on `McpError::MethodNotFound { .. }` instead of inspecting
//! raw numeric codes.

use std::time::Duration;

use thiserror::Error;

use crate::types::JsonRpcError;

/// JSON-RPC 2.0 reserved code: invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC 2.0 reserved code: the JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC 2.0 reserved code: the method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC 2.0 reserved code: invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC 2.0 reserved code: internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Protocol code: the peer could not be reached or the connection broke.
pub const CONNECTION_ERROR: i64 = -32000;
/// Protocol code: no response within the deadline.
pub const TIMEOUT_ERROR: i64 = -32001;
/// Protocol code: resource not found or unreadable.
pub const RESOURCE_ERROR: i64 = -32002;
/// Protocol code: operation requires a capability the peer never advertised.
pub const CAPABILITY_ERROR: i64 = -32003;
/// Protocol code: tool invocation failed.
pub const TOOL_ERROR: i64 = -32004;

/// Coarse classification of an [`McpError`].
///
/// Every numeric code in the registry maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport unreachable or broken.
    Connection,
    /// No response within the deadline.
    Timeout,
    /// Malformed message or failed handshake.
    Protocol,
    /// Peer-reported internal failure.
    Server,
    /// Peer could not parse what we sent.
    Parse,
    /// Peer rejected the request object.
    InvalidRequest,
    /// Peer does not implement the method.
    MethodNotFound,
    /// Peer rejected the request parameters.
    InvalidParams,
    /// Peer never advertised the capability.
    Capability,
    /// Resource-specific failure.
    Resource,
    /// Tool-specific failure.
    Tool,
}

/// The fixed code registry.
///
/// Codes not listed here are treated as [`ErrorKind::Server`].
const CODE_TABLE: &[(i64, ErrorKind)] = &[
    (PARSE_ERROR, ErrorKind::Parse),
    (INVALID_REQUEST, ErrorKind::InvalidRequest),
    (METHOD_NOT_FOUND, ErrorKind::MethodNotFound),
    (INVALID_PARAMS, ErrorKind::InvalidParams),
    (INTERNAL_ERROR, ErrorKind::Server),
    (CONNECTION_ERROR, ErrorKind::Connection),
    (TIMEOUT_ERROR, ErrorKind::Timeout),
    (RESOURCE_ERROR, ErrorKind::Resource),
    (CAPABILITY_ERROR, ErrorKind::Capability),
    (TOOL_ERROR, ErrorKind::Tool),
];

/// Look up the [`ErrorKind`] registered for a JSON-RPC error code.
///
/// # Examples
///
/// ```
/// use mcplex::error::{error_kind_for_code, ErrorKind};
///
/// assert_eq!(error_kind_for_code(-32601), ErrorKind::MethodNotFound);
/// assert_eq!(error_kind_for_code(-31999), ErrorKind::Server);
/// ```
pub fn error_kind_for_code(code: i64) -> ErrorKind {
    CODE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Server)
}

/// Canonical code for an [`ErrorKind`]; the inverse of [`error_kind_for_code`].
pub fn code_for_kind(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::Protocol => INVALID_REQUEST,
        ErrorKind::Server => INTERNAL_ERROR,
        other => CODE_TABLE
            .iter()
            .find(|(_, k)| *k == other)
            .map(|(c, _)| *c)
            .unwrap_or(INTERNAL_ERROR),
    }
}

/// Main error type for mcplex operations.
#[derive(Error, Debug)]
pub enum McpError {
    /// The transport is unreachable, closed, or failed mid-operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A request did not receive a response within its deadline.
    #[error("Request timed out after {timeout:?}: {method}")]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Malformed protocol traffic or a failed handshake.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer reported an internal failure.
    #[error("Server error {code}: {message}")]
    Server {
        /// Numeric code reported by the peer.
        code: i64,
        /// Message text reported by the peer.
        message: String,
        /// Optional structured detail.
        data: Option<serde_json::Value>,
    },

    /// The peer could not parse the message it received.
    #[error("Parse error: {message}")]
    Parse {
        /// Message text reported by the peer.
        message: String,
        /// Optional structured detail.
        data: Option<serde_json::Value>,
    },

    /// The peer rejected the request object.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Message text reported by the peer.
        message: String,
        /// Optional structured detail.
        data: Option<serde_json::Value>,
    },

    /// The peer does not implement the requested method.
    #[error("Method not found: {message}")]
    MethodNotFound {
        /// Message text reported by the peer.
        message: String,
        /// Optional structured detail.
        data: Option<serde_json::Value>,
    },

    /// The peer rejected the request parameters.
    #[error("Invalid params: {message}")]
    InvalidParams {
        /// Message text reported by the peer.
        message: String,
        /// Optional structured detail.
        data: Option<serde_json::Value>,
    },

    /// The operation needs a capability the server never advertised.
    #[error("Capability error: server '{server}' does not support {capability}")]
    Capability {
        /// Server (or client) name.
        server: String,
        /// Capability category, e.g. `"tools"`.
        capability: String,
    },

    /// Resource-specific failure.
    #[error("Resource error: {0}")]
    Resource(String),

    /// Tool-specific failure.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No server with the given id is registered.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl McpError {
    /// Rehydrate a remote JSON-RPC error object into a typed error.
    ///
    /// The server's message text is preserved verbatim.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcplex::error::McpError;
    /// use mcplex::types::JsonRpcError;
    ///
    /// let err = McpError::from_rpc_error(JsonRpcError::new(-32601, "no such tool"));
    /// assert!(matches!(err, McpError::MethodNotFound { ref message, .. } if message == "no such tool"));
    /// ```
    pub fn from_rpc_error(error: JsonRpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            data,
        } = error;
        match error_kind_for_code(code) {
            ErrorKind::Parse => McpError::Parse { message, data },
            ErrorKind::InvalidRequest => McpError::InvalidRequest { message, data },
            ErrorKind::MethodNotFound => McpError::MethodNotFound { message, data },
            ErrorKind::InvalidParams => McpError::InvalidParams { message, data },
            ErrorKind::Connection => McpError::Connection(message),
            ErrorKind::Timeout => McpError::Timeout {
                method: message,
                timeout: Duration::ZERO,
            },
            ErrorKind::Capability => McpError::Capability {
                server: data
                    .as_ref()
                    .and_then(|d| d.get("server"))
                    .and_then(|s| s.as_str())
                    .unwrap_or("remote")
                    .to_string(),
                capability: message,
            },
            ErrorKind::Resource => McpError::Resource(message),
            ErrorKind::Tool => McpError::Tool(message),
            ErrorKind::Protocol | ErrorKind::Server => McpError::Server {
                code,
                message,
                data,
            },
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Connection(_) | McpError::Io(_) => ErrorKind::Connection,
            McpError::Timeout { .. } => ErrorKind::Timeout,
            McpError::Protocol(_)
            | McpError::Serialization(_)
            | McpError::Config(_)
            | McpError::Yaml(_) => ErrorKind::Protocol,
            McpError::Server { .. } | McpError::ServerNotFound(_) => ErrorKind::Server,
            McpError::Parse { .. } => ErrorKind::Parse,
            McpError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            McpError::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            McpError::InvalidParams { .. } => ErrorKind::InvalidParams,
            McpError::Capability { .. } => ErrorKind::Capability,
            McpError::Resource(_) => ErrorKind::Resource,
            McpError::Tool(_) => ErrorKind::Tool,
        }
    }

    /// Numeric JSON-RPC code for this error.
    ///
    /// Server errors keep the code the peer reported.
    pub fn code(&self) -> i64 {
        match self {
            McpError::Server { code, .. } => *code,
            other => code_for_kind(other.kind()),
        }
    }

    /// Convert this error back into a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (message, data) = match self {
            McpError::Server { message, data, .. }
            | McpError::Parse { message, data }
            | McpError::InvalidRequest { message, data }
            | McpError::MethodNotFound { message, data }
            | McpError::InvalidParams { message, data } => (message.clone(), data.clone()),
            McpError::Capability { server, capability } => (
                capability.clone(),
                Some(serde_json::json!({ "server": server })),
            ),
            McpError::Connection(m) | McpError::Resource(m) | McpError::Tool(m) => {
                (m.clone(), None)
            }
            McpError::Timeout { method, .. } => (method.clone(), None),
            other => (other.to_string(), None),
        };
        JsonRpcError {
            code: self.code(),
            message,
            data,
        }
    }

    /// `true` for errors caused by the connection rather than the request.
    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}

/// Result type alias for mcplex operations
///
/// Library operations return the typed [`McpError`] so callers can match on
/// the failure kind; the binary wraps these in `anyhow` for context.
pub type Result<T> = std::result::Result<T, McpError>;
