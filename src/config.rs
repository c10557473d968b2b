//! Configuration management for mcplex
//!
//! This module handles loading, parsing, and validating the YAML
//! configuration file and applying environment overrides.
//!
//! ```yaml
//! client:
//!   name: my-app
//!   request_timeout: 30
//! servers:
//!   - id: files
//!     transport: stdio
//!     command: mcp-server-files
//!     args: ["/srv/data"]
//!   - id: search
//!     transport: sse
//!     url: http://localhost:3000/sse
//!     retry_attempts: 5
//! users:
//!   alice:
//!     - id: notes
//!       command: notes-mcp
//! ```
//!
//! `servers` are the system defaults connected for every user; `users` holds
//! per-user records served by [`crate::store::StaticConfigStore`]. Record
//! order is preserved and is the order lookups search servers in.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientOptions;
use crate::error::{McpError, Result};
use crate::types::{ClientCapabilities, Implementation};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "MCPLEX_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Client identity and default deadlines
    #[serde(default)]
    pub client: ClientConfig,

    /// System-default servers, connected for every user
    #[serde(default)]
    pub servers: Vec<ServerRecord>,

    /// Per-user server records keyed by user id
    #[serde(default)]
    pub users: HashMap<String, Vec<ServerRecord>>,
}

/// Client identity and deadlines (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name sent as `clientInfo.name`
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Deadline for calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Deadline for each listing page
    #[serde(default = "default_list_timeout")]
    pub list_timeout: u64,

    /// Deadline for the handshake
    #[serde(default = "default_request_timeout")]
    pub init_timeout: u64,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_list_timeout() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            request_timeout: default_request_timeout(),
            list_timeout: default_list_timeout(),
            init_timeout: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// Client options carrying these settings.
    pub fn to_options(&self) -> ClientOptions {
        ClientOptions {
            client_info: Implementation {
                name: self.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ClientCapabilities::default(),
            request_timeout: Duration::from_secs(self.request_timeout),
            list_timeout: Duration::from_secs(self.list_timeout),
            init_timeout: Duration::from_secs(self.init_timeout),
        }
    }
}

/// How to reach a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process over stdin/stdout
    #[default]
    Stdio,
    /// HTTP POST plus server-sent events
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

/// Connection settings for one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport kind
    #[serde(default)]
    pub transport: TransportKind,

    /// Executable to spawn (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for `command` (stdio)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment overlaid on the inherited one (stdio)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Event stream URL (sse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Fixed POST endpoint (sse); derived from `url` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_url: Option<String>,

    /// Extra HTTP headers (sse)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Disabled servers are never connected
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Connect during session initialization
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Request deadline in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout: u64,

    /// Extra connection attempts after the first failure
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Seconds between connection attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

impl ServerConfig {
    fn base(transport: TransportKind) -> Self {
        Self {
            transport,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            message_url: None,
            headers: HashMap::new(),
            enabled: true,
            auto_start: true,
            timeout: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }

    /// A stdio server record with default settings.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::base(TransportKind::Stdio)
        }
    }

    /// An SSE server record with default settings.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::base(TransportKind::Sse)
        }
    }

    /// Request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Pause between connection attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    /// Validate this record.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] for a stdio record without a command, an
    /// SSE record without a parseable URL, a zero timeout, or a negative
    /// retry delay.
    pub fn validate(&self) -> Result<()> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(McpError::Config(
                        "stdio server requires a command".to_string(),
                    ));
                }
            }
            TransportKind::Sse => {
                let url = self
                    .url
                    .as_deref()
                    .ok_or_else(|| McpError::Config("sse server requires a url".to_string()))?;
                url::Url::parse(url)
                    .map_err(|e| McpError::Config(format!("invalid url `{url}`: {e}")))?;
                if let Some(message_url) = self.message_url.as_deref() {
                    url::Url::parse(message_url).map_err(|e| {
                        McpError::Config(format!("invalid message_url `{message_url}`: {e}"))
                    })?;
                }
            }
        }

        if self.timeout == 0 {
            return Err(McpError::Config("timeout must be greater than 0".to_string()));
        }
        if !self.retry_delay.is_finite() || self.retry_delay < 0.0 {
            return Err(McpError::Config(
                "retry_delay must be a non-negative number of seconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// A server configuration with its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Unique server id
    pub id: String,

    /// Connection settings
    #[serde(flatten)]
    pub config: ServerConfig,
}

impl ServerRecord {
    /// Pair an id with its settings.
    pub fn new(id: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| McpError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(name) = std::env::var("MCPLEX_CLIENT_NAME") {
            self.client.name = name;
        }

        if let Ok(timeout) = std::env::var("MCPLEX_REQUEST_TIMEOUT") {
            if let Ok(value) = timeout.parse() {
                self.client.request_timeout = value;
            } else {
                tracing::warn!("Invalid MCPLEX_REQUEST_TIMEOUT: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("MCPLEX_LIST_TIMEOUT") {
            if let Ok(value) = timeout.parse() {
                self.client.list_timeout = value;
            } else {
                tracing::warn!("Invalid MCPLEX_LIST_TIMEOUT: {}", timeout);
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] naming the first offending record.
    pub fn validate(&self) -> Result<()> {
        if self.client.name.trim().is_empty() {
            return Err(McpError::Config("client.name cannot be empty".to_string()));
        }
        if self.client.request_timeout == 0
            || self.client.list_timeout == 0
            || self.client.init_timeout == 0
        {
            return Err(McpError::Config(
                "client timeouts must be greater than 0".to_string(),
            ));
        }

        validate_records("servers", &self.servers)?;
        for (user, records) in &self.users {
            validate_records(&format!("users.{user}"), records)?;
        }
        Ok(())
    }

    /// Server records configured for `user`.
    pub fn user_servers(&self, user: &str) -> Vec<ServerRecord> {
        self.users.get(user).cloned().unwrap_or_default()
    }
}

fn validate_records(section: &str, records: &[ServerRecord]) -> Result<()> {
    let mut seen = HashSet::new();
    for record in records {
        if record.id.trim().is_empty() {
            return Err(McpError::Config(format!("{section}: server id cannot be empty")));
        }
        if !seen.insert(record.id.as_str()) {
            return Err(McpError::Config(format!(
                "{section}: duplicate server id '{}'",
                record.id
            )));
        }
        record.config.validate().map_err(|e| match e {
            McpError::Config(msg) => McpError::Config(format!("{section}.{}: {msg}", record.id)),
            other => other,
        })?;
    }
    Ok(())
}

/// Resolve the config file path
///
/// Precedence: the explicit path, then `MCPLEX_CONFIG`, then
/// `config.yaml` in the platform config directory, then `mcplex.yaml` in
/// the working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    directories::ProjectDirs::from("", "", "mcplex")
        .map(|dirs| dirs.config_dir().join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("mcplex.yaml"))
}
