//! mcplex - Model Context Protocol client library
//!
//! This library connects an application to one or more MCP servers and
//! exposes their tools, resources and prompts.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `transport`: Byte-stream transports (child-process stdio, HTTP/SSE)
//! - `types`: Protocol envelopes and MCP payload types
//! - `error`: Error taxonomy and the JSON-RPC error-code registry
//! - `client`: One server connection: handshake, correlation, dispatch, caching
//! - `manager`: Many named connections per user with failure isolation
//! - `config`: YAML configuration and validation
//! - `store`: Per-user server record stores
//! - `cli` and `commands`: The `mcplex` command-line interface
//!
//! # Example
//!
//! ```no_run
//! use mcplex::{Config, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("mcplex.yaml")?;
//!     config.validate()?;
//!
//!     let manager = SessionManager::from_config(&config);
//!     manager.initialize(None).await;
//!     let result = manager
//!         .call_tool_by_name("echo", serde_json::json!({"message": "hi"}))
//!         .await?;
//!     println!("{}", result.text());
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod manager;
pub mod store;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use client::{ClientOptions, ClientState, McpClient};
pub use config::{Config, ServerConfig, ServerRecord, TransportKind};
pub use error::{ErrorKind, McpError, Result};
pub use manager::{SessionManager, ServerStatus, SessionStatus};
pub use store::{MemoryConfigStore, ServerConfigStore, StaticConfigStore};
pub use transport::Transport;
