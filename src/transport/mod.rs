//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every connection to an
//! MCP server goes through. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout pipes.
//! - [`sse::SseTransport`] -- POSTs outbound envelopes to a message endpoint
//!   and reads inbound envelopes from a streamed `text/event-stream` GET.
//! - `fake::FakeTransport` -- in-process fake used in tests (cfg(test) only).
//!
//! # Contract
//!
//! - `connect()` and `disconnect()` are idempotent. `disconnect()` releases
//!   every OS resource the transport acquired, on every exit path.
//! - `send()` fails with [`McpError::Connection`] when the transport is not
//!   connected or the underlying I/O fails.
//! - `receive()` hands out the inbound sequence for the current connection
//!   exactly once. The sequence is lazy, yields envelopes until the channel
//!   closes, and is never restarted; its end means the peer is gone.
//!
//! Malformed inbound lines are logged and dropped inside the transport; the
//! receive stream only ever carries well-formed [`Envelope`] values.

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::config::{ServerConfig, TransportKind};
use crate::error::{McpError, Result};
use crate::types::Envelope;

pub mod sse;
pub mod stdio;

#[cfg(test)]
pub mod fake;

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Establish the underlying channel (spawn the child, open the event stream).
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connection`] if the peer cannot be reached.
    async fn connect(&self) -> Result<()>;

    /// Tear the channel down. Calling this more than once is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Send one envelope to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connection`] if the transport is not connected or
    /// the write fails.
    async fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Take the inbound envelope sequence for this connection.
    ///
    /// A second call for the same connection yields an empty stream.
    fn receive(&self) -> BoxStream<'static, Envelope>;

    /// Whether the channel is currently up.
    fn is_connected(&self) -> bool;
}

/// Build an unconnected transport for a server record.
///
/// # Errors
///
/// Returns [`McpError::Config`] when the record lacks the fields its
/// transport kind needs.
///
/// # Examples
///
/// ```
/// use mcplex::config::ServerConfig;
/// use mcplex::transport::from_config;
///
/// let cfg = ServerConfig::stdio("cat", Vec::new());
/// let transport = from_config(&cfg).unwrap();
/// assert!(!transport.is_connected());
/// ```
pub fn from_config(config: &ServerConfig) -> Result<Arc<dyn Transport>> {
    match config.transport {
        TransportKind::Stdio => {
            let command = config
                .command
                .as_deref()
                .ok_or_else(|| McpError::Config("stdio server requires a command".to_string()))?;
            let transport = stdio::StdioTransport::new(command, config.args.clone())
                .with_env(config.env.clone())
                .with_cwd(config.cwd.clone());
            Ok(Arc::new(transport))
        }
        TransportKind::Sse => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| McpError::Config("sse server requires a url".to_string()))?;
            let mut transport = sse::SseTransport::new(url, config.request_timeout())?
                .with_headers(config.headers.clone());
            if let Some(message_url) = config.message_url.as_deref() {
                transport = transport.with_message_url(message_url)?;
            }
            Ok(Arc::new(transport))
        }
    }
}
