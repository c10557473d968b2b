//! Stdio transport for child-process MCP servers
//!
//! [`StdioTransport`] spawns a child process and talks to it over its
//! stdin/stdout pipes using newline-delimited JSON framing.
//!
//! # Protocol
//!
//! - Outbound envelopes are written to the child's stdin as a single JSON
//!   object followed by `\n`.
//! - Inbound lines are read from the child's stdout by a background reader
//!   task, parsed into [`Envelope`] values, and queued for `receive()`.
//!   Lines that are not valid envelopes are logged and dropped.
//! - The child's stderr is drained by a second task and logged at `DEBUG`.
//!   It is diagnostic only and never treated as an error.
//!
//! # Lifecycle
//!
//! Nothing is spawned until [`Transport::connect`]. `disconnect()` closes
//! stdin, asks the child to exit (SIGTERM on Unix), waits up to the shutdown
//! timeout, and then kills it. Dropping a connected transport sends a
//! best-effort SIGTERM; the child is also spawned with `kill_on_drop`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{McpError, Result};
use crate::transport::Transport;
use crate::types::Envelope;

/// How long `disconnect()` waits for the child to exit after SIGTERM.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const LOG_TARGET: &str = "mcplex::transport::stdio";

/// Handles owned while the child is running.
#[derive(Debug)]
struct Running {
    child: Child,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

/// Stdio-based transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcplex::transport::stdio::StdioTransport;
/// use mcplex::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> mcplex::error::Result<()> {
/// let transport = StdioTransport::new(
///     "npx",
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
/// )
/// .with_env(HashMap::from([("LOG_LEVEL".to_string(), "warn".to_string())]));
/// transport.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    shutdown_timeout: Duration,
    /// Child process and background tasks; `None` while disconnected.
    running: Mutex<Option<Running>>,
    /// Child stdin. Kept apart from `running` so a blocked write never
    /// stalls `disconnect()`.
    stdin: Mutex<Option<ChildStdin>>,
    /// Inbound queue for the current connection, taken by `receive()`.
    inbound: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Describe a child process to spawn on `connect()`.
    ///
    /// The child inherits the parent environment; entries added with
    /// [`with_env`](Self::with_env) are overlaid on top.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            running: Mutex::new(None),
            stdin: Mutex::new(None),
            inbound: std::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Extra environment variables for the child.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Working directory for the child.
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Grace period between SIGTERM and a forced kill.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// OS process id of the running child.
    pub async fn pid(&self) -> Option<u32> {
        self.running.lock().await.as_ref().and_then(|r| r.child.id())
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            McpError::Connection(format!("failed to spawn MCP server `{}`: {}", self.command, e))
        })
    }
}

/// Drain child stdout into the inbound queue until EOF.
fn spawn_reader(
    stdout: ChildStdout,
    tx: mpsc::UnboundedSender<Envelope>,
    connected: Arc<AtomicBool>,
    command: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Envelope>(line) {
                        Ok(envelope) => {
                            if tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                target: LOG_TARGET,
                                command = %command,
                                "dropping malformed line from server: {e}"
                            );
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(target: LOG_TARGET, command = %command, "server stdout closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(target: LOG_TARGET, command = %command, "stdout read failed: {e}");
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
    })
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Spawn the child and start the reader and stderr tasks.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connection`] if the process cannot be spawned.
    async fn connect(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let mut child = self.spawn_child()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.start_kill();
            return Err(McpError::Connection(
                "child stdio pipes unavailable after spawn".to_string(),
            ));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.connected.store(true, Ordering::SeqCst);
        let reader = spawn_reader(stdout, tx, Arc::clone(&self.connected), self.command.clone());

        let command = self.command.clone();
        let stderr = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: LOG_TARGET, command = %command, "server stderr: {}", line);
            }
        });

        tracing::debug!(
            target: LOG_TARGET,
            command = %self.command,
            pid = ?child.id(),
            "spawned MCP server"
        );

        *self.stdin.lock().await = Some(stdin);
        if let Ok(mut inbound) = self.inbound.lock() {
            *inbound = Some(rx);
        }
        *running = Some(Running {
            child,
            reader,
            stderr,
        });
        Ok(())
    }

    /// Close stdin, SIGTERM the child, wait, then kill.
    async fn disconnect(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::SeqCst);

        // EOF on stdin lets a well-behaved server exit on its own.
        self.stdin.lock().await.take();

        #[cfg(unix)]
        {
            if let Some(pid) = running.child.id() {
                // SAFETY: pid was obtained from the live tokio::process::Child we own.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }

        match tokio::time::timeout(self.shutdown_timeout, running.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(target: LOG_TARGET, command = %self.command, %status, "server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(target: LOG_TARGET, command = %self.command, "waiting for server failed: {e}");
            }
            Err(_) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    command = %self.command,
                    "server ignored SIGTERM for {:?}; killing",
                    self.shutdown_timeout
                );
                if let Err(e) = running.child.kill().await {
                    tracing::warn!(target: LOG_TARGET, command = %self.command, "kill failed: {e}");
                }
            }
        }

        running.reader.abort();
        running.stderr.abort();
        if let Ok(mut inbound) = self.inbound.lock() {
            inbound.take();
        }
        Ok(())
    }

    /// Write one envelope as a JSON line to the child's stdin.
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::Connection("stdio transport is not connected".to_string()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Connection(format!("write to server stdin failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Connection(format!("flush of server stdin failed: {e}")))?;
        Ok(())
    }

    fn receive(&self) -> BoxStream<'static, Envelope> {
        let rx = self.inbound.lock().ok().and_then(|mut guard| guard.take());
        match rx {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => {
                tracing::warn!(
                    target: LOG_TARGET,
                    command = %self.command,
                    "receive() called without a fresh connection; returning empty stream"
                );
                stream::empty().boxed()
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    /// Best-effort SIGTERM for a child that was never disconnected.
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(running) = running.as_mut() {
                #[cfg(unix)]
                {
                    if let Some(pid) = running.child.id() {
                        // SAFETY: pid belongs to the child we still own.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = running.child.start_kill();
                }
                running.reader.abort();
                running.stderr.abort();
            }
        }
    }
}
