//! JSON-RPC over a child process's stdio.
//!
//! One JSON object per line in both directions. Lines on stdout that are not
//! JSON (banners, stray prints) are skipped; stderr is drained into debug
//! logs so a chatty server never blocks on a full pipe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::Transport;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::JsonRpcMessage;
use crate::registry::StdioEndpoint;

/// Time allowed for the child to exit after stdin is closed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct StdioTransport {
    server: String,
    endpoint: StdioEndpoint,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioTransport {
    pub fn new(server: &str, endpoint: StdioEndpoint) -> Self {
        Self {
            server: server.to_string(),
            endpoint,
            child: None,
            stdin: None,
            stdout: None,
            stderr_task: None,
        }
    }

    fn transport_err(&self, reason: String) -> McpError {
        McpError::Transport {
            server: self.server.clone(),
            reason,
        }
    }

    fn spawn_failed(&self, reason: String) -> McpError {
        McpError::ConnectionFailed {
            server: self.server.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        if self.child.is_some() {
            return Err(self.spawn_failed("transport already connected".into()));
        }

        let mut cmd = Command::new(&self.endpoint.command);
        cmd.args(&self.endpoint.args);
        for (key, value) in &self.endpoint.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.endpoint.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            #[allow(unused_imports)]
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            self.spawn_failed(format!("failed to spawn '{}': {e}", self.endpoint.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.spawn_failed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_failed("failed to capture stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = self.server.clone();
            self.stderr_task = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if !line.is_empty() {
                                tracing::debug!(server = %server, line, "server stderr");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(server = %server, error = %e, "stderr read failed");
                            break;
                        }
                    }
                }
            }));
        }

        tracing::debug!(
            server = %self.server,
            command = %self.endpoint.command,
            pid = ?child.id(),
            "spawned server process"
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.transport_err(format!("failed to serialize message: {e}")))?;
        line.push('\n');

        let server = self.server.clone();
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(McpError::NotConnected { server })?;

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| self.transport_err(format!("failed to write to stdin: {e}")))
    }

    async fn receive(&mut self) -> Result<JsonRpcMessage, McpError> {
        let server = self.server.clone();
        let reader = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpError::NotConnected {
                server: server.clone(),
            })?;

        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await.map_err(|e| McpError::Transport {
                server: server.clone(),
                reason: format!("failed to read from stdout: {e}"),
            })?;

            if bytes_read == 0 {
                return Err(McpError::Transport {
                    server,
                    reason: "server stdout closed (process may have exited)".into(),
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                Ok(message) => return Ok(message),
                Err(_) => {
                    tracing::debug!(server = %server, line = trimmed, "skipping non-JSON stdout line");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), McpError> {
        // Dropping stdin signals EOF; well-behaved servers exit on their own.
        self.stdin = None;
        self.stdout = None;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server, %status, "server process exited");
                }
                _ => {
                    tracing::debug!(server = %self.server, "server did not exit, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server = %self.server, error = %e, "failed to kill server process");
                    }
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
