//! Protocol client for a single downstream server.
//!
//! Owns one transport and runs the MCP handshake over it, caches the
//! server's tool list, and forwards tool calls with typed failures.

use std::time::Duration;

use futures::future::BoxFuture;

use super::errors::McpError;
use super::transport::{Transport, TransportHandle};
use super::types::{
    error_codes, InitializeParams, InitializeResult, JsonRpcMessage, McpToolDefinition, RequestId,
    ServerInfo, ToolCallResult, ToolsListResult,
};
use crate::registry::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for tool call execution.
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on `tools/list` pages followed for one refresh.
const MAX_TOOL_PAGES: usize = 100;

// ─── Connection State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// One protocol session with one server.
pub struct McpClient {
    config: ServerConfig,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    next_id: u64,
    server_info: Option<ServerInfo>,
    tool_cache: Option<Vec<McpToolDefinition>>,
    init_timeout: Duration,
    call_timeout: Duration,
}

impl McpClient {
    /// Client over the transport implied by the config's kind.
    pub fn new(config: ServerConfig) -> Self {
        let transport = Box::new(TransportHandle::from_config(&config));
        Self::with_transport(config, transport)
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(config: ServerConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            next_id: 1,
            server_info: None,
            tool_cache: None,
            init_timeout: INIT_TIMEOUT,
            call_timeout: CALL_TIMEOUT,
        }
    }

    pub fn set_init_timeout(&mut self, timeout: Duration) {
        self.init_timeout = timeout;
    }

    pub fn set_call_timeout(&mut self, timeout: Duration) {
        self.call_timeout = timeout;
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_connected()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Tools from the last successful `tools/list`, if any.
    pub fn cached_tools(&self) -> Option<&[McpToolDefinition]> {
        self.tool_cache.as_deref()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Open the transport and run the `initialize` handshake.
    ///
    /// On failure the transport is closed again and the client returns to
    /// `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        if self.state != ConnectionState::Disconnected {
            return Err(McpError::ConnectionFailed {
                server: self.config.name.clone(),
                reason: format!("cannot connect while {:?}", self.state),
            });
        }

        self.state = ConnectionState::Connecting;
        let timeout = self.init_timeout;

        let outcome = match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: self.config.name.clone(),
                operation: "initialize".into(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(info) => {
                tracing::info!(
                    server = %self.config.name,
                    kind = %self.config.kind(),
                    remote = info.as_ref().and_then(|i| i.name.as_deref()).unwrap_or("unknown"),
                    "connected to server"
                );
                self.server_info = info;
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = self.transport.close().await {
                    tracing::debug!(server = %self.config.name, error = %close_err, "close after failed connect");
                }
                self.state = ConnectionState::Disconnected;
                Err(match e {
                    e @ (McpError::ConnectionFailed { .. } | McpError::Timeout { .. }) => e,
                    other => McpError::ConnectionFailed {
                        server: self.config.name.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    async fn handshake(&mut self) -> Result<Option<ServerInfo>, McpError> {
        self.transport.connect().await?;

        let params = serde_json::to_value(InitializeParams::default()).map_err(|e| {
            McpError::Protocol {
                server: self.config.name.clone(),
                reason: format!("failed to encode initialize params: {e}"),
            }
        })?;
        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                server: self.config.name.clone(),
                reason: format!("invalid initialize result: {e}"),
            })?;

        self.transport
            .send(&JsonRpcMessage::notification("notifications/initialized", None))
            .await?;

        Ok(init.server_info)
    }

    /// Close the transport and forget cached state. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::warn!(server = %self.config.name, error = %e, "error closing transport");
        }
        if self.state != ConnectionState::Disconnected {
            tracing::info!(server = %self.config.name, "disconnected from server");
        }
        self.state = ConnectionState::Disconnected;
        self.tool_cache = None;
        self.server_info = None;
    }

    /// Connect, run `f`, then disconnect whether or not `f` succeeded.
    pub async fn scoped<T, F>(mut self, f: F) -> Result<T, McpError>
    where
        F: for<'a> FnOnce(&'a mut McpClient) -> BoxFuture<'a, Result<T, McpError>>,
    {
        self.connect().await?;
        let result = f(&mut self).await;
        self.disconnect().await;
        result
    }

    // ─── Requests ────────────────────────────────────────────────────────

    fn ensure_connected(&self) -> Result<(), McpError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(McpError::NotConnected {
                server: self.config.name.clone(),
            })
        }
    }

    /// Send a request and read until the response with the same id arrives.
    ///
    /// Notifications, server-initiated requests and stale responses read
    /// along the way are skipped.
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        self.transport
            .send(&JsonRpcMessage::request(id.clone(), method, params))
            .await?;

        loop {
            let message = self.transport.receive().await?;
            if !message.is_response() || message.id.as_ref() != Some(&id) {
                tracing::trace!(
                    server = %self.config.name,
                    method = message.method.as_deref().unwrap_or(""),
                    "skipping unrelated message"
                );
                continue;
            }
            return message.into_result().map_err(|err| McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
    }

    /// List the server's tools.
    ///
    /// Returns the cache when `use_cache` is set and a cache exists;
    /// otherwise fetches every page and replaces the cache. Servers without
    /// a `tools/list` method report no tools.
    pub async fn list_tools(
        &mut self,
        use_cache: bool,
    ) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_connected()?;

        if use_cache {
            if let Some(tools) = &self.tool_cache {
                return Ok(tools.clone());
            }
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = match self.request("tools/list", params).await {
                Ok(result) => result,
                Err(McpError::Rpc { code, .. }) if code == error_codes::METHOD_NOT_FOUND => {
                    tracing::debug!(server = %self.config.name, "server has no tools/list");
                    break;
                }
                Err(e) => return Err(e),
            };

            let page: ToolsListResult =
                serde_json::from_value(result).map_err(|e| McpError::Protocol {
                    server: self.config.name.clone(),
                    reason: format!("invalid tools/list result: {e}"),
                })?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(server = %self.config.name, count = tools.len(), "refreshed tool list");
        self.tool_cache = Some(tools.clone());
        Ok(tools)
    }

    /// Invoke a tool on this server.
    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        self.ensure_connected()?;

        if let Some(cache) = &self.tool_cache {
            if !cache.iter().any(|t| t.name == tool) {
                return Err(self.tool_not_found(tool));
            }
        }

        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let timeout = self.call_timeout;

        let response = tokio::time::timeout(timeout, self.request("tools/call", Some(params)))
            .await
            .map_err(|_| McpError::Timeout {
                server: self.config.name.clone(),
                operation: format!("tools/call '{tool}'"),
                timeout_ms: timeout.as_millis() as u64,
            })?;

        let value = match response {
            Ok(value) => value,
            Err(McpError::Rpc { code, message })
                if (code == error_codes::METHOD_NOT_FOUND
                    || code == error_codes::INVALID_PARAMS)
                    && mentions_unknown_tool(&message, tool) =>
            {
                return Err(self.tool_not_found(tool));
            }
            Err(McpError::Rpc { code, message }) => {
                return Err(McpError::ToolInvocation {
                    server: self.config.name.clone(),
                    tool: tool.to_string(),
                    reason: format!("[{code}] {message}"),
                });
            }
            Err(e) => return Err(e),
        };

        let result: ToolCallResult =
            serde_json::from_value(value).map_err(|e| McpError::Protocol {
                server: self.config.name.clone(),
                reason: format!("invalid tools/call result: {e}"),
            })?;

        if result.is_error {
            let text = result.text();
            return Err(McpError::ToolInvocation {
                server: self.config.name.clone(),
                tool: tool.to_string(),
                reason: if text.is_empty() {
                    "tool reported an error".into()
                } else {
                    text
                },
            });
        }

        Ok(result)
    }

    fn tool_not_found(&self, tool: &str) -> McpError {
        McpError::ToolNotFound {
            server: self.config.name.clone(),
            tool: tool.to_string(),
        }
    }
}

/// Whether a provider error message says the tool itself is unknown, as
/// opposed to the arguments being wrong.
fn mentions_unknown_tool(message: &str, tool: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains(&tool.to_lowercase())
        && (lower.contains("unknown") || lower.contains("not found") || lower.contains("no such"))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
