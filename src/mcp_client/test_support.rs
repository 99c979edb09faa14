//! In-memory transport that answers the MCP handshake and tool requests
//! from a script, for tests that must not spawn processes or open sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::errors::McpError;
use super::manager::TransportFactory;
use super::transport::Transport;
use super::types::{error_codes, JsonRpcMessage, McpToolDefinition, RequestId};
use crate::registry::ServerConfig;

// ─── Stats ──────────────────────────────────────────────────────────────────

/// Counters and an ordered event log shared by every mock built from one
/// factory.
#[derive(Default)]
pub struct MockStats {
    connects: AtomicUsize,
    closes: AtomicUsize,
    events: Mutex<Vec<String>>,
    methods: Mutex<Vec<String>>,
}

impl MockStats {
    fn push_event(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// `connect-start:<name>`, `connect-end:<name>`, `close:<name>` in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, name: &str) -> Vec<String> {
        let suffix = format!(":{name}");
        self.events()
            .into_iter()
            .filter(|e| e.ends_with(&suffix))
            .collect()
    }

    /// Methods sent over any mock, in order.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn count_method(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }
}

// ─── Behavior ───────────────────────────────────────────────────────────────

/// Scripted server behavior.
///
/// Tool calls succeed with `"<server>/<tool> ok"`, except `explode` (which
/// returns `isError: true` with text `boom`) and `crash` (which returns a
/// JSON-RPC internal error). Unknown tool names get `-32602`.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub tools: Vec<McpToolDefinition>,
    pub page_size: Option<usize>,
    pub fail_connect: bool,
    pub connect_delay: Option<Duration>,
    pub no_tools_method: bool,
}

impl MockBehavior {
    pub fn with_tools(tools: Vec<McpToolDefinition>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn without_tools_method(mut self) -> Self {
        self.no_tools_method = true;
        self
    }
}

// ─── Transport ──────────────────────────────────────────────────────────────

pub struct MockTransport {
    name: String,
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    connected: bool,
    inbox: VecDeque<JsonRpcMessage>,
}

impl MockTransport {
    pub fn new(name: &str, behavior: MockBehavior, stats: Arc<MockStats>) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            stats,
            connected: false,
            inbox: VecDeque::new(),
        }
    }

    fn respond(&mut self, id: RequestId, method: &str, params: Option<&serde_json::Value>) {
        let reply = match method {
            "initialize" => JsonRpcMessage::response(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": format!("mock-{}", self.name), "version": "0.0.0" }
                }),
            ),
            "tools/list" if self.behavior.no_tools_method => {
                JsonRpcMessage::error_response(id, error_codes::METHOD_NOT_FOUND, "Method not found")
            }
            "tools/list" => {
                let total = self.behavior.tools.len();
                let start = params
                    .and_then(|p| p.get("cursor"))
                    .and_then(|c| c.as_str())
                    .and_then(|c| c.parse::<usize>().ok())
                    .unwrap_or(0)
                    .min(total);
                let end = self
                    .behavior
                    .page_size
                    .map(|size| (start + size).min(total))
                    .unwrap_or(total);
                let mut result = json!({ "tools": &self.behavior.tools[start..end] });
                if end < total {
                    result["nextCursor"] = json!(end.to_string());
                }
                JsonRpcMessage::response(id, result)
            }
            "tools/call" => {
                let tool = params
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                // progress chatter the client has to skip
                self.inbox.push_back(JsonRpcMessage::notification(
                    "notifications/progress",
                    Some(json!({ "progress": 0.5 })),
                ));
                if !self.behavior.tools.iter().any(|t| t.name == tool) {
                    JsonRpcMessage::error_response(
                        id,
                        error_codes::INVALID_PARAMS,
                        &format!("Unknown tool: {tool}"),
                    )
                } else if tool == "explode" {
                    JsonRpcMessage::response(
                        id,
                        json!({ "content": [{ "type": "text", "text": "boom" }], "isError": true }),
                    )
                } else if tool == "crash" {
                    JsonRpcMessage::error_response(id, error_codes::INTERNAL_ERROR, "internal failure")
                } else {
                    JsonRpcMessage::response(
                        id,
                        json!({
                            "content": [{ "type": "text", "text": format!("{}/{tool} ok", self.name) }]
                        }),
                    )
                }
            }
            _ => JsonRpcMessage::error_response(id, error_codes::METHOD_NOT_FOUND, "Method not found"),
        };
        self.inbox.push_back(reply);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        self.stats.push_event(format!("connect-start:{}", self.name));

        if let Some(delay) = self.behavior.connect_delay {
            tokio::time::sleep(delay).await;
        }

        self.stats.push_event(format!("connect-end:{}", self.name));

        if self.behavior.fail_connect {
            return Err(McpError::ConnectionFailed {
                server: self.name.clone(),
                reason: "scripted connect failure".into(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), McpError> {
        if !self.connected {
            return Err(McpError::NotConnected {
                server: self.name.clone(),
            });
        }
        let method = message.method.clone().unwrap_or_default();
        if let Ok(mut methods) = self.stats.methods.lock() {
            methods.push(method.clone());
        }
        if let Some(id) = message.id.clone() {
            self.respond(id, &method, message.params.as_ref());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<JsonRpcMessage, McpError> {
        self.inbox.pop_front().ok_or_else(|| McpError::Transport {
            server: self.name.clone(),
            reason: "no message queued".into(),
        })
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.stats.push_event(format!("close:{}", self.name));
        self.connected = false;
        self.inbox.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ─── Factory ────────────────────────────────────────────────────────────────

/// Builds [`MockTransport`]s with per-server behavior.
#[derive(Default)]
pub struct MockTransportFactory {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    pub stats: Arc<MockStats>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, name: &str, behavior: MockBehavior) {
        if let Ok(mut behaviors) = self.behaviors.lock() {
            behaviors.insert(name.to_string(), behavior);
        }
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, config: &ServerConfig) -> Box<dyn Transport> {
        let behavior = self
            .behaviors
            .lock()
            .ok()
            .and_then(|b| b.get(&config.name).cloned())
            .unwrap_or_default();
        Box::new(MockTransport::new(&config.name, behavior, self.stats.clone()))
    }
}
