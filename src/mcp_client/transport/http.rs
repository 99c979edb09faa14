//! JSON-RPC over HTTP POST.
//!
//! Every outbound message is one POST. The server answers with either a JSON
//! body (a single message or a batch) or an SSE stream of `data:` events;
//! whatever comes back is queued and handed out by `receive`. The
//! `Mcp-Session-Id` header from the server is replayed on later requests and
//! used for a best-effort `DELETE` on close.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client as HttpClient;

use super::Transport;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::JsonRpcMessage;
use crate::registry::HttpEndpoint;

const SESSION_HEADER: &str = "mcp-session-id";

/// Timeout for establishing the TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpTransport {
    server: String,
    endpoint: HttpEndpoint,
    http: Option<HttpClient>,
    session_id: Option<String>,
    inbox: VecDeque<JsonRpcMessage>,
}

impl HttpTransport {
    pub fn new(server: &str, endpoint: HttpEndpoint) -> Self {
        Self {
            server: server.to_string(),
            endpoint,
            http: None,
            session_id: None,
            inbox: VecDeque::new(),
        }
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn transport_err(&self, reason: String) -> McpError {
        McpError::Transport {
            server: self.server.clone(),
            reason,
        }
    }

    fn default_headers(&self) -> Result<HeaderMap, McpError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.endpoint.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                McpError::ConnectionFailed {
                    server: self.server.clone(),
                    reason: format!("invalid header name '{key}': {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpError::ConnectionFailed {
                server: self.server.clone(),
                reason: format!("invalid value for header '{key}': {e}"),
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Read an SSE body until it ends or a response message has been seen.
    ///
    /// Streamable-HTTP servers may keep the stream open after answering, so
    /// waiting for EOF alone could hang.
    async fn drain_sse(&mut self, response: reqwest::Response) -> Result<(), McpError> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            while let Some(event_end) = buffer.find("\n\n") {
                let event = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();
                if let Some(message) = parse_sse_event(&self.server, &event) {
                    let done = message.is_response();
                    self.inbox.push_back(message);
                    if done {
                        return Ok(());
                    }
                }
            }

            match stream.next().await {
                Some(Ok(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n"));
                }
                Some(Err(e)) => {
                    return Err(self.transport_err(format!("SSE stream read error: {e}")));
                }
                None => {
                    if let Some(message) = parse_sse_event(&self.server, buffer.trim()) {
                        self.inbox.push_back(message);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn enqueue_json_body(&mut self, body: &str) -> Result<(), McpError> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(());
        }
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| self.transport_err(format!("invalid JSON response body: {e}")))?;

        let items = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };
        for item in items {
            let message: JsonRpcMessage = serde_json::from_value(item)
                .map_err(|e| self.transport_err(format!("invalid JSON-RPC message: {e}")))?;
            self.inbox.push_back(message);
        }
        Ok(())
    }
}

/// Parse one SSE event block. Multiple `data:` lines are concatenated;
/// comments, `event:` lines and keep-alives yield `None`.
pub(crate) fn parse_sse_event(server: &str, event: &str) -> Option<JsonRpcMessage> {
    let mut data = String::new();
    for line in event.lines() {
        if let Some(chunk) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            data.push_str(chunk.trim());
        }
    }
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<JsonRpcMessage>(&data) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(server, error = %e, "skipping unparseable SSE event");
            None
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        if self.http.is_some() {
            return Err(McpError::ConnectionFailed {
                server: self.server.clone(),
                reason: "transport already connected".into(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(self.default_headers()?)
            .build()
            .map_err(|e| McpError::ConnectionFailed {
                server: self.server.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        tracing::debug!(server = %self.server, url = %self.endpoint.url, "http transport ready");
        self.http = Some(http);
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), McpError> {
        let http = self.http.clone().ok_or_else(|| McpError::NotConnected {
            server: self.server.clone(),
        })?;

        let mut request = http
            .post(&self.endpoint.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(message);
        if let Some(session) = &self.session_id {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_err(format!("POST {} failed: {e}", self.endpoint.url)))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session) {
                tracing::debug!(server = %self.server, session, "http session established");
                self.session_id = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_err(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_sse {
            self.drain_sse(response).await
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| self.transport_err(format!("failed to read response body: {e}")))?;
            self.enqueue_json_body(&body)
        }
    }

    async fn receive(&mut self) -> Result<JsonRpcMessage, McpError> {
        if self.http.is_none() {
            return Err(McpError::NotConnected {
                server: self.server.clone(),
            });
        }
        self.inbox
            .pop_front()
            .ok_or_else(|| self.transport_err("no response pending from server".into()))
    }

    async fn close(&mut self) -> Result<(), McpError> {
        let http = self.http.take();
        self.inbox.clear();

        if let (Some(http), Some(session)) = (http, self.session_id.take()) {
            let result = http
                .delete(&self.endpoint.url)
                .header(SESSION_HEADER, &session)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(server = %self.server, error = %e, "session DELETE failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.http.is_some()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
