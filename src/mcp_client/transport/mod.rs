//! Transports carrying JSON-RPC messages to a downstream server.
//!
//! - [`StdioTransport`]: child process, one JSON object per line on
//!   stdin/stdout.
//! - [`HttpTransport`]: HTTP POST per message; responses come back as a JSON
//!   body or as SSE `data:` events.
//!
//! [`TransportHandle`] picks one of the two from a [`ServerConfig`].

pub mod http;
pub mod stdio;

use async_trait::async_trait;

use super::errors::McpError;
use super::types::JsonRpcMessage;
use crate::registry::{ServerConfig, ServerEndpoint, ServerKind};

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// Bidirectional message channel to one server.
///
/// `send` and `receive` are independent: the client writes a request and
/// then reads messages until the matching response arrives.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel. Calling it on an open transport is an error.
    async fn connect(&mut self) -> Result<(), McpError>;

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), McpError>;

    /// Next inbound message, in arrival order.
    async fn receive(&mut self) -> Result<JsonRpcMessage, McpError>;

    /// Release the channel. Safe to call more than once.
    async fn close(&mut self) -> Result<(), McpError>;

    fn is_connected(&self) -> bool;
}

/// Concrete transport chosen by server kind.
pub enum TransportHandle {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl TransportHandle {
    pub fn from_config(config: &ServerConfig) -> Self {
        match &config.endpoint {
            ServerEndpoint::Stdio(endpoint) => {
                TransportHandle::Stdio(StdioTransport::new(&config.name, endpoint.clone()))
            }
            ServerEndpoint::Http(endpoint) => {
                TransportHandle::Http(HttpTransport::new(&config.name, endpoint.clone()))
            }
        }
    }

    pub fn kind(&self) -> ServerKind {
        match self {
            TransportHandle::Stdio(_) => ServerKind::Stdio,
            TransportHandle::Http(_) => ServerKind::Http,
        }
    }
}

#[async_trait]
impl Transport for TransportHandle {
    async fn connect(&mut self) -> Result<(), McpError> {
        match self {
            TransportHandle::Stdio(t) => t.connect().await,
            TransportHandle::Http(t) => t.connect().await,
        }
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), McpError> {
        match self {
            TransportHandle::Stdio(t) => t.send(message).await,
            TransportHandle::Http(t) => t.send(message).await,
        }
    }

    async fn receive(&mut self) -> Result<JsonRpcMessage, McpError> {
        match self {
            TransportHandle::Stdio(t) => t.receive().await,
            TransportHandle::Http(t) => t.receive().await,
        }
    }

    async fn close(&mut self) -> Result<(), McpError> {
        match self {
            TransportHandle::Stdio(t) => t.close().await,
            TransportHandle::Http(t) => t.close().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            TransportHandle::Stdio(t) => t.is_connected(),
            TransportHandle::Http(t) => t.is_connected(),
        }
    }
}
