//! MCP Client: connections to downstream tool servers.
//!
//! This module handles:
//! - JSON-RPC 2.0 messages over stdio or HTTP transports
//! - The per-server protocol client (handshake, tool listing, tool calls)
//! - The client manager that reconciles live connections against the
//!   server registry

pub mod client;
pub mod errors;
pub mod manager;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use client::{ConnectionState, McpClient};
pub use errors::McpError;
pub use manager::{
    ClientManager, DefaultTransportFactory, ServerStatus, SharedClient, SyncReport,
    TransportFactory,
};
pub use transport::{HttpTransport, StdioTransport, Transport, TransportHandle};
pub use types::{JsonRpcMessage, McpContent, McpToolDefinition, ToolCallResult};
