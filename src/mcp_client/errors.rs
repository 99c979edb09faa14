//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client and manager operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The transport could not be opened or the handshake failed.
    #[error("failed to connect to server '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// No active client exists under this name.
    #[error("server not found: '{name}'")]
    ServerNotFound { name: String },

    /// The server is present in the registry but disabled.
    #[error("server '{name}' is disabled")]
    ServerDisabled { name: String },

    /// An operation was attempted on a client that is not connected.
    #[error("server '{server}' is not connected")]
    NotConnected { server: String },

    /// The server does not expose the requested tool.
    #[error("tool '{tool}' not found on server '{server}'")]
    ToolNotFound { server: String, tool: String },

    /// The server ran the tool and reported a failure.
    #[error("tool '{tool}' on server '{server}' failed: {reason}")]
    ToolInvocation {
        server: String,
        tool: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    Rpc { code: i32, message: String },

    /// A request did not complete in time.
    #[error("{operation} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The server sent something that violates the protocol.
    #[error("protocol error from server '{server}': {reason}")]
    Protocol { server: String, reason: String },
}

impl McpError {
    /// Name of the server the error concerns, when known.
    pub fn server(&self) -> Option<&str> {
        match self {
            McpError::ConnectionFailed { server, .. }
            | McpError::Transport { server, .. }
            | McpError::NotConnected { server }
            | McpError::ToolNotFound { server, .. }
            | McpError::ToolInvocation { server, .. }
            | McpError::Timeout { server, .. }
            | McpError::Protocol { server, .. } => Some(server),
            McpError::ServerNotFound { name } | McpError::ServerDisabled { name } => Some(name),
            McpError::Rpc { .. } => None,
        }
    }
}
