//! Registry error types.

use thiserror::Error;

/// Errors raised while loading, validating, or persisting the server registry.
///
/// A failed reload never partially applies: callers keep the previous
/// snapshot and log the error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("config I/O error for {path}: {reason}")]
    Io { path: String, reason: String },

    /// The document is not valid JSON/YAML or does not match the schema.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// A single server entry is incomplete or inconsistent.
    #[error("invalid server entry '{entry}': {reason}")]
    InvalidEntry { entry: String, reason: String },
}

impl ConfigError {
    /// Name of the offending server entry, if the error is entry-specific.
    pub fn entry(&self) -> Option<&str> {
        match self {
            ConfigError::InvalidEntry { entry, .. } => Some(entry),
            _ => None,
        }
    }
}
