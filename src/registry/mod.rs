//! Server registry: declarative server definitions loaded from a JSON or
//! YAML file, plus a watcher that re-emits the full mapping on change.

pub mod config;
pub mod errors;
pub mod interpolate;
pub mod watcher;

pub use config::{
    load, parse_str, save, ConfigFormat, HttpEndpoint, RegistrySnapshot, ServerConfig,
    ServerEndpoint, ServerKind, StdioEndpoint,
};
pub use errors::ConfigError;
pub use watcher::{load_baseline, Baseline, ConfigWatcher, Fingerprint, WatchOptions};
