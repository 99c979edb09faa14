//! Server definitions and registry snapshots.
//!
//! The configuration document looks like:
//!
//! ```yaml
//! servers:
//!   github:
//!     kind: stdio
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-github"]
//!     env: { GITHUB_TOKEN: "${GITHUB_TOKEN}" }
//!   crm:
//!     kind: http
//!     url: https://crm.internal/mcp
//!     headers: { Authorization: "Bearer ${CRM_TOKEN}" }
//!     enabled: false
//! ```
//!
//! JSON documents with the same shape (or the common `mcpServers` key) are
//! accepted when the file extension is `.json`.
//!
//! `${VAR}` placeholders are resolved per string value after parsing. The
//! entry as written is kept alongside the resolved config, so [`save`]
//! writes placeholders back instead of their values.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::interpolate::{expand_tilde, interpolate_env_vars};

// ─── Server Definitions ─────────────────────────────────────────────────────

/// How a downstream server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Spawned child process speaking JSON-RPC over stdio.
    #[serde(alias = "subprocess", alias = "process")]
    Stdio,
    /// Remote endpoint reached over HTTP (JSON or SSE responses).
    #[serde(alias = "network", alias = "sse", alias = "streamable_http")]
    Http,
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerKind::Stdio => f.write_str("stdio"),
            ServerKind::Http => f.write_str("http"),
        }
    }
}

/// Launch parameters for a subprocess server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioEndpoint {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory for the child process.
    pub cwd: Option<String>,
}

/// Connection parameters for a network server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// Kind-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEndpoint {
    Stdio(StdioEndpoint),
    Http(HttpEndpoint),
}

/// One validated downstream server definition.
///
/// Identity is `name`; `enabled` and the resolved endpoint take part in
/// equality so the client manager can tell "configuration changed" from
/// "same configuration".
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub enabled: bool,
    pub endpoint: ServerEndpoint,
    /// Entry as written in the file, placeholders unresolved. `None` for
    /// configs built in code.
    source: Option<RawServerEntry>,
}

impl PartialEq for ServerConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.enabled == other.enabled && self.endpoint == other.endpoint
    }
}

impl Eq for ServerConfig {}

impl ServerConfig {
    /// Build an enabled subprocess server definition.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            endpoint: ServerEndpoint::Stdio(StdioEndpoint {
                command: command.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                env: BTreeMap::new(),
                cwd: None,
            }),
            source: None,
        }
    }

    /// Build an enabled network server definition.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            endpoint: ServerEndpoint::Http(HttpEndpoint {
                url: url.to_string(),
                headers: BTreeMap::new(),
            }),
            source: None,
        }
    }

    /// Return a copy with `enabled` set.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> ServerKind {
        match self.endpoint {
            ServerEndpoint::Stdio(_) => ServerKind::Stdio,
            ServerEndpoint::Http(_) => ServerKind::Http,
        }
    }
}

// ─── Raw Document ───────────────────────────────────────────────────────────

/// On-disk shape of one server entry, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawServerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "type", alias = "transport")]
    kind: Option<ServerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Top-level configuration document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default, alias = "mcpServers")]
    servers: BTreeMap<String, RawServerEntry>,
}

impl RawServerEntry {
    /// Copy with `${VAR}` placeholders resolved in every string value and a
    /// leading `~` expanded in `command` and `cwd`.
    fn resolved(&self) -> Self {
        let interpolate_map = |map: &BTreeMap<String, String>| {
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_env_vars(v)))
                .collect()
        };
        Self {
            kind: self.kind,
            command: self
                .command
                .as_deref()
                .map(|c| expand_tilde(&interpolate_env_vars(c))),
            args: self.args.iter().map(|a| interpolate_env_vars(a)).collect(),
            env: interpolate_map(&self.env),
            cwd: self
                .cwd
                .as_deref()
                .map(|c| expand_tilde(&interpolate_env_vars(c))),
            url: self.url.as_deref().map(interpolate_env_vars),
            headers: interpolate_map(&self.headers),
            enabled: self.enabled,
        }
    }

    /// Resolve and validate this entry, keeping the unresolved entry as the
    /// config's source.
    fn into_config(self, name: &str) -> Result<ServerConfig, ConfigError> {
        let mut config = self.resolved().validate(name)?;
        config.source = Some(self);
        Ok(config)
    }

    /// Validate this entry into a `ServerConfig`.
    ///
    /// `stdio` entries require a non-empty `command`; `http` entries require
    /// an `http://` or `https://` URL. When `kind` is omitted it is inferred
    /// from the presence of `url`.
    fn validate(self, name: &str) -> Result<ServerConfig, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEntry {
            entry: name.to_string(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("server name must not be empty"));
        }
        // Tool ids are `server:tool`, split at the first ':'.
        if name.contains(':') {
            return Err(invalid("server name must not contain ':'"));
        }

        let kind = self.kind.unwrap_or(if self.url.is_some() {
            ServerKind::Http
        } else {
            ServerKind::Stdio
        });

        let endpoint = match kind {
            ServerKind::Stdio => {
                let command = self
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| invalid("stdio server requires 'command'"))?;
                ServerEndpoint::Stdio(StdioEndpoint {
                    command,
                    args: self.args,
                    env: self.env,
                    cwd: self.cwd,
                })
            }
            ServerKind::Http => {
                let url = self
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| invalid("http server requires 'url'"))?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid(&format!(
                        "url must start with http:// or https:// (got '{url}')"
                    )));
                }
                ServerEndpoint::Http(HttpEndpoint {
                    url,
                    headers: self.headers,
                })
            }
        };

        Ok(ServerConfig {
            name: name.to_string(),
            enabled: self.enabled,
            endpoint,
            source: None,
        })
    }

    /// Entry to persist for `config`: the original entry when it still
    /// resolves to the same endpoint, otherwise one rebuilt from the
    /// resolved values.
    fn for_save(config: &ServerConfig) -> Self {
        if let Some(source) = &config.source {
            let unchanged = source
                .resolved()
                .validate(&config.name)
                .is_ok_and(|resolved| resolved.endpoint == config.endpoint);
            if unchanged {
                return Self {
                    enabled: config.enabled,
                    ..source.clone()
                };
            }
        }
        Self::from_config(config)
    }

    fn from_config(config: &ServerConfig) -> Self {
        match &config.endpoint {
            ServerEndpoint::Stdio(stdio) => Self {
                kind: Some(ServerKind::Stdio),
                command: Some(stdio.command.clone()),
                args: stdio.args.clone(),
                env: stdio.env.clone(),
                cwd: stdio.cwd.clone(),
                enabled: config.enabled,
                ..Self::default()
            },
            ServerEndpoint::Http(http) => Self {
                kind: Some(ServerKind::Http),
                url: Some(http.url.clone()),
                headers: http.headers.clone(),
                enabled: config.enabled,
                ..Self::default()
            },
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Immutable `name → ServerConfig` mapping: the desired state at one point
/// in time. Cloning is cheap; reloads produce a new snapshot instead of
/// mutating an existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    servers: Arc<BTreeMap<String, ServerConfig>>,
}

impl RegistrySnapshot {
    /// Build a snapshot from already-validated configs, keyed by their names.
    pub fn from_configs(configs: impl IntoIterator<Item = ServerConfig>) -> Self {
        let servers = configs
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self {
            servers: Arc::new(servers),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// Whether `name` is present and enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.servers.get(name).is_some_and(|c| c.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.values()
    }

    /// Enabled servers only, in name order.
    pub fn enabled(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.values().filter(|c| c.enabled)
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

// ─── Loading & Persisting ───────────────────────────────────────────────────

/// Serialization format of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Pick the format from the file extension. Anything other than `.json`
    /// is read as YAML, which also accepts JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Load and validate the registry file at `path`.
pub fn load(path: &Path) -> Result<RegistrySnapshot, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_str(&raw, ConfigFormat::from_path(path), &path.display().to_string())
}

/// Parse a registry document from text.
///
/// Environment variables are resolved inside string values once the
/// document is parsed, so their contents can never alter its structure.
/// Every entry is validated before anything is returned, so a single bad
/// entry rejects the whole document.
pub fn parse_str(
    raw: &str,
    format: ConfigFormat,
    source: &str,
) -> Result<RegistrySnapshot, ConfigError> {
    let document: RegistryDocument = if raw.trim().is_empty() {
        RegistryDocument::default()
    } else {
        match format {
            ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| {
                ConfigError::Parse {
                    path: source.to_string(),
                    reason: e.to_string(),
                }
            })?,
            ConfigFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| {
                ConfigError::Parse {
                    path: source.to_string(),
                    reason: e.to_string(),
                }
            })?,
        }
    };

    let configs = document
        .servers
        .into_iter()
        .map(|(name, entry)| entry.into_config(&name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RegistrySnapshot::from_configs(configs))
}

/// Persist a snapshot to `path` in the format implied by its extension.
///
/// Entries loaded from a file are written as they were read, `${VAR}`
/// placeholders included, unless their endpoint was changed in code.
///
/// Writes to a sibling temp file and renames it into place so a concurrent
/// watcher never observes a half-written document.
pub fn save(path: &Path, snapshot: &RegistrySnapshot) -> Result<(), ConfigError> {
    let io_err = |e: &dyn std::fmt::Display| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let document = RegistryDocument {
        servers: snapshot
            .iter()
            .map(|c| (c.name.clone(), RawServerEntry::for_save(c)))
            .collect(),
    };

    let text = match ConfigFormat::from_path(path) {
        ConfigFormat::Json => serde_json::to_string_pretty(&document).map_err(|e| io_err(&e))?,
        ConfigFormat::Yaml => serde_yaml::to_string(&document).map_err(|e| io_err(&e))?,
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&tmp_path, text).map_err(|e| io_err(&e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(&e))?;

    tracing::debug!(path = %path.display(), servers = snapshot.len(), "saved registry");
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
