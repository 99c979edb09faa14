//! Client manager: owns one [`McpClient`] per active server and reconciles
//! the active set against registry snapshots.
//!
//! Reads (`get_client`, `list_active_servers`, …) copy an `Arc` out of a
//! short-held `RwLock` and never wait on reconciliation. Reconciliation
//! (`initialize_from_config`, `sync_with_config`, `reconnect_server`,
//! `disconnect_all`) runs end-to-end under one async mutex, so two batches
//! never interleave.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::Serialize;

use super::client::McpClient;
use super::errors::McpError;
use super::transport::{Transport, TransportHandle};
use super::types::{McpToolDefinition, ToolCallResult};
use crate::registry::{RegistrySnapshot, ServerConfig, ServerKind};

/// Client handle shared between the manager and callers.
pub type SharedClient = Arc<tokio::sync::Mutex<McpClient>>;

// ─── Transport Factory ──────────────────────────────────────────────────────

/// Builds the transport for a newly created client.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &ServerConfig) -> Box<dyn Transport>;
}

/// Stdio or HTTP, by the server's kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &ServerConfig) -> Box<dyn Transport> {
        Box::new(TransportHandle::from_config(config))
    }
}

// ─── Reports ────────────────────────────────────────────────────────────────

/// What one reconciliation pass did. Names are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Newly connected servers.
    pub connected: Vec<String>,
    /// Servers removed because they were disabled or deleted.
    pub disconnected: Vec<String>,
    /// Servers torn down and connected again with a new configuration.
    pub reconnected: Vec<String>,
    /// Servers whose connect attempt failed.
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.connected.is_empty()
            && self.disconnected.is_empty()
            && self.reconnected.is_empty()
            && self.failed.is_empty()
    }

    fn sort(&mut self) {
        self.connected.sort();
        self.disconnected.sort();
        self.reconnected.sort();
        self.failed.sort();
    }
}

/// Point-in-time view of one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub kind: ServerKind,
    pub enabled: bool,
    pub connected: bool,
    /// Cached tool count; `None` when unknown or the client is busy.
    pub tool_count: Option<usize>,
    pub connected_at: Option<DateTime<Utc>>,
}

// ─── Manager ────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct ActiveServer {
    config: ServerConfig,
    client: SharedClient,
    connected_at: DateTime<Utc>,
}

type ActiveMap = HashMap<String, ActiveServer>;

pub struct ClientManager {
    factory: Arc<dyn TransportFactory>,
    active: RwLock<Arc<ActiveMap>>,
    desired: RwLock<RegistrySnapshot>,
    sync_lock: tokio::sync::Mutex<()>,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultTransportFactory))
    }

    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            active: RwLock::new(Arc::new(HashMap::new())),
            desired: RwLock::new(RegistrySnapshot::default()),
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ─── Snapshot Reads ──────────────────────────────────────────────────

    fn active(&self) -> Arc<ActiveMap> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, map: ActiveMap) {
        let map = Arc::new(map);
        match self.active.write() {
            Ok(mut guard) => *guard = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
    }

    /// Last snapshot handed to the manager.
    pub fn desired(&self) -> RegistrySnapshot {
        match self.desired.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_desired(&self, snapshot: &RegistrySnapshot) {
        match self.desired.write() {
            Ok(mut guard) => *guard = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
    }

    pub fn list_active_servers(&self) -> BTreeSet<String> {
        self.active().keys().cloned().collect()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.active().contains_key(name)
    }

    /// Client for an active server.
    ///
    /// Returns `ServerDisabled` when the last applied snapshot has the
    /// server but disabled, `ServerNotFound` otherwise.
    pub fn get_client(&self, name: &str) -> Result<SharedClient, McpError> {
        if let Some(server) = self.active().get(name) {
            return Ok(server.client.clone());
        }
        match self.desired().get(name) {
            Some(config) if !config.enabled => Err(McpError::ServerDisabled {
                name: name.to_string(),
            }),
            _ => Err(McpError::ServerNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Status of every server in the last applied snapshot, by name.
    pub fn server_statuses(&self) -> Vec<ServerStatus> {
        let active = self.active();
        self.desired()
            .iter()
            .map(|config| {
                let server = active.get(&config.name);
                ServerStatus {
                    name: config.name.clone(),
                    kind: config.kind(),
                    enabled: config.enabled,
                    connected: server.is_some(),
                    tool_count: server.and_then(|s| {
                        s.client
                            .try_lock()
                            .ok()
                            .and_then(|c| c.cached_tools().map(|t| t.len()))
                    }),
                    connected_at: server.map(|s| s.connected_at),
                }
            })
            .collect()
    }

    // ─── Reconciliation ──────────────────────────────────────────────────

    /// Connect every enabled server in `snapshot`.
    ///
    /// Returns `name → connected` for the enabled entries; disabled entries
    /// are absent.
    pub async fn initialize_from_config(
        &self,
        snapshot: &RegistrySnapshot,
    ) -> HashMap<String, bool> {
        let _guard = self.sync_lock.lock().await;
        let report = self.reconcile(snapshot).await;

        let active = self.active();
        let results: HashMap<String, bool> = snapshot
            .enabled()
            .map(|c| (c.name.clone(), active.contains_key(&c.name)))
            .collect();

        tracing::info!(
            connected = results.values().filter(|ok| **ok).count(),
            failed = report.failed.len(),
            "initialized servers from config"
        );
        results
    }

    /// Converge the active set to `snapshot`.
    ///
    /// Removed or disabled servers are disconnected, new enabled servers are
    /// connected, and servers whose configuration changed are rebuilt.
    /// Connect failures are logged and reported, never returned.
    pub async fn sync_with_config(&self, snapshot: &RegistrySnapshot) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        let report = self.reconcile(snapshot).await;
        if report.is_noop() {
            tracing::debug!("config sync: nothing to do");
        } else {
            tracing::info!(
                connected = ?report.connected,
                disconnected = ?report.disconnected,
                reconnected = ?report.reconnected,
                failed = ?report.failed,
                "config sync applied"
            );
        }
        report
    }

    /// Must be called with `sync_lock` held.
    async fn reconcile(&self, snapshot: &RegistrySnapshot) -> SyncReport {
        self.set_desired(snapshot);
        let current = self.active();

        let mut teardown: Vec<ActiveServer> = Vec::new();
        let mut rebuilt: BTreeSet<String> = BTreeSet::new();
        let mut to_connect: Vec<ServerConfig> = Vec::new();
        let mut report = SyncReport::default();

        for (name, server) in current.iter() {
            match snapshot.get(name) {
                Some(config) if config.enabled => {
                    if *config != server.config {
                        tracing::info!(server = %name, "configuration changed, reconnecting");
                        teardown.push(server.clone());
                        rebuilt.insert(name.clone());
                        to_connect.push(config.clone());
                    }
                }
                _ => {
                    teardown.push(server.clone());
                    report.disconnected.push(name.clone());
                }
            }
        }
        for config in snapshot.enabled() {
            if !current.contains_key(&config.name) {
                to_connect.push(config.clone());
            }
        }

        // Phase 1: unpublish and close everything being removed or rebuilt.
        if !teardown.is_empty() {
            let mut next: ActiveMap = (*current).clone();
            for server in &teardown {
                next.remove(&server.config.name);
            }
            self.publish(next);
            join_all(teardown.iter().map(|s| disconnect_client(&s.client))).await;
        }

        // Phase 2: connect the new set concurrently.
        if !to_connect.is_empty() {
            let outcomes = join_all(to_connect.into_iter().map(|c| self.connect_new(c))).await;

            let mut next: ActiveMap = (*self.active()).clone();
            for (name, outcome) in outcomes {
                match outcome {
                    Some(server) => {
                        next.insert(name.clone(), server);
                        if rebuilt.contains(&name) {
                            report.reconnected.push(name);
                        } else {
                            report.connected.push(name);
                        }
                    }
                    None => report.failed.push(name),
                }
            }
            self.publish(next);
        }

        report.sort();
        report
    }

    /// Build and connect a client. Failures are logged and yield `None`.
    async fn connect_new(&self, config: ServerConfig) -> (String, Option<ActiveServer>) {
        let name = config.name.clone();
        let transport = self.factory.create(&config);
        let mut client = McpClient::with_transport(config.clone(), transport);

        match client.connect().await {
            Ok(()) => {
                let server = ActiveServer {
                    config,
                    client: Arc::new(tokio::sync::Mutex::new(client)),
                    connected_at: Utc::now(),
                };
                (name, Some(server))
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "failed to connect server");
                (name, None)
            }
        }
    }

    /// Rebuild one server's client from the last applied snapshot.
    ///
    /// Returns `false` without side effects when the server is unknown or
    /// disabled, and `false` after logging when the new connect fails.
    pub async fn reconnect_server(&self, name: &str) -> bool {
        let _guard = self.sync_lock.lock().await;

        let config = match self.desired().get(name) {
            Some(config) if config.enabled => config.clone(),
            _ => return false,
        };

        let current = self.active();
        if let Some(old) = current.get(name) {
            let mut next: ActiveMap = (*current).clone();
            next.remove(name);
            self.publish(next);
            disconnect_client(&old.client).await;
        }

        let (name, outcome) = self.connect_new(config).await;
        match outcome {
            Some(server) => {
                let mut next: ActiveMap = (*self.active()).clone();
                next.insert(name.clone(), server);
                self.publish(next);
                tracing::info!(server = %name, "server reconnected");
                true
            }
            None => false,
        }
    }

    /// Disconnect every active client. Idempotent.
    pub async fn disconnect_all(&self) {
        let _guard = self.sync_lock.lock().await;
        let current = self.active();
        if current.is_empty() {
            return;
        }
        self.publish(HashMap::new());
        join_all(current.values().map(|s| disconnect_client(&s.client))).await;
        tracing::info!(count = current.len(), "disconnected all servers");
    }

    /// Initialize from `snapshot`, run `f`, then disconnect everything even
    /// when `f` fails.
    pub async fn scoped<T, F>(&self, snapshot: &RegistrySnapshot, f: F) -> T
    where
        F: for<'a> FnOnce(&'a ClientManager) -> BoxFuture<'a, T>,
    {
        self.initialize_from_config(snapshot).await;
        let result = f(self).await;
        self.disconnect_all().await;
        result
    }

    // ─── Tools ───────────────────────────────────────────────────────────

    /// Tool definitions across all active servers, ordered by server name.
    /// A server that fails to list is logged and skipped.
    pub async fn collect_tools(&self, use_cache: bool) -> Vec<(String, McpToolDefinition)> {
        let active = self.active();
        let mut names: Vec<&String> = active.keys().collect();
        names.sort();

        let listings = join_all(names.into_iter().map(|name| {
            let client = active[name].client.clone();
            async move {
                let mut client = client.lock().await;
                (name.clone(), client.list_tools(use_cache).await)
            }
        }))
        .await;

        let mut tools = Vec::new();
        for (server, listing) in listings {
            match listing {
                Ok(defs) => tools.extend(defs.into_iter().map(|d| (server.clone(), d))),
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "failed to list tools");
                }
            }
        }
        tools
    }

    /// Forward a tool call to the named server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let client = self.get_client(server)?;
        let mut client = client.lock().await;
        client.call_tool(tool, arguments).await
    }
}

async fn disconnect_client(client: &SharedClient) {
    client.lock().await.disconnect().await;
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::test_support::{MockBehavior, MockTransportFactory};
    use futures::FutureExt;
    use std::time::Duration;

    fn setup() -> (Arc<MockTransportFactory>, ClientManager) {
        let factory = Arc::new(MockTransportFactory::new());
        let manager = ClientManager::with_factory(factory.clone());
        (factory, manager)
    }

    fn snapshot(configs: Vec<ServerConfig>) -> RegistrySnapshot {
        RegistrySnapshot::from_configs(configs)
    }

    fn tool_behavior(names: &[&str]) -> MockBehavior {
        MockBehavior::with_tools(
            names
                .iter()
                .map(|n| McpToolDefinition::new(n, "test tool"))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_initialize_connects_enabled_only() {
        let (factory, manager) = setup();
        factory.set_behavior("broken", MockBehavior::default().failing());

        let snap = snapshot(vec![
            ServerConfig::stdio("a", "x", &[]),
            ServerConfig::http("b", "https://b/mcp"),
            ServerConfig::stdio("off", "x", &[]).with_enabled(false),
            ServerConfig::stdio("broken", "x", &[]),
        ]);
        let results = manager.initialize_from_config(&snap).await;

        assert_eq!(results.len(), 3);
        assert!(results["a"]);
        assert!(results["b"]);
        assert!(!results["broken"]);
        assert!(!results.contains_key("off"));
        assert_eq!(
            manager.list_active_servers(),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_disable_removes_and_closes_once() {
        let (factory, manager) = setup();
        let enabled = snapshot(vec![ServerConfig::stdio("a", "x", &[])]);
        manager.initialize_from_config(&enabled).await;
        assert!(manager.is_connected("a"));

        let disabled = snapshot(vec![ServerConfig::stdio("a", "x", &[]).with_enabled(false)]);
        let report = manager.sync_with_config(&disabled).await;

        assert_eq!(report.disconnected, vec!["a"]);
        assert!(report.connected.is_empty());
        assert!(!manager.is_connected("a"));
        assert_eq!(
            factory.stats.events_for("a"),
            vec!["connect-start:a", "connect-end:a", "close:a"]
        );
        assert!(matches!(
            manager.get_client("a"),
            Err(McpError::ServerDisabled { .. })
        ));

        // applying the same snapshot again does nothing
        assert!(manager.sync_with_config(&disabled).await.is_noop());
        assert_eq!(factory.stats.closes(), 1);
        assert_eq!(factory.stats.connects(), 1);
    }

    #[tokio::test]
    async fn test_removed_server_is_disconnected() {
        let (_factory, manager) = setup();
        manager
            .initialize_from_config(&snapshot(vec![
                ServerConfig::stdio("a", "x", &[]),
                ServerConfig::stdio("b", "x", &[]),
            ]))
            .await;

        let report = manager
            .sync_with_config(&snapshot(vec![ServerConfig::stdio("b", "x", &[])]))
            .await;
        assert_eq!(report.disconnected, vec!["a"]);
        assert!(matches!(
            manager.get_client("a"),
            Err(McpError::ServerNotFound { .. })
        ));
        assert!(manager.get_client("b").is_ok());
    }

    #[tokio::test]
    async fn test_changed_config_reconnects() {
        let (factory, manager) = setup();
        manager
            .initialize_from_config(&snapshot(vec![ServerConfig::stdio("a", "node", &["v1.js"])]))
            .await;
        let before = manager.get_client("a").unwrap();

        let report = manager
            .sync_with_config(&snapshot(vec![ServerConfig::stdio("a", "node", &["v2.js"])]))
            .await;

        assert_eq!(report.reconnected, vec!["a"]);
        assert_eq!(
            factory.stats.events_for("a"),
            vec![
                "connect-start:a",
                "connect-end:a",
                "close:a",
                "connect-start:a",
                "connect-end:a"
            ]
        );
        let after = manager.get_client("a").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            after.lock().await.config(),
            &ServerConfig::stdio("a", "node", &["v2.js"])
        );
    }

    #[tokio::test]
    async fn test_http_header_change_reconnects() {
        let (_factory, manager) = setup();
        let base = ServerConfig::http("crm", "https://crm/mcp");
        manager.initialize_from_config(&snapshot(vec![base.clone()])).await;

        let mut changed = base.clone();
        if let crate::registry::ServerEndpoint::Http(http) = &mut changed.endpoint {
            http.headers.insert("Authorization".into(), "Bearer new".into());
        }
        let report = manager.sync_with_config(&snapshot(vec![changed])).await;
        assert_eq!(report.reconnected, vec!["crm"]);
    }

    #[tokio::test]
    async fn test_unchanged_config_is_noop() {
        let (factory, manager) = setup();
        let snap = snapshot(vec![ServerConfig::stdio("a", "x", &[])]);
        manager.initialize_from_config(&snap).await;

        let report = manager.sync_with_config(&snap).await;
        assert!(report.is_noop());
        assert_eq!(factory.stats.connects(), 1);
        assert_eq!(factory.stats.closes(), 0);
    }

    #[tokio::test]
    async fn test_failing_connect_does_not_block_sibling() {
        let (factory, manager) = setup();
        factory.set_behavior(
            "bad",
            MockBehavior::default()
                .failing()
                .with_connect_delay(Duration::from_millis(50)),
        );

        let report = manager
            .sync_with_config(&snapshot(vec![
                ServerConfig::stdio("bad", "x", &[]),
                ServerConfig::stdio("good", "x", &[]),
            ]))
            .await;

        assert_eq!(report.failed, vec!["bad"]);
        assert_eq!(report.connected, vec!["good"]);
        assert!(manager.is_connected("good"));
        assert!(!manager.is_connected("bad"));
    }

    #[tokio::test]
    async fn test_slow_connect_runs_concurrently() {
        let (factory, manager) = setup();
        factory.set_behavior(
            "a_slow",
            MockBehavior::default().with_connect_delay(Duration::from_millis(150)),
        );

        manager
            .sync_with_config(&snapshot(vec![
                ServerConfig::stdio("a_slow", "x", &[]),
                ServerConfig::stdio("b_fast", "x", &[]),
            ]))
            .await;

        // a_slow is started first but b_fast finishes while it is still pending
        let events = factory.stats.events();
        let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
        assert!(pos("connect-start:a_slow") < pos("connect-start:b_fast"));
        assert!(pos("connect-end:b_fast") < pos("connect-end:a_slow"));
        assert_eq!(manager.list_active_servers().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_syncs_do_not_interleave() {
        let factory = Arc::new(MockTransportFactory::new());
        for name in ["a", "b"] {
            factory.set_behavior(
                name,
                MockBehavior::default().with_connect_delay(Duration::from_millis(40)),
            );
        }
        let manager = Arc::new(ClientManager::with_factory(factory.clone()));

        let first = snapshot(vec![ServerConfig::stdio("a", "x", &[])]);
        let second = snapshot(vec![ServerConfig::stdio("b", "x", &[])]);

        let m1 = manager.clone();
        let m2 = manager.clone();
        let t1 = tokio::spawn(async move { m1.sync_with_config(&first).await });
        let t2 = tokio::spawn(async move { m2.sync_with_config(&second).await });
        t1.await.unwrap();
        t2.await.unwrap();

        // each batch holds one connect, so a start must be followed by its end
        let events = factory.stats.events();
        for (i, event) in events.iter().enumerate() {
            if let Some(name) = event.strip_prefix("connect-start:") {
                assert_eq!(
                    events.get(i + 1).map(String::as_str),
                    Some(format!("connect-end:{name}").as_str()),
                    "interleaved events: {events:?}"
                );
            }
        }
        assert_eq!(manager.list_active_servers().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_is_idempotent() {
        let (factory, manager) = setup();
        manager
            .initialize_from_config(&snapshot(vec![
                ServerConfig::stdio("a", "x", &[]),
                ServerConfig::stdio("b", "x", &[]),
            ]))
            .await;

        manager.disconnect_all().await;
        manager.disconnect_all().await;

        assert!(manager.list_active_servers().is_empty());
        assert_eq!(factory.stats.closes(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_server() {
        let (factory, manager) = setup();
        manager
            .initialize_from_config(&snapshot(vec![
                ServerConfig::stdio("a", "x", &[]),
                ServerConfig::stdio("off", "x", &[]).with_enabled(false),
            ]))
            .await;
        assert_eq!(factory.stats.connects(), 1);

        assert!(!manager.reconnect_server("unknown").await);
        assert!(!manager.reconnect_server("off").await);
        assert_eq!(factory.stats.connects(), 1);
        assert_eq!(factory.stats.closes(), 0);

        assert!(manager.reconnect_server("a").await);
        assert_eq!(factory.stats.connects(), 2);
        assert_eq!(factory.stats.closes(), 1);
        assert!(manager.is_connected("a"));
    }

    #[tokio::test]
    async fn test_collect_tools_and_statuses() {
        let (factory, manager) = setup();
        factory.set_behavior("github", tool_behavior(&["create_issue", "list_repos"]));
        factory.set_behavior("calendar", tool_behavior(&["create_event"]));
        factory.set_behavior("flaky", tool_behavior(&[]).without_tools_method());

        manager
            .initialize_from_config(&snapshot(vec![
                ServerConfig::stdio("github", "x", &[]),
                ServerConfig::stdio("calendar", "x", &[]),
                ServerConfig::stdio("flaky", "x", &[]),
                ServerConfig::http("off", "https://off").with_enabled(false),
            ]))
            .await;

        let tools = manager.collect_tools(true).await;
        let ids: Vec<String> = tools
            .iter()
            .map(|(s, t)| format!("{s}:{}", t.name))
            .collect();
        assert_eq!(
            ids,
            vec!["calendar:create_event", "github:create_issue", "github:list_repos"]
        );

        let statuses = manager.server_statuses();
        assert_eq!(statuses.len(), 4);
        let github = statuses.iter().find(|s| s.name == "github").unwrap();
        assert!(github.connected);
        assert_eq!(github.tool_count, Some(2));
        assert!(github.connected_at.is_some());
        let off = statuses.iter().find(|s| s.name == "off").unwrap();
        assert!(!off.connected);
        assert!(!off.enabled);
        assert_eq!(off.kind, ServerKind::Http);
    }

    #[tokio::test]
    async fn test_call_tool_routes_to_server() {
        let (factory, manager) = setup();
        factory.set_behavior("github", tool_behavior(&["create_issue"]));
        manager
            .initialize_from_config(&snapshot(vec![ServerConfig::stdio("github", "x", &[])]))
            .await;

        let result = manager
            .call_tool("github", "create_issue", serde_json::json!({"title": "t"}))
            .await
            .unwrap();
        assert_eq!(result.text(), "github/create_issue ok");

        assert!(matches!(
            manager.call_tool("nope", "x", serde_json::json!({})).await,
            Err(McpError::ServerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_scoped_disconnects_after_body() {
        let (factory, manager) = setup();
        let snap = snapshot(vec![ServerConfig::stdio("a", "x", &[])]);

        let seen = manager
            .scoped(&snap, |m| async move { m.list_active_servers().len() }.boxed())
            .await;

        assert_eq!(seen, 1);
        assert!(manager.list_active_servers().is_empty());
        assert_eq!(factory.stats.closes(), 1);
    }
}
