//! Agent-facing tool hub.
//!
//! Ties the pieces together: registry snapshots drive the client manager,
//! the combined tool catalog feeds a ranker, and callers get `search` over
//! the catalog plus `invoke` by `server:tool` id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::mcp_client::{ClientManager, McpError, SyncReport, ToolCallResult};
use crate::ranking::{
    entries_for, new_ranker, split_doc_id, FieldWeights, RankingError, RankingStrategy,
    ScoredTool, ToolRanker,
};
use crate::registry::RegistrySnapshot;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Ranking(#[from] RankingError),

    #[error("invalid tool id '{tool_id}': expected 'server:tool'")]
    InvalidToolId { tool_id: String },
}

// ─── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Quiet period after a registry change before the index is rebuilt.
    pub rebuild_debounce: Duration,
    pub strategy: RankingStrategy,
    pub weights: FieldWeights,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            rebuild_debounce: Duration::from_millis(400),
            strategy: RankingStrategy::default(),
            weights: FieldWeights::default(),
        }
    }
}

// ─── Hub ────────────────────────────────────────────────────────────────────

pub struct ToolHub {
    manager: Arc<ClientManager>,
    options: HubOptions,
    ranker: RwLock<Option<Arc<dyn ToolRanker>>>,
    generation: AtomicU64,
}

impl ToolHub {
    pub fn new(manager: Arc<ClientManager>, options: HubOptions) -> Self {
        Self {
            manager,
            options,
            ranker: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn manager(&self) -> &Arc<ClientManager> {
        &self.manager
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Number of index rebuilds so far.
    pub fn index_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Connect the initial registry and build the first index.
    pub async fn start(&self, snapshot: &RegistrySnapshot) -> HashMap<String, bool> {
        let results = self.manager.initialize_from_config(snapshot).await;
        self.rebuild_index().await;
        results
    }

    /// Reconcile connections with `snapshot`. Does not touch the index.
    pub async fn apply_snapshot(&self, snapshot: &RegistrySnapshot) -> SyncReport {
        self.manager.sync_with_config(snapshot).await
    }

    /// Rebuild the search index from every active server's tools and swap
    /// it in. Returns the number of indexed tools.
    pub async fn rebuild_index(&self) -> usize {
        let tools = self.manager.collect_tools(true).await;
        let entries = entries_for(&tools, &self.options.weights);
        let count = entries.len();

        let mut ranker = new_ranker(self.options.strategy);
        ranker.build_index(entries);
        let ranker: Arc<dyn ToolRanker> = Arc::from(ranker);

        match self.ranker.write() {
            Ok(mut guard) => *guard = Some(ranker),
            Err(poisoned) => *poisoned.into_inner() = Some(ranker),
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            tools = count,
            strategy = %self.options.strategy,
            generation,
            "tool index rebuilt"
        );
        count
    }

    fn current_ranker(&self) -> Option<Arc<dyn ToolRanker>> {
        match self.ranker.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Ranked `server:tool` ids for `query`.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredTool>, HubError> {
        let ranker = self.current_ranker().ok_or(RankingError::IndexEmpty)?;
        Ok(ranker.search(query, top_k)?)
    }

    /// Call the tool named by `tool_id` (`server:tool`, split at the first
    /// `:`) on its owning server.
    pub async fn invoke(
        &self,
        tool_id: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, HubError> {
        let (server, tool) = split_doc_id(tool_id).ok_or_else(|| HubError::InvalidToolId {
            tool_id: tool_id.to_string(),
        })?;
        tracing::debug!(server, tool, "invoking tool");
        Ok(self.manager.call_tool(server, tool, arguments).await?)
    }

    /// Apply snapshots from `rx` until `cancel` fires or the channel closes,
    /// then disconnect everything.
    ///
    /// Each snapshot is reconciled as it arrives. An index rebuild is
    /// scheduled `rebuild_debounce` after the last change; snapshots landing
    /// inside that window push it further out.
    pub async fn run(&self, mut rx: mpsc::Receiver<RegistrySnapshot>, cancel: CancellationToken) {
        let mut rebuild_at: Option<Instant> = None;

        loop {
            let rebuild_due = async move {
                match rebuild_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(snapshot) => {
                        let report = self.apply_snapshot(&snapshot).await;
                        if !report.is_noop() {
                            rebuild_at = Some(Instant::now() + self.options.rebuild_debounce);
                        }
                    }
                    None => {
                        if rebuild_at.is_some() {
                            self.rebuild_index().await;
                        }
                        tracing::debug!("snapshot channel closed");
                        break;
                    }
                },
                _ = rebuild_due => {
                    rebuild_at = None;
                    self.rebuild_index().await;
                }
            }
        }

        self.manager.disconnect_all().await;
        tracing::info!("tool hub stopped");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::test_support::{MockBehavior, MockTransportFactory};
    use crate::mcp_client::McpToolDefinition;
    use crate::registry::{self, ConfigWatcher, ServerConfig, WatchOptions};
    use tempfile::TempDir;

    fn behavior(tools: &[(&str, &str)]) -> MockBehavior {
        MockBehavior::with_tools(
            tools
                .iter()
                .map(|(name, desc)| McpToolDefinition::new(name, desc))
                .collect(),
        )
    }

    fn factory() -> Arc<MockTransportFactory> {
        let factory = Arc::new(MockTransportFactory::new());
        factory.set_behavior(
            "github",
            behavior(&[
                ("create_issue", "Open a new issue in a repository"),
                ("list_pull_requests", "List pull requests"),
            ]),
        );
        factory.set_behavior(
            "projects",
            behavior(&[("list", "List every project in the workspace")]),
        );
        factory
    }

    fn hub_with(factory: Arc<MockTransportFactory>, debounce: Duration) -> Arc<ToolHub> {
        let manager = Arc::new(ClientManager::with_factory(factory));
        Arc::new(ToolHub::new(
            manager,
            HubOptions {
                rebuild_debounce: debounce,
                ..HubOptions::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_search_before_start_is_index_empty() {
        let hub = hub_with(factory(), Duration::from_millis(10));
        assert!(matches!(
            hub.search("issue", 3),
            Err(HubError::Ranking(RankingError::IndexEmpty))
        ));
    }

    #[tokio::test]
    async fn test_start_search_and_invoke() {
        let hub = hub_with(factory(), Duration::from_millis(10));
        let snapshot = RegistrySnapshot::from_configs(vec![
            ServerConfig::stdio("github", "mock", &[]),
            ServerConfig::stdio("projects", "mock", &[]),
        ]);

        let results = hub.start(&snapshot).await;
        assert!(results.values().all(|ok| *ok));
        assert_eq!(hub.index_generation(), 1);

        let hits = hub.search("projects", 3).unwrap();
        assert_eq!(hits[0].doc_id, "projects:list");

        let hits = hub.search("create issue", 1).unwrap();
        assert_eq!(hits[0].doc_id, "github:create_issue");

        let result = hub
            .invoke(&hits[0].doc_id, serde_json::json!({"title": "bug"}))
            .await
            .unwrap();
        assert_eq!(result.text(), "github/create_issue ok");
    }

    #[tokio::test]
    async fn test_invoke_errors() {
        let hub = hub_with(factory(), Duration::from_millis(10));
        hub.start(&RegistrySnapshot::from_configs(vec![
            ServerConfig::stdio("github", "mock", &[]),
            ServerConfig::stdio("projects", "mock", &[]).with_enabled(false),
        ]))
        .await;

        assert!(matches!(
            hub.invoke("no-colon", serde_json::json!({})).await,
            Err(HubError::InvalidToolId { .. })
        ));
        assert!(matches!(
            hub.invoke("jira:create", serde_json::json!({})).await,
            Err(HubError::Mcp(McpError::ServerNotFound { .. }))
        ));
        assert!(matches!(
            hub.invoke("projects:list", serde_json::json!({})).await,
            Err(HubError::Mcp(McpError::ServerDisabled { .. }))
        ));
        assert!(matches!(
            hub.invoke("github:delete_repo", serde_json::json!({})).await,
            Err(HubError::Mcp(McpError::ToolNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_debounces_rebuilds() {
        let hub = hub_with(factory(), Duration::from_millis(100));
        hub.start(&RegistrySnapshot::default()).await;
        assert_eq!(hub.index_generation(), 1);

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let runner = {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { hub.run(rx, cancel).await })
        };

        let snapshots = [
            vec![ServerConfig::stdio("github", "mock", &[])],
            vec![
                ServerConfig::stdio("github", "mock", &[]),
                ServerConfig::stdio("projects", "mock", &[]),
            ],
            vec![ServerConfig::stdio("projects", "mock", &[])],
        ];
        for configs in snapshots {
            tx.send(RegistrySnapshot::from_configs(configs)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hub.index_generation(), 2);
        assert!(hub.search("create issue", 3).unwrap().is_empty());
        assert_eq!(hub.search("projects", 1).unwrap()[0].doc_id, "projects:list");

        cancel.cancel();
        runner.await.unwrap();
        assert!(hub.manager().list_active_servers().is_empty());
    }

    #[tokio::test]
    async fn test_config_file_change_reaches_search() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("servers.yaml");
        std::fs::write(&path, "servers:\n  github:\n    command: mock\n").unwrap();

        let factory = factory();
        let hub = hub_with(factory.clone(), Duration::from_millis(50));
        hub.start(&registry::load(&path).unwrap()).await;
        assert!(hub.search("projects", 3).unwrap().is_empty());

        let cancel = CancellationToken::new();
        let (watcher, rx) = ConfigWatcher::spawn(
            &path,
            WatchOptions {
                debounce: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                channel_capacity: 4,
            },
            cancel.clone(),
        );
        let runner = {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { hub.run(rx, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        std::fs::write(
            &path,
            "servers:\n  github:\n    command: mock\n  projects:\n    command: mock\n",
        )
        .unwrap();

        let found = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if let Ok(hits) = hub.search("projects", 1) {
                    if hits.first().is_some_and(|h| h.doc_id == "projects:list") {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(found.is_ok(), "new server never became searchable");
        assert!(hub.manager().is_connected("projects"));
        assert_eq!(factory.stats.events_for("projects").len(), 2);

        cancel.cancel();
        runner.await.unwrap();
        watcher.shutdown().await;
        assert!(hub.manager().list_active_servers().is_empty());
    }
}
