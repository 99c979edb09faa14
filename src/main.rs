//! `mcp-aggregator <config-path>`
//!
//! Connects every enabled server in the registry file, keeps the connections
//! in step with the file as it changes, and maintains the tool index until
//! Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;

use mcp_aggregator::mcp_client::ClientManager;
use mcp_aggregator::ranking::RankingStrategy;
use mcp_aggregator::registry::{self, ConfigWatcher, WatchOptions};
use mcp_aggregator::{init_tracing, HubOptions, ToolHub};

const CONFIG_ENV: &str = "MCP_AGGREGATOR_CONFIG";
const RANKING_ENV: &str = "MCP_AGGREGATOR_RANKING";

fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Ok(PathBuf::from(path)),
        None => bail!("usage: mcp-aggregator <config-path> (or set {CONFIG_ENV})"),
    }
}

fn ranking_strategy() -> anyhow::Result<RankingStrategy> {
    match std::env::var(RANKING_ENV) {
        Ok(name) => name
            .parse()
            .with_context(|| format!("invalid {RANKING_ENV}")),
        Err(_) => Ok(RankingStrategy::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = config_path()?;
    let strategy = ranking_strategy()?;
    let baseline = registry::load_baseline(&path)
        .with_context(|| format!("failed to load registry {}", path.display()))?;
    let snapshot = &baseline.snapshot;

    let watch = WatchOptions::default();
    let hub = Arc::new(ToolHub::new(
        Arc::new(ClientManager::new()),
        HubOptions {
            rebuild_debounce: watch.debounce,
            strategy,
            ..HubOptions::default()
        },
    ));

    let results = hub.start(snapshot).await;
    for (name, connected) in &results {
        if !connected {
            tracing::warn!(server = %name, "server failed to connect (non-fatal)");
        }
    }
    tracing::info!(
        config = %path.display(),
        servers = snapshot.len(),
        connected = results.values().filter(|ok| **ok).count(),
        %strategy,
        "aggregator ready"
    );

    let cancel = CancellationToken::new();
    // Edits made while `start` was connecting differ from the baseline and
    // are delivered once the watcher settles.
    let (watcher, rx) = ConfigWatcher::spawn_from(&path, &baseline, watch, cancel.clone());

    let runner = {
        let hub = hub.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { hub.run(rx, cancel).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    if let Err(e) = runner.await {
        tracing::warn!(error = %e, "hub task ended abnormally");
    }
    watcher.shutdown().await;
    hub.manager().disconnect_all().await;

    Ok(())
}
