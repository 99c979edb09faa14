//! Background watcher that re-emits the registry whenever its file changes.
//!
//! The watcher polls a SHA-256 fingerprint of the file contents. A change
//! arms a debounce deadline; further changes push the deadline out. Once the
//! file has been quiet for the whole window it is parsed and the full
//! snapshot is sent on the channel. Parse failures are logged and nothing is
//! sent, so consumers keep whatever they applied last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::{parse_str, ConfigFormat, RegistrySnapshot};
use super::errors::ConfigError;

// ─── Options ────────────────────────────────────────────────────────────────

/// Tunables for [`ConfigWatcher`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Quiet period required before a change is applied.
    pub debounce: Duration,
    /// How often the file fingerprint is sampled.
    pub poll_interval: Duration,
    /// Capacity of the snapshot channel.
    pub channel_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(400),
            poll_interval: Duration::from_millis(100),
            channel_capacity: 16,
        }
    }
}

// ─── Baseline ───────────────────────────────────────────────────────────────

/// SHA-256 of the registry file contents.
pub type Fingerprint = [u8; 32];

/// Snapshot loaded at startup together with the fingerprint of the exact
/// bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub snapshot: RegistrySnapshot,
    pub fingerprint: Fingerprint,
}

/// Read, fingerprint and parse the registry file in one pass.
///
/// Hand the result to [`ConfigWatcher::spawn_from`] so edits landing between
/// this load and the watcher's first poll are still picked up.
pub fn load_baseline(path: &Path) -> Result<Baseline, ConfigError> {
    let bytes = std::fs::read(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let sample = Sample {
        fingerprint: Sha256::digest(&bytes).into(),
        bytes: Some(bytes),
    };
    Ok(Baseline {
        snapshot: parse_sample(path, &sample)?,
        fingerprint: sample.fingerprint,
    })
}

// ─── Watcher ────────────────────────────────────────────────────────────────

/// Handle to a running watcher task.
pub struct ConfigWatcher {
    path: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `path`, taking its contents at task start as the
    /// baseline. Only later changes produce snapshots.
    pub fn spawn(
        path: impl Into<PathBuf>,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<RegistrySnapshot>) {
        Self::start(path.into(), None, options, cancel)
    }

    /// Start watching `path` against the fingerprint of what was loaded.
    /// If the file already differs, a snapshot follows after one debounce.
    pub fn spawn_from(
        path: impl Into<PathBuf>,
        baseline: &Baseline,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<RegistrySnapshot>) {
        Self::start(path.into(), Some(baseline.fingerprint), options, cancel)
    }

    fn start(
        path: PathBuf,
        baseline: Option<Fingerprint>,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<RegistrySnapshot>) {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));

        let handle = tokio::spawn(watch_loop(
            path.clone(),
            baseline,
            options,
            cancel.clone(),
            tx,
        ));

        tracing::info!(path = %path.display(), "config watcher started");

        (
            Self {
                path,
                cancel,
                handle,
            },
            rx,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Request the watcher to stop. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the watcher and wait for its task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "config watcher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Contents and fingerprint of one sample. A missing file has no bytes and
/// its own fixed fingerprint.
struct Sample {
    fingerprint: Fingerprint,
    bytes: Option<Vec<u8>>,
}

async fn sample(path: &Path) -> Sample {
    match tokio::fs::read(path).await {
        Ok(bytes) => Sample {
            fingerprint: Sha256::digest(&bytes).into(),
            bytes: Some(bytes),
        },
        Err(_) => Sample {
            fingerprint: [0u8; 32],
            bytes: None,
        },
    }
}

fn parse_sample(path: &Path, sample: &Sample) -> Result<RegistrySnapshot, ConfigError> {
    let source = path.display().to_string();
    let bytes = sample.bytes.as_deref().ok_or_else(|| ConfigError::Io {
        path: source.clone(),
        reason: "file not found".into(),
    })?;
    let text = std::str::from_utf8(bytes).map_err(|e| ConfigError::Parse {
        path: source.clone(),
        reason: format!("file is not valid UTF-8: {e}"),
    })?;
    parse_str(text, ConfigFormat::from_path(path), &source)
}

async fn watch_loop(
    path: PathBuf,
    baseline: Option<Fingerprint>,
    options: WatchOptions,
    cancel: CancellationToken,
    tx: mpsc::Sender<RegistrySnapshot>,
) {
    let mut last = match baseline {
        Some(fingerprint) => Sample {
            fingerprint,
            bytes: None,
        },
        None => sample(&path).await,
    };
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(options.poll_interval) => {}
        }

        let current = sample(&path).await;
        if current.fingerprint != last.fingerprint {
            tracing::debug!(path = %path.display(), "config file changed, debouncing");
            last = current;
            deadline = Some(Instant::now() + options.debounce);
            continue;
        }

        match deadline {
            Some(at) if Instant::now() >= at => deadline = None,
            _ => continue,
        }

        let snapshot = match parse_sample(&path, &last) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "config reload failed, keeping previous registry"
                );
                continue;
            }
        };

        tracing::info!(
            path = %path.display(),
            servers = snapshot.len(),
            "config reloaded"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(snapshot) => {
                if sent.is_err() {
                    tracing::debug!("snapshot receiver dropped, stopping watcher");
                    break;
                }
            }
        }
    }

    tracing::info!(path = %path.display(), "config watcher stopped");
}

// ─── Tests ──────────────────────────────────────────────────────────────────
