pub mod hub;
pub mod mcp_client;
pub mod ranking;
pub mod registry;

use std::path::{Path, PathBuf};

pub use hub::{HubError, HubOptions, ToolHub};

/// Env var that switches log output from stderr to a file under [`data_dir`].
pub const LOG_FILE_ENV: &str = "MCP_AGGREGATOR_LOG_FILE";

const LOG_FILE_NAME: &str = "aggregator.log";
const DEFAULT_FILTER: &str = "mcp_aggregator=info,warn";

/// Return the platform-standard data directory for the aggregator.
///
/// - macOS: `~/Library/Application Support/mcp-aggregator/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-aggregator\`
/// - Linux: `$XDG_DATA_HOME/mcp-aggregator/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-aggregator/` when none of the above resolve.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-aggregator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-aggregator")
}

fn file_logging_enabled() -> bool {
    std::env::var(LOG_FILE_ENV)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Initialize the tracing subscriber.
///
/// Filter comes from `RUST_LOG`, defaulting to `mcp_aggregator=info,warn`.
/// Output goes to stderr unless `MCP_AGGREGATOR_LOG_FILE=1`, in which case
/// the previous logs are rotated (keeping 3) and a fresh `aggregator.log` is
/// written line by line. Calling this twice is harmless.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_file = if file_logging_enabled() {
        open_log_file(&data_dir())
    } else {
        None
    };

    let initialized = match log_file {
        Some((path, file)) => {
            let ok = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(FlushingWriter::new(file))
                .with_ansi(false)
                .with_target(true)
                .try_init()
                .is_ok();
            if ok {
                tracing::info!(log_file = %path.display(), "logging to file");
            }
            ok
        }
        None => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .is_ok(),
    };

    if initialized {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            pid = std::process::id(),
            "mcp-aggregator starting"
        );
    }
}

/// Rotate and open `<dir>/aggregator.log`. `None` if the directory or file
/// cannot be created; the caller falls back to stderr.
fn open_log_file(dir: &Path) -> Option<(PathBuf, std::fs::File)> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("cannot create log dir {}: {e}", dir.display());
        return None;
    }
    let path = dir.join(LOG_FILE_NAME);
    rotate_log_file(&path, 3);

    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some((path, file)),
        Err(e) => {
            eprintln!("cannot open log file {}: {e}", path.display());
            None
        }
    }
}

/// Rotate `name.log` → `name.log.1` → … → `name.log.{keep}`; the oldest is
/// deleted and gaps in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let numbered = |i: u32| PathBuf::from(format!("{}.{i}", base_path.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }
    if base_path.exists() {
        let _ = std::fs::rename(base_path, numbered(1));
    }
}

/// File writer that flushes after every write so log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_rotate_keeps_last_three() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("aggregator.log");

        for generation in 0..5 {
            std::fs::write(&base, format!("run {generation}")).unwrap();
            rotate_log_file(&base, 3);
        }

        assert!(!base.exists());
        let read = |i: u32| std::fs::read_to_string(format!("{}.{i}", base.display())).unwrap();
        assert_eq!(read(1), "run 4");
        assert_eq!(read(2), "run 3");
        assert_eq!(read(3), "run 2");
        assert!(!PathBuf::from(format!("{}.4", base.display())).exists());
    }

    #[test]
    fn test_rotate_with_no_existing_log_is_noop() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("aggregator.log");
        rotate_log_file(&base, 3);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_open_log_file_creates_dir_and_rotates() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("logs");
        let (path, _) = open_log_file(&dir).unwrap();
        std::fs::write(&path, "old").unwrap();

        let (path, file) = open_log_file(&dir).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"new line\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new line\n");
        assert_eq!(std::fs::read_to_string(dir.join("aggregator.log.1")).unwrap(), "old");
    }

    #[test]
    fn test_flushing_writer_clones_share_one_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("aggregator.log");
        let file = std::fs::File::create(&path).unwrap();

        let writer = FlushingWriter::new(file);
        let mut first = tracing_subscriber::fmt::MakeWriter::make_writer(&writer);
        let mut second = tracing_subscriber::fmt::MakeWriter::make_writer(&writer);
        first.write_all(b"one\n").unwrap();
        second.write_all(b"two\n").unwrap();

        // visible without an explicit flush
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_data_dir_is_named_for_the_crate() {
        let dir = data_dir();
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.contains("mcp-aggregator"));
    }
}
