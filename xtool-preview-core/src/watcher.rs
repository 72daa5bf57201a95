//! Polling file watcher driving live reload.
//!
//! Takes a snapshot of `{relative path → mtime}` once a second,
//! restricted to one source extension and skipping build output
//! directories. A detected change is debounced, the tree is
//! re-snapshotted, and the callback fires. Polling is deliberate:
//! it behaves identically on every platform the enclosing tool runs
//! on, including network filesystems.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Path → mtime map for one poll pass.
type Snapshot = HashMap<PathBuf, SystemTime>;

/// Directory names whose subtrees never hold watched sources.
const SKIPPED_SEGMENTS: [&str; 2] = ["/.build/", "/Packages/"];

// ── WatcherConfig ────────────────────────────────────────────────

/// Configuration for [`FileWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Root of the watched tree.
    pub root: PathBuf,
    /// File extension to watch (without the dot).
    pub extension: String,
    /// Time between snapshot passes.
    pub poll_interval: Duration,
    /// Settle window after the first detected change.
    pub debounce: Duration,
}

impl WatcherConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "swift".into(),
            poll_interval: Duration::from_secs(1),
            debounce: Duration::from_millis(500),
        }
    }
}

// ── Snapshot + change predicate ──────────────────────────────────

/// Whether a relative path sits under a skipped directory.
fn is_skipped(relative: &Path) -> bool {
    let as_str = format!("/{}/", relative.display());
    SKIPPED_SEGMENTS
        .iter()
        .any(|segment| as_str.contains(segment))
}

/// Walk the tree and collect watched files.
fn take_snapshot(root: &Path, extension: &str) -> Snapshot {
    let mut snapshot = Snapshot::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if is_skipped(relative) {
                continue;
            }

            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
                    snapshot.insert(relative.to_path_buf(), mtime);
                }
            }
        }
    }
    snapshot
}

/// Change predicate: the counts differ (covers deletions), or some
/// current file is new or carries a strictly newer mtime.
fn has_changes(previous: &Snapshot, current: &Snapshot) -> bool {
    if previous.len() != current.len() {
        return true;
    }
    current.iter().any(|(path, mtime)| {
        previous
            .get(path)
            .map(|prev| mtime > prev)
            .unwrap_or(true)
    })
}

// ── FileWatcher ──────────────────────────────────────────────────

/// Handle to a spawned watcher loop.
pub struct FileWatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl FileWatcher {
    /// Spawn the polling loop; `on_change` fires after each debounced
    /// change.
    pub fn spawn<F>(config: WatcherConfig, on_change: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.child_token();
        let handle = tokio::spawn(async move {
            watch_loop(config, on_change, child).await;
        });
        Self { token, handle }
    }

    /// Abort the loop at its next sleep boundary.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the loop to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "watcher task join failed");
        }
    }
}

async fn watch_loop<F>(config: WatcherConfig, on_change: F, token: CancellationToken)
where
    F: Fn() + Send + 'static,
{
    let mut last = take_snapshot(&config.root, &config.extension);
    debug!(
        root = %config.root.display(),
        files = last.len(),
        "watching for source changes"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }

        let current = take_snapshot(&config.root, &config.extension);
        if has_changes(&last, &current) {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(config.debounce) => {}
            }
            last = take_snapshot(&config.root, &config.extension);
            debug!(files = last.len(), "source change detected");
            on_change();
        } else {
            last = current;
        }
    }
    debug!("watcher loop exited");
}

// ── Tests ────────────────────────────────────────────────────────
