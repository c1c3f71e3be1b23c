// src/watch/watcher.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::watch::patterns::STATE_DIR;

/// One debounced batch of changed paths (absolute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub paths: Vec<PathBuf>,
}

/// Handle for the filesystem watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive. Dropping this handle
/// stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    root: PathBuf,
}

impl WatcherHandle {
    /// The canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("root", &self.root)
            .finish()
    }
}

/// Watch `root` recursively and send a [`WatchEvent`] per batch of changes.
///
/// A batch closes once no new event arrived for `debounce`. Changes inside
/// the state directory are ignored.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    debounce: Duration,
    events_tx: mpsc::Sender<WatchEvent>,
) -> Result<WatcherHandle> {
    let root = root.into();
    // Canonicalize once so we have a stable base path.
    let root = root.canonicalize().unwrap_or(root);

    // Channel from the blocking notify callback into the async world.
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // The receiver only goes away on shutdown.
                let _ = raw_tx.send(event);
            }
            Err(err) => warn!(error = %err, "file watch error"),
        },
        Config::default(),
    )
    .context("creating file watcher")?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {:?}", root))?;

    info!(root = ?root, debounce_ms = debounce.as_millis() as u64, "file watcher started");

    let state_dir = root.join(STATE_DIR);
    tokio::spawn(async move {
        while let Some(first) = raw_rx.recv().await {
            let mut batch: BTreeSet<PathBuf> = BTreeSet::new();
            absorb(&mut batch, first, &state_dir);

            // Keep extending the batch until the window is quiet.
            loop {
                match timeout(debounce, raw_rx.recv()).await {
                    Ok(Some(event)) => absorb(&mut batch, event, &state_dir),
                    Ok(None) => break,
                    Err(_) => break,
                }
            }

            if batch.is_empty() {
                continue;
            }
            debug!(paths = batch.len(), "debounced change batch");
            let event = WatchEvent {
                paths: batch.into_iter().collect(),
            };
            if events_tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle {
        _inner: watcher,
        root,
    })
}

fn absorb(batch: &mut BTreeSet<PathBuf>, event: Event, state_dir: &Path) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    for path in event.paths {
        if !path.starts_with(state_dir) {
            batch.insert(path);
        }
    }
}
