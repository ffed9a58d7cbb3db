//! Filesystem watching: one notify-backed watch thread per root.
//!
//! This module provides:
//! - [`FileWatcher`]: lifecycle of the per-root watch threads
//! - [`coalesce`]: the notification coalescing policy
//! - [`scanner`]: the initial full-tree scan producer

pub mod coalesce;
pub mod scanner;

pub use coalesce::{ChangeCoalescer, RawKind};
pub use scanner::FileScanner;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use notify::{EventKind, RecursiveMode, Watcher as _};
use parking_lot::Mutex;

use crate::manager::EventManager;
use crate::Result;

/// Watches a set of filesystem roots and feeds coalesced change events
/// into the manager.
///
/// Each root gets its own thread blocking on the OS notification
/// primitive. A root that cannot be watched is logged and skipped
/// without affecting the others.
pub struct FileWatcher {
    roots: Vec<PathBuf>,
    started: AtomicBool,
    threads: Mutex<Vec<(Sender<()>, thread::JoinHandle<()>)>>,
}

impl FileWatcher {
    /// Create a watcher over the given roots.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            started: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one watch thread per configured root. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a watch thread cannot be spawned; a root
    /// that merely fails to register its watch is logged and skipped.
    pub fn start(&self, manager: &Arc<EventManager>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut threads = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                tracing::warn!(root = %root.display(), "watch root is not a directory, skipping");
                continue;
            }

            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            let manager = Arc::clone(manager);
            let root_name = root.display().to_string();
            let root = root.clone();
            let handle = thread::Builder::new()
                .name(format!("watch-{root_name}"))
                .spawn(move || watch_root(&root, &manager, &stop_rx))
                .map_err(|e| crate::error::WatchError::WatchFailed {
                    path: root_name,
                    reason: e.to_string(),
                })?;
            threads.push((stop_tx, handle));
        }

        if threads.is_empty() {
            tracing::warn!("no valid watch roots configured");
        }
        *self.threads.lock() = threads;
        Ok(())
    }

    /// Interrupt and join every watch thread. Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        let threads: Vec<_> = std::mem::take(&mut *self.threads.lock());
        for (stop_tx, _) in &threads {
            let _ = stop_tx.send(());
        }
        for (_, handle) in threads {
            if handle.join().is_err() {
                tracing::warn!("watch thread panicked during shutdown");
            }
        }
    }

    /// The configured roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Blocking per-root watch loop.
///
/// Failure to establish the watch is fatal to this root only: log and
/// return. A shutdown signal or a dropped notification channel ends the
/// loop; dropping the watcher tears the OS watch down.
fn watch_root(root: &Path, manager: &Arc<EventManager>, shutdown: &Receiver<()>) {
    tracing::info!(root = %root.display(), "started watching");

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = match notify::recommended_watcher(
        move |result: std::result::Result<notify::Event, notify::Error>| {
            let _ = tx.send(result);
        },
    ) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::warn!(root = %root.display(), error = %err, "failed to create watcher");
            return;
        }
    };
    if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
        tracing::warn!(root = %root.display(), error = %err, "failed to watch root");
        return;
    }

    let coalescer = ChangeCoalescer::new(Arc::clone(manager));
    loop {
        crossbeam_channel::select! {
            recv(shutdown) -> _ => break,
            recv(rx) -> message => match message {
                Ok(Ok(event)) => {
                    handle_notification(&coalescer, &event);
                    if rx.is_empty() {
                        // burst drained; wake the dispatcher
                        manager.submit();
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(root = %root.display(), error = %err, "watch error");
                }
                Err(_) => break,
            }
        }
    }

    tracing::info!(root = %root.display(), "finished watching");
}

fn handle_notification(coalescer: &ChangeCoalescer, event: &notify::Event) {
    let timestamp = Utc::now().timestamp_millis();

    if event.need_rescan() {
        for path in &event.paths {
            coalescer.apply(RawKind::Overflow, path, timestamp);
        }
        if event.paths.is_empty() {
            tracing::warn!("notification overflow, changes may have been lost");
        }
        return;
    }

    let Some(kind) = raw_kind(&event.kind) else {
        tracing::trace!(kind = ?event.kind, "ignoring notification kind");
        return;
    };
    for path in &event.paths {
        coalescer.apply(kind, path, timestamp);
    }
}

/// Map a notify event kind onto the raw notification taxonomy.
fn raw_kind(kind: &EventKind) -> Option<RawKind> {
    match kind {
        EventKind::Create(_) => Some(RawKind::Create),
        EventKind::Modify(_) => Some(RawKind::Modify),
        EventKind::Remove(_) => Some(RawKind::Delete),
        EventKind::Access(_) => None,
        EventKind::Any | EventKind::Other => {
            tracing::warn!(?kind, "unknown notification kind");
            None
        }
    }
}
