//! Initial full-tree scan producer.
//!
//! Walks the configured roots once and enqueues a `create` event per
//! file, stamped with the scan start time, so a fresh collector can be
//! seeded with the current state of the watched trees.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::event::{ChangeKind, Event};
use crate::manager::EventManager;

/// Wake the dispatcher after this many enqueued files.
const SUBMIT_EVERY: usize = 1000;

/// One-shot scanner over a set of roots.
pub struct FileScanner {
    roots: Vec<PathBuf>,
    running: Arc<AtomicBool>,
    scanned: Arc<AtomicU64>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FileScanner {
    /// Create a scanner over the given roots.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            running: Arc::new(AtomicBool::new(false)),
            scanned: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Start the scan thread. Does nothing if already running.
    pub fn start(&self, manager: &Arc<EventManager>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let roots = self.roots.clone();
        let running = Arc::clone(&self.running);
        let scanned = Arc::clone(&self.scanned);
        let manager = Arc::clone(manager);
        let timestamp = Utc::now().timestamp_millis();

        let handle = thread::spawn(move || {
            tracing::info!("scan started");
            for root in roots {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                if !root.is_dir() {
                    tracing::warn!(root = %root.display(), "scan root is not a directory, skipping");
                    continue;
                }
                scan_root(&root, &manager, &running, &scanned, timestamp);
                manager.submit();
            }
            tracing::info!(
                files = scanned.load(Ordering::Relaxed),
                "scan finished"
            );
            running.store(false, Ordering::Release);
        });
        *self.handle.lock() = Some(handle);
    }

    /// Request the scan to stop and join its thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("scan thread panicked during shutdown");
            }
        }
    }

    /// Whether the scan thread is still walking.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of files enqueued so far.
    #[must_use]
    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }
}

fn scan_root(
    root: &Path,
    manager: &Arc<EventManager>,
    running: &AtomicBool,
    scanned: &AtomicU64,
    timestamp: i64,
) {
    let mut pending = 0usize;
    for entry in WalkDir::new(root) {
        if !running.load(Ordering::Acquire) {
            break;
        }
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                manager.add_event(Event::file_change(
                    ChangeKind::Create,
                    entry.path(),
                    timestamp,
                ));
                scanned.fetch_add(1, Ordering::Relaxed);
                pending += 1;
                if pending >= SUBMIT_EVERY {
                    manager.submit();
                    pending = 0;
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "scan error");
            }
        }
    }
}
