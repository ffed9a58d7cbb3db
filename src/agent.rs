//! Top-level wiring of the pipeline components.
//!
//! The agent builds the event manager, filter chain, backup store, and
//! producers from a validated [`Config`] and drives their lifecycle:
//! watch mode runs until stopped, scan mode walks the roots once and
//! waits for the pipeline to drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::Config;
use crate::event::{ExcludeFilter, ExtensionFilter, IncludeFilter};
use crate::manager::{BackupStore, EventManager, ManagerConfig};
use crate::sink::Sink;
use crate::watcher::{FileScanner, FileWatcher};
use crate::Result;

/// Poll cadence used while waiting for the scan and the pipeline drain.
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// The assembled change-shipping agent.
pub struct Agent {
    manager: Arc<EventManager>,
    sink: Arc<dyn Sink>,
    watcher: FileWatcher,
    scanner: FileScanner,
    started: AtomicBool,
    shutdown: Notify,
}

impl Agent {
    /// Build the pipeline from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a filter pattern does not compile or the
    /// backup directory cannot be created.
    pub fn new(config: &Config, sink: Arc<dyn Sink>) -> Result<Self> {
        let backup = if config.backup_enabled {
            Some(BackupStore::open(config.backup_dir.clone())?)
        } else {
            None
        };

        let manager_config = ManagerConfig {
            batch_size: config.batch_size,
            worker_pool_size: config.worker_pool_size,
            operation_interval: config.operation_interval(),
            monitor_interval: config.monitor_interval(),
            ..ManagerConfig::default()
        };
        let manager = Arc::new(EventManager::new(
            manager_config,
            Arc::clone(&sink),
            backup,
        ));

        if config.exclude_no_extension {
            manager.add_filter(Box::new(ExtensionFilter));
        }
        if !config.exclude_patterns.is_empty() {
            manager.add_filter(Box::new(ExcludeFilter::new(&config.exclude_patterns)?));
        }
        if !config.include_patterns.is_empty() {
            manager.add_filter(Box::new(IncludeFilter::new(&config.include_patterns)?));
        }

        Ok(Self {
            manager,
            sink,
            watcher: FileWatcher::new(config.watch_roots.clone()),
            scanner: FileScanner::new(config.watch_roots.clone()),
            started: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Start watch mode: the pipeline plus one watch thread per root.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("agent is already started");
            return Ok(());
        }
        tracing::info!("agent started");

        self.manager.start();
        self.watcher.start(&self.manager)?;
        Ok(())
    }

    /// Run scan mode: seed the queue with the current tree contents,
    /// then block until the scan and all deliveries finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent is already running.
    pub async fn scan(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(crate::Error::internal("agent is already started"));
        }
        tracing::info!("scan mode started");
        let start = std::time::Instant::now();

        self.manager.start();
        self.scanner.start(&self.manager);

        while self.scanner.is_running() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        while self.manager.is_executing() {
            tracing::info!(queued = self.manager.queue_len(), "waiting for deliveries");
            tokio::time::sleep(DRAIN_POLL).await;
        }

        tracing::info!(
            files = self.scanner.scanned(),
            took_secs = start.elapsed().as_secs(),
            "scan finished"
        );
        Ok(())
    }

    /// Signal `wait_for_stop` to return.
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            tracing::warn!("agent is not running");
            return;
        }
        self.shutdown.notify_waiters();
    }

    /// Block until `stop` is called.
    pub async fn wait_for_stop(&self) {
        self.shutdown.notified().await;
    }

    /// Tear everything down: watcher and scanner first, then the
    /// pipeline, then the sink. Safe to call more than once.
    pub async fn destroy(&self) {
        self.watcher.stop();
        self.scanner.stop();
        self.manager.stop().await;
        self.sink.close().await;
        self.started.store(false, Ordering::Release);
        tracing::info!("agent destroyed");
    }

    /// The underlying pipeline, for producers beyond the built-in
    /// watcher and scanner (external feeds push through `add_event`
    /// and `submit`).
    #[must_use]
    pub fn manager(&self) -> &Arc<EventManager> {
        &self.manager
    }
}
