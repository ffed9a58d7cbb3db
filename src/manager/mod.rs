//! Event queue and dispatcher: the concurrency hub of the pipeline.
//!
//! Producers push events in from any thread; a single dispatcher task
//! drains them into capped batches and hands each batch to a bounded
//! worker pool for delivery. Failed batches spill to the backup store
//! and are re-queued when the sink recovers.

mod backup;

pub use backup::BackupStore;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;
use crate::event::queue::{CoalesceAction, EventQueue};
use crate::event::{convert_all, ChangeKind, Event, EventFilter, EventKey};
use crate::sink::{Availability, AvailabilityMonitor, MonitorEvent, Sink};

/// Dispatcher and worker-pool settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum events per dispatch batch.
    pub batch_size: usize,
    /// Number of concurrent delivery workers.
    pub worker_pool_size: usize,
    /// Inter-batch throttle applied while the queue is non-empty;
    /// zero disables it.
    pub operation_interval: Duration,
    /// Cadence of the sink reachability probe.
    pub monitor_interval: Duration,
    /// Restored events re-queued between `submit` calls.
    pub restore_chunk: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            worker_pool_size: 10,
            operation_interval: Duration::ZERO,
            monitor_interval: Duration::from_secs(60),
            restore_chunk: 100,
        }
    }
}

/// The queue/dispatcher pipeline.
///
/// `start` and `stop` are idempotent; `stop` interrupts blocking waits,
/// joins every task the manager owns, and waits for in-flight
/// deliveries to finish without cancelling them.
pub struct EventManager {
    config: ManagerConfig,
    queue: EventQueue,
    filters: RwLock<Vec<Box<dyn EventFilter>>>,
    sink: Arc<dyn Sink>,
    backup: Option<BackupStore>,
    availability: Availability,
    running: AtomicBool,
    in_flight: AtomicUsize,
    notify: Notify,
    cancel: Mutex<CancellationToken>,
    workers: Arc<Semaphore>,
    worker_seq: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventManager {
    /// Create a manager delivering to `sink`, spilling failures to
    /// `backup` when present.
    #[must_use]
    pub fn new(config: ManagerConfig, sink: Arc<dyn Sink>, backup: Option<BackupStore>) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            config,
            queue: EventQueue::new(),
            filters: RwLock::new(Vec::new()),
            sink,
            backup,
            availability: Availability::new(),
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            notify: Notify::new(),
            cancel: Mutex::new(CancellationToken::new()),
            workers,
            worker_seq: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a filter at the end of the chain.
    pub fn add_filter(&self, filter: Box<dyn EventFilter>) {
        self.filters.write().push(filter);
    }

    /// Deduplicating insert: a queued event with the same identity is
    /// superseded.
    pub fn add_event(&self, event: Event) {
        if event.is_empty() {
            tracing::warn!("added event is empty");
            return;
        }
        self.queue.insert(event);
    }

    /// Apply a coalescing transition atomically against the queue's
    /// pending view.
    pub fn apply_coalesced(
        &self,
        event: Event,
        kind: ChangeKind,
        transition: impl FnOnce(Option<ChangeKind>, ChangeKind) -> CoalesceAction,
    ) -> CoalesceAction {
        self.queue.coalesce(event, kind, transition)
    }

    /// Wake the dispatcher if it is blocked waiting for work.
    ///
    /// Moves no data; producers call this after a burst of additions so
    /// the dispatcher does not sit on its idle wait.
    pub fn submit(&self) {
        self.notify.notify_one();
    }

    /// True while the queue is non-empty or a delivery is in flight;
    /// callers poll this to wait for the pipeline to drain.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        !self.queue.is_empty() || self.in_flight.load(Ordering::Acquire) > 0
    }

    /// Current queue depth.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Handle to the circuit-breaker flag.
    #[must_use]
    pub fn availability(&self) -> Availability {
        self.availability.clone()
    }

    /// Spawn the dispatcher, the availability monitor, and the restore
    /// listener. Does nothing if already started.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let (monitor_tx, mut monitor_rx) = mpsc::unbounded_channel();
        let monitor = AvailabilityMonitor::new(
            Arc::clone(&self.sink),
            self.availability.clone(),
            self.config.monitor_interval,
            monitor_tx,
        );

        let restore_manager = Arc::clone(self);
        let restore_cancel = cancel.clone();
        let restore_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = restore_cancel.cancelled() => break,
                    signal = monitor_rx.recv() => match signal {
                        Some(MonitorEvent::Restored) => restore_manager.restore_backups().await,
                        None => break,
                    },
                }
            }
        });

        let dispatcher_manager = Arc::clone(self);
        let dispatcher_cancel = cancel.clone();
        let dispatcher_task =
            tokio::spawn(async move { dispatcher_manager.dispatcher_loop(dispatcher_cancel).await });

        let mut tasks = self.tasks.lock();
        tasks.push(monitor.spawn(cancel));
        tasks.push(restore_task);
        tasks.push(dispatcher_task);
    }

    /// Stop the pipeline: interrupt waits, join owned tasks, and wait
    /// for in-flight deliveries. Queued-but-undispatched events stay in
    /// memory for a later `start`. Does nothing if already stopped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.lock().cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "pipeline task ended abnormally");
            }
        }

        // in-flight deliveries hold permits; taking them all waits for
        // the pool to drain without cancelling anything
        #[allow(clippy::cast_possible_truncation)]
        let pool = self.config.worker_pool_size as u32;
        match self.workers.acquire_many(pool).await {
            Ok(permits) => drop(permits),
            Err(_) => tracing::warn!("worker pool closed before drain"),
        }
    }

    /// Re-inject spilled events into the live queue in chunks.
    ///
    /// No-op when backup is disabled or no backup files exist. Runs
    /// after each delivery success and on every restored notification;
    /// the store's lock serializes overlapping passes.
    pub async fn restore_backups(&self) {
        let Some(store) = &self.backup else { return };
        let events = store.drain().await;
        if events.is_empty() {
            return;
        }
        tracing::info!(events = events.len(), "restoring backed-up events");

        let mut pending = 0;
        for event in events {
            self.add_event(event);
            pending += 1;
            if pending >= self.config.restore_chunk {
                self.submit();
                pending = 0;
            }
        }
        self.submit();
    }

    async fn dispatcher_loop(self: Arc<Self>, cancel: CancellationToken) {
        tracing::debug!("dispatcher started");
        loop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            if self.queue.is_empty() {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = self.notify.notified() => {}
                }
                continue;
            }

            if !self.config.operation_interval.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.config.operation_interval) => {}
                }
            }

            let batch = self.drain_batch();
            if batch.is_empty() {
                continue;
            }
            self.in_flight.fetch_add(1, Ordering::AcqRel);

            tokio::select! {
                () = cancel.cancelled() => {
                    // keep undispatched events for a later start
                    for event in batch {
                        self.queue.insert(event);
                    }
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    break;
                }
                permit = Arc::clone(&self.workers).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    let worker = self.worker_seq.fetch_add(1, Ordering::Relaxed);
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move { manager.deliver(permit, worker, batch).await });
                }
            }
        }
        tracing::debug!("dispatcher stopped");
    }

    /// Pop events through the filter chain into an identity-deduplicated
    /// batch of at most `batch_size` events.
    fn drain_batch(&self) -> Vec<Event> {
        let filters = self.filters.read();
        let mut seen: HashSet<EventKey> = HashSet::new();
        let mut batch = Vec::new();

        while batch.len() < self.config.batch_size {
            let Some(event) = self.queue.pop() else { break };
            let Some(converted) = convert_all(&filters, event) else {
                continue;
            };
            if seen.insert(converted.key()) {
                batch.push(converted);
            }
        }
        batch
    }

    async fn deliver(
        self: Arc<Self>,
        _permit: OwnedSemaphorePermit,
        worker: usize,
        batch: Vec<Event>,
    ) {
        let outcome = if self.availability.is_available() {
            self.sink.deliver(&batch).await
        } else {
            tracing::debug!(
                worker,
                events = batch.len(),
                "sink unavailable, failing batch without dispatch"
            );
            Err(SinkError::Unavailable)
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(worker, events = batch.len(), "batch delivered");
                self.restore_backups().await;
            }
            Err(err) => {
                tracing::warn!(
                    worker,
                    events = batch.len(),
                    error = %err,
                    "batch delivery failed"
                );
                match &self.backup {
                    Some(store) => {
                        if let Err(spill_err) = store.spill(worker, &batch).await {
                            tracing::warn!(
                                events = batch.len(),
                                error = %spill_err,
                                "failed to spill batch, events lost"
                            );
                        }
                    }
                    None => {
                        tracing::warn!(
                            events = batch.len(),
                            "backup disabled, failed batch dropped"
                        );
                    }
                }
            }
        }

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ExtensionFilter, Identity, FILE_PATH};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Sink double recording deliveries and scripted to fail on demand.
    struct ScriptedSink {
        deliveries: Mutex<Vec<Vec<Event>>>,
        fail: AtomicBool,
        reachable: AtomicBool,
    }

    impl ScriptedSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deliveries: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                reachable: AtomicBool::new(true),
            })
        }

        fn delivered(&self) -> Vec<Vec<Event>> {
            self.deliveries.lock().clone()
        }
    }

    #[async_trait]
    impl Sink for ScriptedSink {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn deliver(&self, batch: &[Event]) -> Result<(), SinkError> {
            self.deliveries.lock().push(batch.to_vec());
            if self.fail.load(Ordering::Relaxed) {
                Err(SinkError::transport("scripted failure"))
            } else {
                Ok(())
            }
        }

        async fn probe(&self) -> bool {
            self.reachable.load(Ordering::Relaxed)
        }
    }

    fn path_event(path: &str, kind: ChangeKind) -> Event {
        Event::file_change(kind, &PathBuf::from(path), 0)
    }

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            batch_size: 10,
            worker_pool_size: 2,
            operation_interval: Duration::ZERO,
            monitor_interval: Duration::from_millis(20),
            restore_chunk: 100,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    #[test]
    fn test_add_event_rejects_empty() {
        let manager = EventManager::new(test_config(), ScriptedSink::new(), None);
        manager.add_event(Event::new());
        assert_eq!(manager.queue_len(), 0);
        assert!(!manager.is_executing());
    }

    #[test]
    fn test_add_event_dedups_and_marks_executing() {
        let manager = EventManager::new(test_config(), ScriptedSink::new(), None);
        manager.add_event(path_event("/a", ChangeKind::Create));
        manager.add_event(path_event("/a", ChangeKind::Modify));

        assert_eq!(manager.queue_len(), 1);
        assert!(manager.is_executing());
    }

    #[test]
    fn test_apply_coalesced_marks_executing_only_on_enqueue() {
        let manager = EventManager::new(test_config(), ScriptedSink::new(), None);
        let action = manager.apply_coalesced(
            path_event("/a", ChangeKind::Create),
            ChangeKind::Create,
            |_, _| CoalesceAction::Ignore,
        );
        assert_eq!(action, CoalesceAction::Ignore);
        assert!(!manager.is_executing());

        manager.apply_coalesced(
            path_event("/a", ChangeKind::Create),
            ChangeKind::Create,
            |_, k| CoalesceAction::Enqueue(k),
        );
        assert!(manager.is_executing());
    }

    #[tokio::test]
    async fn test_delivery_roundtrip_and_batch_cap() {
        let sink = ScriptedSink::new();
        let config = ManagerConfig {
            batch_size: 4,
            ..test_config()
        };
        let manager = Arc::new(EventManager::new(
            config,
            Arc::clone(&sink) as Arc<dyn Sink>,
            None,
        ));
        manager.start();
        manager.availability().set_available(true);

        for i in 0..10 {
            manager.add_event(path_event(&format!("/w/{i}.txt"), ChangeKind::Create));
        }
        manager.submit();
        settle().await;

        let deliveries = sink.delivered();
        let total: usize = deliveries.iter().map(Vec::len).sum();
        assert_eq!(total, 10);
        assert!(deliveries.iter().all(|b| b.len() <= 4));
        assert!(!manager.is_executing());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_filters_apply_during_drain() {
        let sink = ScriptedSink::new();
        let manager = Arc::new(EventManager::new(
            test_config(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            None,
        ));
        manager.add_filter(Box::new(ExtensionFilter));
        manager.start();
        manager.availability().set_available(true);

        manager.add_event(path_event("/w/kept.txt", ChangeKind::Create));
        manager.add_event(path_event("/w/noext", ChangeKind::Create));
        manager.submit();
        settle().await;

        let deliveries = sink.delivered();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].len(), 1);
        assert_eq!(deliveries[0][0].path(), Some("/w/kept.txt"));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_circuit_breaker_spills_without_calling_sink() {
        let sink = ScriptedSink::new();
        sink.reachable.store(false, Ordering::Relaxed);
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::open(tmp.path()).unwrap();
        let manager = Arc::new(EventManager::new(
            test_config(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            Some(store),
        ));
        manager.start();

        for i in 0..3 {
            manager.add_event(path_event(&format!("/w/{i}.txt"), ChangeKind::Create));
        }
        manager.submit();
        settle().await;

        assert!(sink.delivered().is_empty());
        let backups: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(backups.len(), 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_restore_chunks_and_submits() {
        let sink = ScriptedSink::new();
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::open(tmp.path()).unwrap();

        let spilled: Vec<Event> = (0..150)
            .map(|i| path_event(&format!("/w/{i}.txt"), ChangeKind::Modify))
            .collect();
        store.spill(0, &spilled).await.unwrap();

        let config = ManagerConfig {
            batch_size: 100,
            ..test_config()
        };
        let manager = Arc::new(EventManager::new(
            config,
            Arc::clone(&sink) as Arc<dyn Sink>,
            Some(store),
        ));

        manager.restore_backups().await;
        assert_eq!(manager.queue_len(), 150);

        manager.availability().set_available(true);
        manager.start();
        settle().await;

        let total: usize = sink.delivered().iter().map(Vec::len).sum();
        assert_eq!(total, 150);
        assert!(!manager.is_executing());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restartable() {
        let sink = ScriptedSink::new();
        let manager = Arc::new(EventManager::new(
            test_config(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            None,
        ));

        manager.start();
        manager.start();
        manager.stop().await;
        manager.stop().await;

        manager.start();
        manager.availability().set_available(true);
        manager.add_event(path_event("/w/a.txt", ChangeKind::Create));
        manager.submit();
        settle().await;

        assert_eq!(sink.delivered().len(), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_structural_identity_batch_dedup() {
        let sink = ScriptedSink::new();
        let manager = Arc::new(EventManager::new(
            test_config(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            None,
        ));
        manager.start();
        manager.availability().set_available(true);

        // same structural content twice; the queue already dedups, so
        // the drained batch carries it once
        let mut event = Event::new();
        event.insert(FILE_PATH, "/w/a.txt");
        event.set_identity(Identity::Structural);
        manager.add_event(event.clone());
        manager.add_event(event);
        manager.submit();
        settle().await;

        let deliveries = sink.delivered();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].len(), 1);

        manager.stop().await;
    }
}
