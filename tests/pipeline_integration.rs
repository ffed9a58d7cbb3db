//! End-to-end tests for the ingestion-and-delivery pipeline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier::error::SinkError;
use courier::event::{ChangeKind, Event};
use courier::manager::{BackupStore, EventManager, ManagerConfig};
use courier::sink::{LogSink, Sink};
use courier::watcher::{ChangeCoalescer, RawKind};
use courier::{Agent, Config, SinkKind};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Sink double recording deliveries, scripted for failure and
/// reachability.
struct ScriptedSink {
    deliveries: Mutex<Vec<Vec<Event>>>,
    fail: AtomicBool,
    reachable: AtomicBool,
}

impl ScriptedSink {
    fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            reachable: AtomicBool::new(reachable),
        })
    }

    fn delivered(&self) -> Vec<Vec<Event>> {
        self.deliveries.lock().clone()
    }

    fn delivered_total(&self) -> usize {
        self.deliveries.lock().iter().map(Vec::len).sum()
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

fn manager_config() -> ManagerConfig {
    ManagerConfig {
        batch_size: 100,
        worker_pool_size: 4,
        operation_interval: Duration::ZERO,
        monitor_interval: Duration::from_millis(50),
        ..ManagerConfig::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

/// Scenario A: create then delete of the same path before any drain
/// nets out to nothing.
#[tokio::test]
async fn create_then_delete_before_drain_yields_empty_batch() {
    let sink = ScriptedSink::new(true);
    let manager = Arc::new(EventManager::new(
        manager_config(),
        Arc::clone(&sink) as Arc<dyn Sink>,
        None,
    ));
    manager.availability().set_available(true);
    let coalescer = ChangeCoalescer::new(Arc::clone(&manager));

    let path = PathBuf::from("/watch/a.txt");
    coalescer.apply(RawKind::Create, &path, 1);
    coalescer.apply(RawKind::Delete, &path, 2);
    assert_eq!(manager.queue_len(), 0);

    manager.start();
    manager.submit();
    settle().await;

    assert!(sink.delivered().is_empty());
    manager.stop().await;
}

/// Scenario B: with the sink unavailable, queued events are fast-failed
/// without contacting the sink and spilled as one backup file.
#[tokio::test]
async fn unavailable_sink_spills_one_file_without_dispatch() {
    let tmp = TempDir::new().unwrap();
    let sink = ScriptedSink::new(false);
    let manager = Arc::new(EventManager::new(
        manager_config(),
        Arc::clone(&sink) as Arc<dyn Sink>,
        Some(BackupStore::open(tmp.path()).unwrap()),
    ));
    manager.start();

    for name in ["a", "b", "c"] {
        manager.add_event(Event::file_change(
            ChangeKind::Create,
            &PathBuf::from(format!("/watch/{name}.txt")),
            1,
        ));
    }
    manager.submit();
    settle().await;

    // the circuit breaker kept the sink untouched
    assert!(sink.delivered().is_empty());

    let files: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert_eq!(files.len(), 1);

    // one header line plus one line per event
    let contents = std::fs::read_to_string(files[0].path()).unwrap();
    assert_eq!(contents.lines().count(), 4);

    manager.stop().await;
}

/// Scenario C: a recovery transition restores a 150-event backup in
/// chunks through the live queue and empties the backup directory.
#[tokio::test]
async fn recovery_restores_backup_in_multiple_batches() {
    let tmp = TempDir::new().unwrap();

    let seed = BackupStore::open(tmp.path()).unwrap();
    let events: Vec<Event> = (0..150)
        .map(|i| {
            Event::file_change(ChangeKind::Modify, &PathBuf::from(format!("/watch/{i}.txt")), 1)
        })
        .collect();
    seed.spill(0, &events).await.unwrap();

    // starts unavailable; the first probe flips it and raises Restored
    let sink = ScriptedSink::new(true);
    let manager = Arc::new(EventManager::new(
        manager_config(),
        Arc::clone(&sink) as Arc<dyn Sink>,
        Some(BackupStore::open(tmp.path()).unwrap()),
    ));
    manager.start();
    settle().await;

    assert_eq!(sink.delivered_total(), 150);
    // batch_size 100 forces at least two dispatches
    assert!(sink.delivered().len() >= 2);
    assert!(sink.delivered().iter().all(|b| b.len() <= 100));
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);

    manager.stop().await;
}

/// A batch failing after dispatch spills, and the following recovery
/// redelivers exactly the spilled identities.
#[tokio::test]
async fn failed_delivery_spills_then_redelivers_on_recovery() {
    let tmp = TempDir::new().unwrap();
    let sink = ScriptedSink::new(true);
    sink.fail.store(true, Ordering::Relaxed);
    let manager = Arc::new(EventManager::new(
        manager_config(),
        Arc::clone(&sink) as Arc<dyn Sink>,
        Some(BackupStore::open(tmp.path()).unwrap()),
    ));
    manager.availability().set_available(true);
    manager.start();

    manager.add_event(Event::file_change(
        ChangeKind::Modify,
        &PathBuf::from("/watch/a.txt"),
        1,
    ));
    manager.submit();
    settle().await;

    // delivery was attempted and the batch spilled
    assert_eq!(sink.delivered().len(), 1);
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);

    // heal the sink; simulate the outage window by dropping the flag so
    // the monitor observes a false-to-true transition
    sink.fail.store(false, Ordering::Relaxed);
    manager.availability().set_available(false);
    settle().await;

    let deliveries = sink.delivered();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1][0].path(), Some("/watch/a.txt"));
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);

    manager.stop().await;
}

/// Watch mode end to end: a file created under a watched root reaches
/// the sink.
#[tokio::test]
async fn watch_mode_ships_created_file() {
    let tmp = TempDir::new().unwrap();
    let sink = Arc::new(LogSink::new());
    let config = Config {
        sink: SinkKind::Logging,
        watch_roots: vec![tmp.path().to_path_buf()],
        monitor_interval_ms: 50,
        ..Default::default()
    };
    let agent = Agent::new(&config, Arc::clone(&sink) as Arc<dyn Sink>).unwrap();
    agent.manager().availability().set_available(true);
    agent.start().unwrap();

    // let the OS watch register before touching the tree
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(tmp.path().join("fresh.txt"), "payload").unwrap();

    let mut shipped = 0;
    for _ in 0..50 {
        shipped = sink.count();
        if shipped > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    agent.destroy().await;

    assert!(shipped > 0, "created file never reached the sink");
}

/// Restore is idempotent: a second pass with no new failures finds
/// nothing to redeliver.
#[tokio::test]
async fn second_restore_pass_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let seed = BackupStore::open(tmp.path()).unwrap();
    seed.spill(
        0,
        &[Event::file_change(
            ChangeKind::Create,
            &PathBuf::from("/watch/a.txt"),
            1,
        )],
    )
    .await
    .unwrap();

    let sink = ScriptedSink::new(true);
    let manager = Arc::new(EventManager::new(
        manager_config(),
        Arc::clone(&sink) as Arc<dyn Sink>,
        Some(BackupStore::open(tmp.path()).unwrap()),
    ));
    manager.availability().set_available(true);

    manager.restore_backups().await;
    assert_eq!(manager.queue_len(), 1);

    manager.restore_backups().await;
    assert_eq!(manager.queue_len(), 1);
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}
