//! Local diagnostics sink: logs every event instead of shipping it.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::Sink;
use crate::error::SinkError;
use crate::event::Event;

/// Sink that logs each delivered event with a running counter.
///
/// Always succeeds and is always reachable; used to inspect the
/// pipeline without a collector.
#[derive(Debug, Default)]
pub struct LogSink {
    count: AtomicU64,
}

impl LogSink {
    /// Create a new logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events logged so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn deliver(&self, batch: &[Event]) -> Result<(), SinkError> {
        for event in batch {
            let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(
                count,
                event = %serde_json::Value::Object(event.fields().clone()),
                "event"
            );
        }
        Ok(())
    }

    async fn probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_log_sink_counts_events() {
        let sink = LogSink::new();
        let batch = vec![
            Event::file_change(ChangeKind::Create, &PathBuf::from("/a"), 1),
            Event::file_change(ChangeKind::Delete, &PathBuf::from("/b"), 2),
        ];

        sink.deliver(&batch).await.unwrap();
        sink.deliver(&batch[..1]).await.unwrap();

        assert_eq!(sink.count(), 3);
        assert!(sink.probe().await);
    }
}
