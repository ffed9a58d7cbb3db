//! Periodic sink reachability monitor and the shared availability flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Sink;

/// Shared circuit-breaker flag read by delivery workers before each
/// attempt and written by the monitor after each probe.
///
/// Starts unavailable; the first successful probe opens the circuit.
#[derive(Debug, Clone, Default)]
pub struct Availability {
    flag: Arc<AtomicBool>,
}

impl Availability {
    /// Create a flag in the unavailable state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sink is currently considered reachable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Record a probe result.
    pub fn set_available(&self, available: bool) {
        self.flag.store(available, Ordering::Release);
    }
}

/// Notification raised by the monitor, consumed by the event manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The sink transitioned from unreachable to reachable.
    Restored,
}

/// Periodic probe task gating dispatch to a possibly-down collector.
pub struct AvailabilityMonitor {
    sink: Arc<dyn Sink>,
    availability: Availability,
    interval: Duration,
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl AvailabilityMonitor {
    /// Create a monitor probing `sink` every `interval`.
    #[must_use]
    pub fn new(
        sink: Arc<dyn Sink>,
        availability: Availability,
        interval: Duration,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        Self {
            sink,
            availability,
            interval,
            events,
        }
    }

    /// Spawn the monitor loop. The first probe fires immediately so the
    /// initial unavailable window stays short. The task exits when the
    /// token is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => self.probe_once().await,
                }
            }
        })
    }

    async fn probe_once(&self) {
        let before = self.availability.is_available();
        let after = self.sink.probe().await;
        self.availability.set_available(after);

        if after == before {
            return;
        }
        if after {
            tracing::info!(sink = self.sink.name(), "sink restored");
            // the manager reacts by re-queuing spilled batches
            let _ = self.events.send(MonitorEvent::Restored);
        } else {
            tracing::info!(sink = self.sink.name(), "sink is not available");
        }
    }
}
