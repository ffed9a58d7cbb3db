//! Delivery sinks: the collector-facing side of the pipeline.
//!
//! A [`Sink`] ships one batch per `deliver` call and reports exactly
//! one success or error outcome for it. Recovery notifications do not
//! flow through the sink; the [`monitor::AvailabilityMonitor`] probes
//! reachability on its own schedule and raises them on a channel.

mod bulk;
mod logging;
pub mod monitor;
mod rest;

pub use bulk::{BulkSink, BulkSinkConfig};
pub use logging::LogSink;
pub use monitor::{Availability, AvailabilityMonitor, MonitorEvent};
pub use rest::{RestSink, RestSinkConfig};

use async_trait::async_trait;

use crate::error::SinkError;
use crate::event::Event;

/// A destination for event batches.
///
/// Implementations own their wire protocol, sub-batching, and bounded
/// internal retries; the pipeline only consumes the final outcome.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Ship one batch.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] once internal retries are exhausted; the
    /// caller spills the whole batch to the backup store.
    async fn deliver(&self, batch: &[Event]) -> Result<(), SinkError>;

    /// Lightweight reachability probe used by the availability monitor.
    async fn probe(&self) -> bool;

    /// Release any resources held by the sink. Idempotent.
    async fn close(&self) {}
}
