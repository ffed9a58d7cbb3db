//! REST collector sink: POSTs JSON arrays of events.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use super::Sink;
use crate::error::SinkError;
use crate::event::Event;
use crate::{Error, Result};

/// Connect and response timeout for collector requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound of the random jitter added to the pacing sleep.
const PACING_JITTER_MS: u64 = 50;

/// Settings for [`RestSink`].
#[derive(Debug, Clone)]
pub struct RestSinkConfig {
    /// Collector endpoint URL.
    pub url: String,
    /// Maximum events per HTTP request; larger batches are split.
    pub sub_batch_size: usize,
    /// Pause between consecutive requests of one delivery.
    pub request_interval: Duration,
    /// Retries per failing request before the whole batch fails.
    pub max_retries: u32,
}

impl Default for RestSinkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            sub_batch_size: 100,
            request_interval: Duration::from_millis(100),
            max_retries: 5,
        }
    }
}

/// Sink shipping batches to an HTTP REST collector.
///
/// A batch is sent as one or more sub-batch requests; each failing
/// request is retried up to `max_retries` times with a pacing sleep in
/// between, and a successful sub-batch resets the retry budget. If any
/// sub-batch exhausts its retries the whole batch fails, including the
/// parts already accepted (delivery is at-least-once).
#[derive(Debug)]
pub struct RestSink {
    client: reqwest::Client,
    config: RestSinkConfig,
}

impl RestSink {
    /// Create a REST sink.
    ///
    /// The client trusts self-signed certificates so agents can ship to
    /// collectors with private CAs.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty or the HTTP client cannot
    /// be constructed.
    pub fn new(config: RestSinkConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::config("collector url is empty"));
        }
        if config.sub_batch_size == 0 {
            return Err(Error::config("sub_batch_size cannot be 0"));
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn post(&self, events: &[Event]) -> std::result::Result<(), SinkError> {
        let payload: Vec<&serde_json::Map<String, Value>> =
            events.iter().map(Event::fields).collect();

        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await
            .map_err(SinkError::transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn pace(&self) {
        let jitter = rand::thread_rng().gen_range(0..=PACING_JITTER_MS);
        tokio::time::sleep(self.config.request_interval + Duration::from_millis(jitter)).await;
    }
}

#[async_trait]
impl Sink for RestSink {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn deliver(&self, batch: &[Event]) -> std::result::Result<(), SinkError> {
        let mut start = 0;
        let mut retries = 0;

        while start < batch.len() {
            let end = usize::min(start + self.config.sub_batch_size, batch.len());

            match self.post(&batch[start..end]).await {
                Ok(()) => {
                    start = end;
                    retries = 0;
                }
                Err(err) => {
                    tracing::warn!(
                        url = %self.config.url,
                        retries,
                        error = %err,
                        "collector request failed"
                    );
                    if retries >= self.config.max_retries {
                        return Err(err);
                    }
                    retries += 1;
                }
            }

            if start < batch.len() {
                self.pace().await;
            }
        }

        Ok(())
    }

    async fn probe(&self) -> bool {
        // any HTTP response counts as reachable; only transport
        // failures mean the collector is down
        match self.client.head(&self.config.url).send().await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(url = %self.config.url, error = %err, "probe failed");
                false
            }
        }
    }
}
