//! Search-engine bulk API sink.
//!
//! Ships each batch as one NDJSON `_bulk` request of alternating
//! action and source lines, and treats the response's `errors` flag as
//! the delivery outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::Sink;
use crate::error::SinkError;
use crate::event::Event;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`BulkSink`].
#[derive(Debug, Clone)]
pub struct BulkSinkConfig {
    /// Base URL of the search engine, e.g. `http://localhost:9200`.
    pub base_url: String,
    /// Index the events are written to.
    pub index: String,
    /// Pause after each bulk request.
    pub request_interval: Duration,
}

impl Default for BulkSinkConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            index: "courier".to_string(),
            request_interval: Duration::from_millis(100),
        }
    }
}

/// Sink indexing batches through the bulk endpoint.
#[derive(Debug)]
pub struct BulkSink {
    client: reqwest::Client,
    bulk_url: String,
    ping_url: String,
    config: BulkSinkConfig,
}

impl BulkSink {
    /// Create a bulk sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or index is empty, or the HTTP
    /// client cannot be constructed.
    pub fn new(config: BulkSinkConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::config("bulk base_url is empty"));
        }
        if config.index.is_empty() {
            return Err(Error::config("bulk index is empty"));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        let base = config.base_url.trim_end_matches('/');
        let bulk_url = format!("{base}/_bulk");
        let ping_url = format!("{base}/");

        Ok(Self {
            client,
            bulk_url,
            ping_url,
            config,
        })
    }

    fn ndjson_body(&self, batch: &[Event]) -> std::result::Result<String, SinkError> {
        let action = json!({ "index": { "_index": self.config.index } });
        let mut body = String::new();
        for event in batch {
            body.push_str(&action.to_string());
            body.push('\n');
            let source = serde_json::to_string(event.fields())
                .map_err(|e| SinkError::Rejected(format!("unserializable event: {e}")))?;
            body.push_str(&source);
            body.push('\n');
        }
        Ok(body)
    }

    async fn post_bulk(&self, batch: &[Event]) -> std::result::Result<(), SinkError> {
        let body = self.ndjson_body(batch)?;
        let response = self
            .client
            .post(&self.bulk_url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(SinkError::transport)?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SinkError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| SinkError::transport(format!("unreadable bulk response: {e}")))?;
        if parsed
            .get("errors")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Err(SinkError::Rejected(format!(
                "bulk response reported item failures: {text}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for BulkSink {
    fn name(&self) -> &'static str {
        "bulk"
    }

    async fn deliver(&self, batch: &[Event]) -> std::result::Result<(), SinkError> {
        let outcome = self.post_bulk(batch).await;
        tokio::time::sleep(self.config.request_interval).await;
        outcome
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.ping_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(url = %self.ping_url, error = %err, "ping failed");
                false
            }
        }
    }
}
