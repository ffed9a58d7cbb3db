//! Configuration settings and validation.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::{Error, Result};

/// Which sink the agent ships to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SinkKind {
    /// HTTP REST collector.
    #[default]
    Rest,
    /// Search-engine bulk API.
    Bulk,
    /// Local diagnostics logging.
    Logging,
}

/// Main configuration for the Courier agent.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directories to watch (and to scan in scan mode).
    pub watch_roots: Vec<PathBuf>,

    /// Maximum events per dispatch batch.
    pub batch_size: usize,

    /// Number of concurrent delivery workers.
    pub worker_pool_size: usize,

    /// Inter-batch throttle in milliseconds; 0 disables it.
    pub operation_interval_ms: u64,

    /// Whether failed batches are spilled to disk and restored.
    pub backup_enabled: bool,

    /// Directory holding spilled batches.
    pub backup_dir: PathBuf,

    /// Sink reachability probe interval in milliseconds.
    pub monitor_interval_ms: u64,

    /// Drop events whose file name has no extension.
    pub exclude_no_extension: bool,

    /// Regex patterns; a matching path is dropped.
    pub exclude_patterns: Vec<String>,

    /// Regex patterns; when non-empty a path must match one to survive.
    pub include_patterns: Vec<String>,

    /// Selected sink.
    pub sink: SinkKind,

    /// REST collector endpoint URL.
    pub rest_url: Option<String>,

    /// Search engine base URL for the bulk sink.
    pub bulk_url: Option<String>,

    /// Index the bulk sink writes to.
    pub bulk_index: String,

    /// Maximum events per HTTP request of the REST sink.
    pub sub_batch_size: usize,

    /// Pause between consecutive sink requests, in milliseconds.
    pub request_interval_ms: u64,

    /// Retries per failing REST request.
    pub max_retries: u32,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_roots: Vec::new(),
            batch_size: 100,
            worker_pool_size: 10,
            operation_interval_ms: 0,
            backup_enabled: false,
            backup_dir: PathBuf::from("./backup"),
            monitor_interval_ms: 60_000,
            exclude_no_extension: false,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            sink: SinkKind::default(),
            rest_url: None,
            bulk_url: None,
            bulk_index: "courier".to_string(),
            sub_batch_size: 100,
            request_interval_ms: 100,
            max_retries: 5,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }

        if self.worker_pool_size == 0 {
            return Err(Error::config("worker_pool_size cannot be 0"));
        }
        if self.worker_pool_size > 64 {
            return Err(Error::config("worker_pool_size cannot exceed 64"));
        }

        if self.monitor_interval_ms == 0 {
            return Err(Error::config("monitor_interval_ms cannot be 0"));
        }

        if self.sub_batch_size == 0 {
            return Err(Error::config("sub_batch_size cannot be 0"));
        }

        if self.backup_enabled && self.backup_dir.as_os_str().is_empty() {
            return Err(Error::config("backup_dir cannot be empty"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        for pattern in self.exclude_patterns.iter().chain(&self.include_patterns) {
            Regex::new(pattern)
                .map_err(|e| Error::config(format!("invalid pattern '{pattern}': {e}")))?;
        }

        match self.sink {
            SinkKind::Rest if self.rest_url.as_deref().unwrap_or("").is_empty() => {
                Err(Error::config("rest sink requires rest_url"))
            }
            SinkKind::Bulk if self.bulk_url.as_deref().unwrap_or("").is_empty() => {
                Err(Error::config("bulk sink requires bulk_url"))
            }
            _ => Ok(()),
        }
    }

    /// The inter-batch throttle.
    #[must_use]
    pub const fn operation_interval(&self) -> Duration {
        Duration::from_millis(self.operation_interval_ms)
    }

    /// The availability probe cadence.
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// The sink request pacing interval.
    #[must_use]
    pub const fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}
