//! Courier - host-resident change-shipping agent
//!
//! Entry point for the agent.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier::sink::{BulkSink, BulkSinkConfig, LogSink, RestSink, RestSinkConfig, Sink};
use courier::{Agent, Config, SinkKind};
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Courier - host-resident change-shipping agent
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directories to watch or scan
    #[arg(short, long, env = "COURIER_WATCH_ROOTS", value_delimiter = ',')]
    watch: Vec<PathBuf>,

    /// Sink to ship batches to
    #[arg(long, env = "COURIER_SINK", value_enum, default_value = "rest")]
    sink: SinkKind,

    /// REST collector endpoint URL
    #[arg(long, env = "COURIER_REST_URL")]
    rest_url: Option<String>,

    /// Search engine base URL for the bulk sink
    #[arg(long, env = "COURIER_BULK_URL")]
    bulk_url: Option<String>,

    /// Index the bulk sink writes to
    #[arg(long, env = "COURIER_BULK_INDEX", default_value = "courier")]
    bulk_index: String,

    /// Maximum events per dispatch batch
    #[arg(long, env = "COURIER_BATCH_SIZE", default_value = "100")]
    batch_size: usize,

    /// Number of concurrent delivery workers
    #[arg(long, env = "COURIER_WORKERS", default_value = "10")]
    workers: usize,

    /// Inter-batch throttle in milliseconds (0 disables it)
    #[arg(long, env = "COURIER_OPERATION_INTERVAL_MS", default_value = "0")]
    operation_interval_ms: u64,

    /// Spill failed batches to disk and restore them on recovery
    #[arg(long, env = "COURIER_BACKUP")]
    backup: bool,

    /// Directory holding spilled batches
    #[arg(long, env = "COURIER_BACKUP_DIR", default_value = "./backup")]
    backup_dir: PathBuf,

    /// Sink reachability probe interval in milliseconds
    #[arg(long, env = "COURIER_MONITOR_INTERVAL_MS", default_value = "60000")]
    monitor_interval_ms: u64,

    /// Drop events whose file name has no extension
    #[arg(long, env = "COURIER_EXCLUDE_NO_EXTENSION")]
    exclude_no_extension: bool,

    /// Regex patterns; matching paths are dropped
    #[arg(long, env = "COURIER_EXCLUDE", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Regex patterns; when set, a path must match one to survive
    #[arg(long, env = "COURIER_INCLUDE", value_delimiter = ',')]
    include: Vec<String>,

    /// Maximum events per REST request
    #[arg(long, env = "COURIER_SUB_BATCH_SIZE", default_value = "100")]
    sub_batch_size: usize,

    /// Pause between consecutive sink requests, in milliseconds
    #[arg(long, env = "COURIER_REQUEST_INTERVAL_MS", default_value = "100")]
    request_interval_ms: u64,

    /// Retries per failing REST request
    #[arg(long, env = "COURIER_MAX_RETRIES", default_value = "5")]
    max_retries: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "COURIER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "COURIER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the configured roots and ship changes until interrupted
    Watch,
    /// Walk the configured roots once, ship everything, then exit
    Scan,
}

/// Initialize tracing with the given level and output format.
fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);
        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);
        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}

fn build_config(cli: &Cli) -> Config {
    Config {
        watch_roots: cli.watch.clone(),
        batch_size: cli.batch_size,
        worker_pool_size: cli.workers,
        operation_interval_ms: cli.operation_interval_ms,
        backup_enabled: cli.backup,
        backup_dir: cli.backup_dir.clone(),
        monitor_interval_ms: cli.monitor_interval_ms,
        exclude_no_extension: cli.exclude_no_extension,
        exclude_patterns: cli.exclude.clone(),
        include_patterns: cli.include.clone(),
        sink: cli.sink,
        rest_url: cli.rest_url.clone(),
        bulk_url: cli.bulk_url.clone(),
        bulk_index: cli.bulk_index.clone(),
        sub_batch_size: cli.sub_batch_size,
        request_interval_ms: cli.request_interval_ms,
        max_retries: cli.max_retries,
        log_level: cli.log_level.clone(),
        log_json: cli.log_json,
    }
}

fn build_sink(config: &Config) -> courier::Result<Arc<dyn Sink>> {
    match config.sink {
        SinkKind::Rest => {
            let rest = RestSink::new(RestSinkConfig {
                url: config.rest_url.clone().unwrap_or_default(),
                sub_batch_size: config.sub_batch_size,
                request_interval: config.request_interval(),
                max_retries: config.max_retries,
            })?;
            Ok(Arc::new(rest))
        }
        SinkKind::Bulk => {
            let bulk = BulkSink::new(BulkSinkConfig {
                base_url: config.bulk_url.clone().unwrap_or_default(),
                index: config.bulk_index.clone(),
                request_interval: config.request_interval(),
            })?;
            Ok(Arc::new(bulk))
        }
        SinkKind::Logging => Ok(Arc::new(LogSink::new())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);
    tracing::info!("Courier v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = build_config(&cli);
    tracing::debug!(?config, "Configuration loaded");
    config.validate().context("invalid configuration")?;

    let sink = build_sink(&config).context("failed to build sink")?;
    let agent = Agent::new(&config, sink).context("failed to build agent")?;

    match cli.command {
        Command::Watch => {
            agent.start().context("failed to start agent")?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                () = agent.wait_for_stop() => {}
            }
            agent.destroy().await;
        }
        Command::Scan => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                result = agent.scan() => result.context("scan failed")?,
            }
            agent.destroy().await;
        }
    }

    tracing::info!("Application is finished.");
    Ok(())
}
