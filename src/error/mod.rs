//! Error types and Result aliases for Courier.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use thiserror::Error;

/// Result type alias using Courier's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Courier operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// File watching error.
    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    /// Delivery sink error.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Backup store error.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Failed to establish a watch on a root.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },
}

/// Delivery sink errors.
///
/// `deliver` returns exactly one of these per batch; the manager reacts
/// by spilling the batch to the backup store.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The availability monitor reports the collector as down; the
    /// batch was failed without contacting it.
    #[error("sink unavailable (circuit open)")]
    Unavailable,

    /// The request could not be sent or the response not read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collector answered with a non-success status.
    #[error("HTTP error: status {status}: {body}")]
    Http { status: u16, body: String },

    /// The collector accepted the request but rejected its contents.
    #[error("rejected by collector: {0}")]
    Rejected(String),
}

/// Backup store errors.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Failed to serialize a batch for spilling.
    #[error("failed to serialize batch: {0}")]
    Serialize(String),

    /// A backup file could not be parsed during restore.
    #[error("malformed backup file '{path}': {reason}")]
    Malformed { path: String, reason: String },

    /// Backup directory or file I/O failure.
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl SinkError {
    /// Create a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }
}
