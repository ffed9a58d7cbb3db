//! Durable spill area for batches that failed delivery.
//!
//! Each failed batch becomes one JSON Lines file: a version header
//! followed by one event per line. Files are independently restorable
//! and are deleted as soon as they are read, under a restore lock, so
//! a second restore pass finds nothing to redo.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::BackupError;
use crate::event::Event;

/// Prefix identifying backup files in the spill directory.
const FILE_PREFIX: &str = "evbk-";

/// Current backup record format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    version: u32,
    created_ms: i64,
    worker: usize,
    events: usize,
}

/// Directory of spilled batches.
pub struct BackupStore {
    dir: PathBuf,
    restore_lock: Mutex<()>,
}

impl BackupStore {
    /// Open (and create if needed) the backup directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BackupError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            restore_lock: Mutex::new(()),
        })
    }

    /// The spill directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize a failed batch to a uniquely named file.
    ///
    /// The name embeds the creation timestamp and the acting worker so
    /// concurrent failures never collide; a random suffix covers two
    /// spills by the same worker in the same millisecond.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails; the
    /// caller logs it and the batch is lost.
    pub async fn spill(&self, worker: usize, batch: &[Event]) -> Result<PathBuf, BackupError> {
        let created_ms = Utc::now().timestamp_millis();
        let header = Header {
            version: FORMAT_VERSION,
            created_ms,
            worker,
            events: batch.len(),
        };

        let mut contents = serde_json::to_string(&header)
            .map_err(|e| BackupError::Serialize(e.to_string()))?;
        contents.push('\n');
        for event in batch {
            contents.push_str(
                &serde_json::to_string(event)
                    .map_err(|e| BackupError::Serialize(e.to_string()))?,
            );
            contents.push('\n');
        }

        let name = format!(
            "{FILE_PREFIX}{created_ms}-w{worker}-{}.jsonl",
            Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        tokio::fs::write(&path, contents).await?;

        tracing::debug!(path = %path.display(), events = batch.len(), "spilled batch");
        Ok(path)
    }

    /// Read every backup file, delete each after reading, and return
    /// the combined events.
    ///
    /// Serialized by an internal lock so concurrent restore triggers do
    /// not race. A malformed or unreadable file is logged, skipped, and
    /// still deleted — the one accepted data-loss edge case.
    pub async fn drain(&self) -> Vec<Event> {
        let _guard = self.restore_lock.lock().await;

        let files = match self.list_backup_files() {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "cannot list backup directory");
                return Vec::new();
            }
        };

        let mut restored = Vec::new();
        for path in files {
            match self.read_file(&path).await {
                Ok(mut events) => restored.append(&mut events),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to restore backup file");
                }
            }
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to delete backup file");
            }
        }
        restored
    }

    /// Whether any backup files are present.
    #[must_use]
    pub fn has_backups(&self) -> bool {
        self.list_backup_files().map(|f| !f.is_empty()).unwrap_or(false)
    }

    fn list_backup_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(FILE_PREFIX))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<Event>, BackupError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let mut lines = contents.lines();

        let header_line = lines.next().ok_or_else(|| BackupError::Malformed {
            path: path.display().to_string(),
            reason: "empty file".to_string(),
        })?;
        let header: Header =
            serde_json::from_str(header_line).map_err(|e| BackupError::Malformed {
                path: path.display().to_string(),
                reason: format!("bad header: {e}"),
            })?;
        if header.version != FORMAT_VERSION {
            return Err(BackupError::Malformed {
                path: path.display().to_string(),
                reason: format!("unsupported version {}", header.version),
            });
        }

        let mut events = Vec::with_capacity(header.events);
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(line).map_err(|e| BackupError::Malformed {
                path: path.display().to_string(),
                reason: format!("bad event record: {e}"),
            })?;
            events.push(event);
        }
        Ok(events)
    }
}
