use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MigrationError;
use crate::util::atomic_write;

/// Checkpoint file name, stored beside the database
pub const CHECKPOINT_FILE: &str = "migration_progress.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// Persisted migration checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationProgress {
    pub state: MigrationState,
    /// 0.0 ..= 100.0
    pub percentage: f64,
    /// Zero-based index of the last committed batch
    pub last_batch_index: Option<u64>,
    pub total_batches: u64,
    pub last_processed_article_id: Option<Uuid>,
    pub migrated_article_ids: BTreeSet<Uuid>,
    pub migrated_topic_names: BTreeSet<String>,
    pub skipped_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub interrupted: bool,
    pub last_error: Option<String>,
}

impl MigrationProgress {
    /// First batch a (re)started run should read
    pub fn next_batch_index(&self) -> u64 {
        self.last_batch_index.map_or(0, |i| i + 1)
    }

    pub(crate) fn record_batch(&mut self, batch_index: u64) {
        self.last_batch_index = Some(batch_index);
        self.percentage = if self.total_batches == 0 {
            100.0
        } else {
            ((batch_index + 1) as f64 / self.total_batches as f64 * 100.0).min(100.0)
        };
    }
}

/// Reads and writes the checkpoint file with write-temp-then-rename.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint path for a database file
    pub fn beside(db_path: &Path) -> Self {
        let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(dir.join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file reads as a fresh checkpoint. An unreadable one is logged
    /// and also treated as fresh: re-running skips articles already stored.
    pub fn load(&self) -> MigrationProgress {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return MigrationProgress::default()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cannot read migration checkpoint");
                return MigrationProgress::default();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt migration checkpoint, starting over");
                MigrationProgress::default()
            }
        }
    }

    /// Blocking save; safe to call from a termination hook.
    pub fn save(&self, progress: &MigrationProgress) -> Result<(), MigrationError> {
        let mut progress = progress.clone();
        progress.last_updated = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&progress)?;
        atomic_write(&self.path, &bytes).map_err(MigrationError::Checkpoint)
    }

    /// Save from async code without blocking the runtime thread
    pub async fn save_async(&self, progress: &MigrationProgress) -> Result<(), MigrationError> {
        let store = self.clone();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || store.save(&progress))
            .await
            .map_err(|e| MigrationError::Task(e.to_string()))?
    }

    pub fn remove(&self) -> Result<(), MigrationError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigrationError::Checkpoint(e)),
        }
    }
}
