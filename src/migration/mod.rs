//! One-time, resumable migration from the legacy article store.
//!
//! Records are copied in batches of [`MIGRATION_BATCH_SIZE`]; each batch is one
//! store transaction, followed by an independently persisted checkpoint
//! ([`MigrationProgress`]). A restart resumes from the batch after the last
//! checkpoint. Records already present in the current store are counted as
//! migrated, so a crash between a data commit and its checkpoint is harmless.

mod legacy;
mod progress;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

pub use legacy::{
    derive_article_id, legacy_priority, transform, LegacyRecord, LegacyStore, LegacyTopic,
    SqliteLegacyStore,
};
pub use progress::{MigrationProgress, MigrationState, ProgressStore, CHECKPOINT_FILE};

use crate::storage::{Database, InsertStatus, StoreError};

/// Legacy records read and written per transaction
pub const MIGRATION_BATCH_SIZE: u64 = 10;

/// Preference key set once migration completes
const COMPLETED_KEY: &str = "migration.completed_at";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Legacy store read failed: {0}")]
    Legacy(sqlx::Error),

    #[error("Current store write failed: {0}")]
    Store(#[from] StoreError),

    #[error("Checkpoint I/O failed: {0}")]
    Checkpoint(std::io::Error),

    #[error("Checkpoint encoding failed: {0}")]
    CheckpointFormat(#[from] serde_json::Error),

    #[error("Malformed legacy record: {0}")]
    Transform(String),

    #[error("Migration task failed: {0}")]
    Task(String),
}

/// Result of waiting on a migration with a UI deadline
#[derive(Debug)]
pub enum MigrationWait {
    /// The migration returned before the deadline
    Finished(Result<bool, MigrationError>),
    /// The deadline passed; the migration keeps running on this handle
    TimedOut(JoinHandle<Result<bool, MigrationError>>),
}

/// Clears the running flag when a run ends, however it ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct MigrationEngine {
    db: Database,
    legacy: Option<Arc<dyn LegacyStore>>,
    store: ProgressStore,
    progress: Arc<Mutex<MigrationProgress>>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl MigrationEngine {
    /// Build an engine, loading any checkpoint left by a previous run.
    pub fn new(db: Database, legacy: Option<Arc<dyn LegacyStore>>, store: ProgressStore) -> Self {
        let progress = store.load();
        if progress.state == MigrationState::InProgress {
            tracing::info!(
                next_batch = progress.next_batch_index(),
                interrupted = progress.interrupted,
                "Found unfinished migration checkpoint"
            );
        }
        Self {
            db,
            legacy,
            store,
            progress: Arc::new(Mutex::new(progress)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Snapshot of the current progress
    pub fn progress(&self) -> MigrationProgress {
        self.progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn set_progress(&self, progress: &MigrationProgress) {
        if let Ok(mut shared) = self.progress.lock() {
            *shared = progress.clone();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True when a legacy store holds data that has not been migrated yet.
    pub async fn check_migration_status(&self) -> Result<bool, MigrationError> {
        if self.progress().state == MigrationState::Completed {
            return Ok(false);
        }
        if self.db.get_preference(COMPLETED_KEY).await?.is_some() {
            return Ok(false);
        }
        let Some(legacy) = &self.legacy else {
            return Ok(false);
        };
        if !legacy.is_present().await? {
            return Ok(false);
        }
        Ok(legacy.count_articles().await? > 0)
    }

    /// A previous run was cut short and has not finished since.
    pub fn was_migration_interrupted(&self) -> bool {
        let progress = self.progress();
        match progress.state {
            MigrationState::InProgress => progress.interrupted || !self.is_running(),
            MigrationState::NotStarted | MigrationState::Completed | MigrationState::Failed => {
                false
            }
        }
    }

    /// Ask a running migration to stop after the current batch.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Flag the run as interrupted and persist the checkpoint synchronously.
    pub fn app_will_terminate(&self) {
        self.cancel();
        let mut progress = self.progress();
        if progress.state != MigrationState::InProgress {
            return;
        }
        progress.interrupted = true;
        self.set_progress(&progress);
        if let Err(e) = self.store.save(&progress) {
            tracing::error!(error = %e, "Failed to persist migration checkpoint on exit");
        } else {
            tracing::info!(
                last_batch = ?progress.last_batch_index,
                "Migration checkpoint saved for resume"
            );
        }
    }

    /// Discard a failed run's checkpoint so the next run starts from scratch.
    ///
    /// Articles it already copied are recognized and skipped on the rerun.
    pub fn reset_failed(&self) -> Result<bool, MigrationError> {
        if self.progress().state != MigrationState::Failed || self.is_running() {
            return Ok(false);
        }
        let fresh = MigrationProgress::default();
        self.store.remove()?;
        self.set_progress(&fresh);
        Ok(true)
    }

    /// Run (or resume) the migration.
    ///
    /// Returns `Ok(true)` once everything is migrated (including when there is
    /// nothing to migrate), `Ok(false)` if cancelled or another run is active.
    pub async fn migrate_all_data(&self) -> Result<bool, MigrationError> {
        if self.progress().state == MigrationState::Completed {
            return Ok(true);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Migration already running, skipping");
            return Ok(false);
        }
        let _guard = RunningGuard(Arc::clone(&self.running));
        self.cancel.store(false, Ordering::Release);

        let mut progress = self.progress();
        match self.run(&mut progress).await {
            Ok(completed) => Ok(completed),
            Err(e) => {
                tracing::error!(error = %e, last_batch = ?progress.last_batch_index, "Migration failed");
                progress.state = MigrationState::Failed;
                progress.last_error = Some(e.to_string());
                self.set_progress(&progress);
                if let Err(save_err) = self.store.save_async(&progress).await {
                    tracing::error!(error = %save_err, "Failed to persist failed migration state");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, progress: &mut MigrationProgress) -> Result<bool, MigrationError> {
        let legacy = match &self.legacy {
            Some(legacy) if legacy.is_present().await? => Arc::clone(legacy),
            _ => {
                tracing::info!("No legacy store present, nothing to migrate");
                self.complete(progress).await?;
                return Ok(true);
            }
        };

        let total = legacy.count_articles().await?;
        progress.total_batches = total.div_ceil(MIGRATION_BATCH_SIZE);
        progress.state = MigrationState::InProgress;
        progress.interrupted = false;
        progress.last_error = None;
        self.checkpoint(progress).await?;

        let start = progress.next_batch_index();
        tracing::info!(
            total_records = total,
            total_batches = progress.total_batches,
            start_batch = start,
            "Starting legacy migration"
        );

        self.migrate_topics(legacy.as_ref(), progress).await?;

        for batch_index in start..progress.total_batches {
            if self.cancel.load(Ordering::Acquire) {
                progress.interrupted = true;
                self.checkpoint(progress).await?;
                tracing::info!(next_batch = batch_index, "Migration cancelled between batches");
                return Ok(false);
            }

            let records = legacy
                .read_batch(batch_index * MIGRATION_BATCH_SIZE, MIGRATION_BATCH_SIZE)
                .await?;
            self.migrate_batch(records, progress).await?;

            progress.record_batch(batch_index);
            self.checkpoint(progress).await?;
            tracing::debug!(
                batch = batch_index,
                percentage = progress.percentage,
                migrated = progress.migrated_article_ids.len(),
                "Migration batch committed"
            );
        }

        self.complete(progress).await?;
        tracing::info!(
            migrated = progress.migrated_article_ids.len(),
            skipped = progress.skipped_count,
            topics = progress.migrated_topic_names.len(),
            "Legacy migration complete"
        );
        Ok(true)
    }

    /// Topics first, so their priorities win over defaults created by article inserts.
    async fn migrate_topics(
        &self,
        legacy: &dyn LegacyStore,
        progress: &mut MigrationProgress,
    ) -> Result<(), MigrationError> {
        for topic in legacy.read_topics().await? {
            if progress.migrated_topic_names.contains(&topic.name) {
                continue;
            }
            match self
                .db
                .ensure_topic(&topic.name, legacy_priority(topic.priority.as_deref()))
                .await
            {
                Ok(()) => {
                    progress.migrated_topic_names.insert(topic.name);
                }
                Err(StoreError::Validation(reason)) => {
                    tracing::warn!(reason = %reason, "Skipping invalid legacy topic");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn migrate_batch(
        &self,
        records: Vec<legacy::LegacyRecord>,
        progress: &mut MigrationProgress,
    ) -> Result<(), MigrationError> {
        let now = chrono::Utc::now().timestamp();
        let mut articles = Vec::with_capacity(records.len());

        for record in records {
            let rowid = record.rowid;
            let article = match transform(record, now) {
                Ok(article) => article,
                Err(e) => {
                    tracing::warn!(rowid = rowid, error = %e, "Skipping malformed legacy record");
                    progress.skipped_count += 1;
                    continue;
                }
            };

            if progress.migrated_article_ids.contains(&article.id) {
                continue;
            }
            // Committed by a run that died before its checkpoint
            if self.db.get_article(article.id).await?.is_some() {
                progress.migrated_article_ids.insert(article.id);
                continue;
            }
            articles.push(article);
        }

        let statuses = self.db.insert_articles(&articles).await?;
        for (article, status) in articles.iter().zip(statuses) {
            match status {
                InsertStatus::Inserted | InsertStatus::Duplicate => {
                    progress.migrated_article_ids.insert(article.id);
                    progress.last_processed_article_id = Some(article.id);
                }
                InsertStatus::Failed(reason) => {
                    tracing::warn!(id = %article.id, reason = %reason, "Legacy record insert failed");
                    progress.skipped_count += 1;
                }
            }
        }
        Ok(())
    }

    async fn checkpoint(&self, progress: &MigrationProgress) -> Result<(), MigrationError> {
        self.set_progress(progress);
        self.store.save_async(progress).await
    }

    async fn complete(&self, progress: &mut MigrationProgress) -> Result<(), MigrationError> {
        progress.state = MigrationState::Completed;
        progress.percentage = 100.0;
        progress.interrupted = false;
        progress.last_error = None;
        self.checkpoint(progress).await?;
        self.db
            .set_preference(COMPLETED_KEY, &chrono::Utc::now().timestamp().to_string())
            .await?;
        Ok(())
    }

    /// Finish any pending legacy import before other writers touch the store.
    ///
    /// Returns `Ok(true)` once nothing is left to migrate. A run that outlives
    /// `ui_wait` keeps going and is awaited to the end.
    pub async fn ensure_migrated(&self, ui_wait: Duration) -> Result<bool, MigrationError> {
        if !self.check_migration_status().await? {
            return Ok(true);
        }
        match self.run_with_ui_timeout(ui_wait).await {
            MigrationWait::Finished(result) => result,
            MigrationWait::TimedOut(handle) => handle
                .await
                .map_err(|e| MigrationError::Task(e.to_string()))?,
        }
    }

    /// Start the migration on a background task and wait at most `wait`.
    ///
    /// The migration is never cancelled by the deadline; a timed-out wait
    /// hands back the handle so the caller can keep going.
    pub async fn run_with_ui_timeout(&self, wait: Duration) -> MigrationWait {
        let engine = self.clone();
        let mut handle = tokio::spawn(async move { engine.migrate_all_data().await });

        match tokio::time::timeout(wait, &mut handle).await {
            Ok(Ok(result)) => MigrationWait::Finished(result),
            Ok(Err(join_err)) => {
                MigrationWait::Finished(Err(MigrationError::Task(join_err.to_string())))
            }
            Err(_) => {
                tracing::warn!(
                    wait_secs = wait.as_secs(),
                    "Migration still running after UI timeout, continuing in background"
                );
                MigrationWait::TimedOut(handle)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{new_article, test_db};
    use crate::storage::{InsertStatus, NotificationPriority};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// In-memory legacy store with an optional hook on each batch read
    #[derive(Default)]
    struct MemoryLegacy {
        records: Vec<LegacyRecord>,
        topics: Vec<LegacyTopic>,
        reads: AtomicUsize,
        fail_on_read: Option<usize>,
        delay: Option<Duration>,
        cancel_on_read: Mutex<Option<(usize, Arc<AtomicBool>)>>,
    }

    #[async_trait]
    impl LegacyStore for MemoryLegacy {
        async fn is_present(&self) -> Result<bool, MigrationError> {
            Ok(true)
        }

        async fn count_articles(&self) -> Result<u64, MigrationError> {
            Ok(self.records.len() as u64)
        }

        async fn read_batch(
            &self,
            offset: u64,
            limit: u64,
        ) -> Result<Vec<LegacyRecord>, MigrationError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some((at, flag)) = self.cancel_on_read.lock().unwrap().as_ref() {
                if *at == n {
                    flag.store(true, Ordering::Release);
                }
            }
            if self.fail_on_read == Some(n) {
                return Err(MigrationError::Legacy(sqlx::Error::PoolClosed));
            }
            Ok(self
                .records
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn read_topics(&self) -> Result<Vec<LegacyTopic>, MigrationError> {
            Ok(self.topics.clone())
        }
    }

    fn records(n: i64) -> Vec<LegacyRecord> {
        (1..=n)
            .map(|rowid| LegacyRecord {
                rowid,
                json_url: Some(format!("https://legacy/{rowid}.json")),
                article_title: Some(format!("Legacy {rowid}")),
                topic: Some("Politics".to_string()),
                ..Default::default()
            })
            .collect()
    }

    fn engine(db: &Database, legacy: MemoryLegacy, dir: &tempfile::TempDir) -> MigrationEngine {
        MigrationEngine::new(
            db.clone(),
            Some(Arc::new(legacy)),
            ProgressStore::new(dir.path().join(CHECKPOINT_FILE)),
        )
    }

    #[tokio::test]
    async fn test_no_legacy_store_completes_immediately() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = MigrationEngine::new(
            db.clone(),
            None,
            ProgressStore::new(dir.path().join(CHECKPOINT_FILE)),
        );

        assert!(!engine.check_migration_status().await.unwrap());
        assert!(engine.migrate_all_data().await.unwrap());
        assert_eq!(engine.progress().state, MigrationState::Completed);
    }

    #[tokio::test]
    async fn test_full_migration_with_topics_and_malformed() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let mut recs = records(25);
        recs[4].article_title = None;
        let legacy = MemoryLegacy {
            records: recs,
            topics: vec![LegacyTopic {
                name: "Politics".to_string(),
                priority: Some("high".to_string()),
            }],
            ..Default::default()
        };
        let engine = engine(&db, legacy, &dir);

        assert!(engine.check_migration_status().await.unwrap());
        assert!(engine.migrate_all_data().await.unwrap());

        let progress = engine.progress();
        assert_eq!(progress.state, MigrationState::Completed);
        assert_eq!(progress.total_batches, 3);
        assert_eq!(progress.last_batch_index, Some(2));
        assert_eq!(progress.migrated_article_ids.len(), 24);
        assert_eq!(progress.skipped_count, 1);
        assert!(progress.migrated_topic_names.contains("Politics"));
        assert_eq!(db.count_articles().await.unwrap(), 24);
        assert_eq!(
            db.get_topic("Politics").await.unwrap().unwrap().priority,
            NotificationPriority::High
        );

        // Completion short-circuits later checks
        assert!(!engine.check_migration_status().await.unwrap());
        assert!(engine.migrate_all_data().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_batch_preserves_progress_and_retries() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let legacy = MemoryLegacy {
            records: records(30),
            fail_on_read: Some(2),
            ..Default::default()
        };
        let engine = engine(&db, legacy, &dir);

        let err = engine.migrate_all_data().await.unwrap_err();
        assert!(matches!(err, MigrationError::Legacy(_)));
        let progress = engine.progress();
        assert_eq!(progress.state, MigrationState::Failed);
        assert_eq!(progress.last_batch_index, Some(0));
        assert!(progress.last_error.is_some());

        // Next launch resumes from the checkpoint on disk
        let retry = MigrationEngine::new(
            db.clone(),
            Some(Arc::new(MemoryLegacy {
                records: records(30),
                ..Default::default()
            })),
            ProgressStore::new(dir.path().join(CHECKPOINT_FILE)),
        );
        assert!(retry.migrate_all_data().await.unwrap());
        assert_eq!(retry.progress().migrated_article_ids.len(), 30);
        assert_eq!(db.count_articles().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_cancelled_run_resumes_after_last_committed_batch() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let mut recs = records(1000);
        recs[10].article_title = None;
        recs[990].article_title = None;

        let legacy = Arc::new(MemoryLegacy {
            records: recs.clone(),
            ..Default::default()
        });
        let engine = MigrationEngine::new(
            db.clone(),
            Some(legacy.clone()),
            ProgressStore::new(dir.path().join(CHECKPOINT_FILE)),
        );
        *legacy.cancel_on_read.lock().unwrap() = Some((40, Arc::clone(&engine.cancel)));

        assert!(!engine.migrate_all_data().await.unwrap());
        let progress = engine.progress();
        assert_eq!(progress.state, MigrationState::InProgress);
        assert_eq!(progress.last_batch_index, Some(39));
        assert!(progress.interrupted);
        assert_eq!(legacy.reads.load(Ordering::SeqCst), 40);
        assert_eq!(db.count_articles().await.unwrap(), 399);

        // Relaunch: a fresh engine picks up the checkpoint from disk
        let resumed_legacy = Arc::new(MemoryLegacy {
            records: recs,
            ..Default::default()
        });
        let resumed = MigrationEngine::new(
            db.clone(),
            Some(resumed_legacy.clone()),
            ProgressStore::new(dir.path().join(CHECKPOINT_FILE)),
        );
        assert!(resumed.was_migration_interrupted());
        assert_eq!(resumed.progress().next_batch_index(), 40);

        assert!(resumed.migrate_all_data().await.unwrap());
        assert_eq!(resumed_legacy.reads.load(Ordering::SeqCst), 60);

        let progress = resumed.progress();
        assert_eq!(progress.state, MigrationState::Completed);
        assert_eq!(progress.migrated_article_ids.len(), 998);
        assert_eq!(progress.skipped_count, 2);
        assert!(!resumed.was_migration_interrupted());
        assert_eq!(db.count_articles().await.unwrap(), 998);
    }

    #[tokio::test]
    async fn test_existing_rows_count_as_migrated() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();

        // Simulate a commit that landed without its checkpoint
        let first = transform(records(1).remove(0), 0).unwrap();
        db.insert_articles(&[first.clone()]).await.unwrap();

        let engine = engine(
            &db,
            MemoryLegacy {
                records: records(3),
                ..Default::default()
            },
            &dir,
        );
        assert!(engine.migrate_all_data().await.unwrap());
        let progress = engine.progress();
        assert_eq!(progress.migrated_article_ids.len(), 3);
        assert!(progress.migrated_article_ids.contains(&first.id));
        assert_eq!(progress.skipped_count, 0);
        assert_eq!(db.count_articles().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_second_concurrent_run_returns_immediately() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(
            &db,
            MemoryLegacy {
                records: records(20),
                delay: Some(Duration::from_millis(50)),
                ..Default::default()
            },
            &dir,
        );

        let (a, b) = tokio::join!(engine.migrate_all_data(), engine.migrate_all_data());
        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|done| **done).count(), 1);
        assert_eq!(db.count_articles().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_ui_timeout_leaves_migration_running() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(
            &db,
            MemoryLegacy {
                records: records(30),
                delay: Some(Duration::from_millis(100)),
                ..Default::default()
            },
            &dir,
        );

        match engine.run_with_ui_timeout(Duration::from_millis(20)).await {
            MigrationWait::TimedOut(handle) => {
                assert!(handle.await.unwrap().unwrap());
            }
            MigrationWait::Finished(_) => panic!("migration should outlive the UI deadline"),
        }
        assert_eq!(engine.progress().state, MigrationState::Completed);
        assert_eq!(db.count_articles().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_ensure_migrated_lands_legacy_state_before_new_inserts() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let mut recs = records(12);
        recs[0].read = Some(true);
        recs[0].bookmarked = Some(true);
        let legacy = Arc::new(MemoryLegacy {
            records: recs,
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let engine = MigrationEngine::new(
            db.clone(),
            Some(legacy.clone() as Arc<dyn LegacyStore>),
            ProgressStore::new(dir.path().join(CHECKPOINT_FILE)),
        );

        // Outlives the UI wait but is still awaited
        assert!(engine.ensure_migrated(Duration::from_millis(1)).await.unwrap());
        assert_eq!(engine.progress().state, MigrationState::Completed);
        assert_eq!(db.count_articles().await.unwrap(), 12);

        // A later sync of the same json_url cannot shadow the legacy row
        let statuses = db
            .insert_articles(&[new_article("https://legacy/1.json", "Fresh copy")])
            .await
            .unwrap();
        assert_eq!(statuses, vec![InsertStatus::Duplicate]);
        let kept = db
            .get_article_by_json_url("https://legacy/1.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.title, "Legacy 1");
        assert!(kept.is_viewed);
        assert!(kept.is_bookmarked);

        let reads = legacy.reads.load(Ordering::SeqCst);
        assert!(engine.ensure_migrated(Duration::from_millis(1)).await.unwrap());
        assert_eq!(legacy.reads.load(Ordering::SeqCst), reads);
    }

    #[tokio::test]
    async fn test_app_will_terminate_flags_interruption() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join(CHECKPOINT_FILE));
        store
            .save(&MigrationProgress {
                state: MigrationState::InProgress,
                last_batch_index: Some(3),
                total_batches: 10,
                ..Default::default()
            })
            .unwrap();

        let engine = MigrationEngine::new(db, None, store.clone());
        assert!(engine.was_migration_interrupted());
        engine.app_will_terminate();

        let saved = store.load();
        assert!(saved.interrupted);
        assert_eq!(saved.last_batch_index, Some(3));
    }

    #[tokio::test]
    async fn test_reset_failed() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join(CHECKPOINT_FILE));
        store
            .save(&MigrationProgress {
                state: MigrationState::Failed,
                last_batch_index: Some(1),
                last_error: Some("disk".to_string()),
                ..Default::default()
            })
            .unwrap();

        let engine = MigrationEngine::new(db, None, store.clone());
        assert!(engine.reset_failed().unwrap());
        assert_eq!(engine.progress(), MigrationProgress::default());
        assert!(!store.path().exists());
        assert!(!engine.reset_failed().unwrap());
    }
}
