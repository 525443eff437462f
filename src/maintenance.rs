//! Background upkeep: retention cleanup, duplicate removal, index checks,
//! badge recompute and queued-fetch draining.
//!
//! Each task can run on its own and is safe to repeat. [`MaintenanceCoordinator::run_all`]
//! runs them in sequence; a failing task is logged and the rest still run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::service::{ArticleService, ServiceError, QUEUE_DRAIN_LIMIT};
use crate::storage::IndexReport;

const SECONDS_PER_DAY: i64 = 86_400;

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub articles_removed: u64,
    pub seen_pruned: u64,
}

/// Results of [`MaintenanceCoordinator::run_all`]; `None` marks a task that
/// failed or was skipped.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub cleanup: Option<CleanupReport>,
    pub duplicates_removed: Option<usize>,
    pub indexes: Option<IndexReport>,
    pub queue_drained: Option<usize>,
    pub unread: Option<u64>,
    pub errors: Vec<String>,
}

/// Resets the in-flight flag when dedup finishes
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct MaintenanceCoordinator {
    service: ArticleService,
    retention_days: u32,
    dedup_in_flight: Arc<AtomicBool>,
}

impl MaintenanceCoordinator {
    pub fn new(service: ArticleService, retention_days: u32) -> Self {
        Self {
            service,
            retention_days,
            dedup_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Delete unbookmarked articles added more than `retention_days` ago and
    /// prune seen markers past the same cutoff.
    pub async fn cleanup(&self, retention_days: u32) -> Result<CleanupReport, ServiceError> {
        let cutoff =
            chrono::Utc::now().timestamp() - i64::from(retention_days) * SECONDS_PER_DAY;
        let db = self.service.database();

        let articles_removed = db.delete_articles_older_than(cutoff).await?;
        let seen_pruned = db.prune_seen_older_than(cutoff).await?;

        if articles_removed > 0 {
            self.service.schedule_badge_update();
        }
        tracing::info!(
            retention_days = retention_days,
            articles_removed = articles_removed,
            seen_pruned = seen_pruned,
            "Retention cleanup complete"
        );
        self.record("maintenance.last_cleanup").await;

        Ok(CleanupReport {
            articles_removed,
            seen_pruned,
        })
    }

    /// Run duplicate removal unless a run is already in flight.
    ///
    /// Returns `Ok(None)` without touching the store when another caller holds
    /// the guard.
    pub async fn remove_duplicates(&self) -> Result<Option<usize>, ServiceError> {
        if self
            .dedup_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Duplicate removal already in flight, skipping");
            return Ok(None);
        }
        let _guard = InFlight(Arc::clone(&self.dedup_in_flight));

        let removed = self.service.remove_duplicate_articles().await?;
        if removed > 0 {
            tracing::info!(removed = removed, "Duplicate removal complete");
        }
        self.record("maintenance.last_dedup").await;
        Ok(Some(removed))
    }

    pub async fn verify_indexes(&self) -> Result<IndexReport, ServiceError> {
        let report = self.service.database().ensure_indexes().await?;
        for (name, reason) in &report.skipped {
            tracing::warn!(index = %name, reason = %reason, "Index skipped");
        }
        if !report.created.is_empty() {
            tracing::info!(created = ?report.created, "Created missing indexes");
        }
        self.record("maintenance.last_index_check").await;
        Ok(report)
    }

    /// Recount unread articles and push the count to the badge.
    pub fn update_badge(&self) -> JoinHandle<Option<u64>> {
        self.service.schedule_badge_update()
    }

    pub async fn drain_queue(&self) -> Result<usize, ServiceError> {
        self.service.drain_queue(QUEUE_DRAIN_LIMIT).await
    }

    /// Run every task once, in order.
    pub async fn run_all(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.cleanup(self.retention_days).await {
            Ok(cleanup) => report.cleanup = Some(cleanup),
            Err(e) => report.note_failure("cleanup", e),
        }
        match self.remove_duplicates().await {
            Ok(removed) => report.duplicates_removed = removed,
            Err(e) => report.note_failure("dedup", e),
        }
        match self.verify_indexes().await {
            Ok(indexes) => report.indexes = Some(indexes),
            Err(e) => report.note_failure("indexes", e),
        }
        match self.drain_queue().await {
            Ok(drained) => report.queue_drained = Some(drained),
            Err(e) => report.note_failure("queue", e),
        }
        match self.update_badge().await {
            Ok(unread) => report.unread = unread,
            Err(e) => report.errors.push(format!("badge: {e}")),
        }

        tracing::info!(errors = report.errors.len(), "Maintenance pass finished");
        report
    }

    /// Run [`run_all`](Self::run_all) now and then every `interval`.
    ///
    /// Missed ticks are skipped rather than bunched up.
    pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                coordinator.run_all().await;
            }
        })
    }

    async fn record(&self, key: &str) {
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = self.service.database().record_run(key, now).await {
            tracing::warn!(key = key, error = %e, "Failed to record maintenance run");
        }
    }
}

impl MaintenanceReport {
    fn note_failure(&mut self, task: &str, err: ServiceError) {
        tracing::warn!(task = task, error = %err, "Maintenance task failed");
        self.errors.push(format!("{task}: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ArticleFeed, ArticleJson, FeedError};
    use crate::service::LogBadgeSink;
    use crate::storage::test_support::{new_article, test_db};
    use crate::storage::Database;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct OfflineFeed;

    #[async_trait]
    impl ArticleFeed for OfflineFeed {
        async fn fetch_articles(
            &self,
            _topic: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<ArticleJson>, FeedError> {
            Err(FeedError::HttpStatus(503))
        }

        async fn fetch_article(&self, _json_url: &str) -> Result<ArticleJson, FeedError> {
            Err(FeedError::HttpStatus(503))
        }

        async fn sync_seen(&self, _seen: &[String]) -> Result<Vec<String>, FeedError> {
            Err(FeedError::HttpStatus(503))
        }
    }

    fn coordinator(db: &Database, retention_days: u32) -> (MaintenanceCoordinator, Arc<LogBadgeSink>) {
        let badge = Arc::new(LogBadgeSink::new());
        let service = ArticleService::new(db.clone(), Arc::new(OfflineFeed), badge.clone());
        (MaintenanceCoordinator::new(service, retention_days), badge)
    }

    async fn insert_raw_duplicate(db: &Database, json_url: &str) {
        sqlx::query("INSERT INTO articles (id, json_url, title, added_date) VALUES (?, ?, 'Copy', ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(json_url)
            .bind(chrono::Utc::now().timestamp())
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retention_three_days() {
        let db = test_db().await;
        let now = chrono::Utc::now().timestamp();
        let days_ago = |d: i64| now - d * SECONDS_PER_DAY;

        let mut stale = new_article("https://x/stale.json", "Stale");
        stale.added_date = days_ago(4);
        let mut fresh = new_article("https://x/fresh.json", "Fresh");
        fresh.added_date = days_ago(2);
        let mut kept = new_article("https://x/kept.json", "Bookmarked");
        kept.added_date = days_ago(10);
        kept.is_bookmarked = true;
        db.insert_articles(&[stale.clone(), fresh.clone(), kept.clone()])
            .await
            .unwrap();

        let (maintenance, _) = coordinator(&db, 3);
        let report = maintenance.cleanup(3).await.unwrap();

        assert_eq!(report.articles_removed, 1);
        assert!(db.get_article(stale.id).await.unwrap().is_none());
        assert!(db.get_article(fresh.id).await.unwrap().is_some());
        assert!(db.get_article(kept.id).await.unwrap().is_some());

        // Seen markers share the cutoff
        assert_eq!(report.seen_pruned, 2);
        assert!(db.get_seen("https://x/fresh.json").await.unwrap().is_some());
        assert!(db.last_run("maintenance.last_cleanup").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_dedup_runs_once() {
        let db = test_db().await;
        db.insert_articles(&[new_article("https://x/dup.json", "Original")])
            .await
            .unwrap();
        insert_raw_duplicate(&db, "https://x/dup.json").await;

        let (maintenance, _) = coordinator(&db, 30);
        let (a, b) = tokio::join!(maintenance.remove_duplicates(), maintenance.remove_duplicates());
        let runs: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

        assert_eq!(runs, vec![1]);
        assert_eq!(db.count_articles().await.unwrap(), 1);

        // Guard released afterwards
        assert_eq!(maintenance.remove_duplicates().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_verify_indexes_is_idempotent() {
        let db = test_db().await;
        let (maintenance, _) = coordinator(&db, 30);

        let first = maintenance.verify_indexes().await.unwrap();
        assert!(first.is_complete());
        let second = maintenance.verify_indexes().await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.present.len(), first.created.len() + first.present.len());
    }

    #[tokio::test]
    async fn test_run_all_survives_offline_feed() {
        let db = test_db().await;
        db.insert_articles(&[
            new_article("https://x/1.json", "One"),
            new_article("https://x/2.json", "Two"),
        ])
        .await
        .unwrap();
        db.enqueue_fetch("https://x/queued.json", 1).await.unwrap();

        let (maintenance, badge) = coordinator(&db, 30);
        let report = maintenance.run_all().await;

        assert!(report.cleanup.is_some());
        assert_eq!(report.duplicates_removed, Some(0));
        assert!(report.indexes.is_some());
        // The fetch failed, so nothing resolved and the entry stays queued
        assert_eq!(report.queue_drained, Some(0));
        assert_eq!(db.count_queued().await.unwrap(), 1);
        assert_eq!(report.unread, Some(2));
        assert_eq!(badge.last_count(), 2);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_periodic_runs_first_pass_immediately() {
        let db = test_db().await;
        let (maintenance, _) = coordinator(&db, 30);

        let handle = maintenance.spawn_periodic(Duration::from_secs(3600));
        for _ in 0..50 {
            if db.last_run("maintenance.last_dedup").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert!(db.last_run("maintenance.last_dedup").await.unwrap().is_some());
    }
}
