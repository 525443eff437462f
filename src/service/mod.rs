//! Article service: mediates between the remote feed and the local store.
//!
//! Owns the sync-by-batch path, duplicate removal, read/bookmark toggles and
//! queued-fetch draining. Every change to the unread set schedules a badge
//! recompute on a spawned task.

mod badge;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use badge::{BadgeSink, LogBadgeSink};

use crate::feed::{ArticleFeed, ArticleJson, FeedError};
use crate::storage::{
    Article, ArticleFilter, Database, DuplicateCandidate, InsertStatus, NewArticle, StoreError,
};

/// Articles inserted per transaction on the sync path
pub const SYNC_BATCH_SIZE: usize = 10;

/// Queued fetches attempted per background sync
pub const QUEUE_DRAIN_LIMIT: i64 = 50;

/// Default page size for a background sync
pub const DEFAULT_SYNC_PAGE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Article with json_url {json_url} already exists")]
    UniquenessViolation { json_url: String },

    #[error("Sync failed: {0}")]
    SyncFailed(#[from] FeedError),

    #[error(transparent)]
    Database(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::UniquenessViolation { json_url } => {
                ServiceError::UniquenessViolation { json_url }
            }
            other => ServiceError::Database(other),
        }
    }
}

/// How to look up a single article
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleLookup {
    Id(Uuid),
    JsonUrl(String),
}

/// A user-driven flag change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleMark {
    Read(bool),
    Bookmarked(bool),
}

/// Per-item results of a batch insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    /// Already stored (by json_url), left untouched
    pub skipped: usize,
    /// (label, reason) for items that could not be stored
    pub failed: Vec<(String, String)>,
}

impl BatchOutcome {
    fn record(&mut self, labels: Vec<String>, statuses: Vec<InsertStatus>) {
        for (label, status) in labels.into_iter().zip(statuses) {
            match status {
                InsertStatus::Inserted => self.inserted += 1,
                InsertStatus::Duplicate => self.skipped += 1,
                InsertStatus::Failed(reason) => self.failed.push((label, reason)),
            }
        }
    }

    fn fail_all(&mut self, labels: Vec<String>, reason: &str) {
        self.failed
            .extend(labels.into_iter().map(|label| (label, reason.to_string())));
    }
}

/// Result of [`ArticleService::perform_background_sync`]
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub inserted: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub queued_drained: usize,
    pub duration: Duration,
}

/// Pick the article to keep from a duplicate group.
///
/// Earliest `publish_date` (falling back to `added_date`) wins; ties go to the
/// earliest `added_date`, then the smallest id.
pub fn pick_survivor(members: &[DuplicateCandidate]) -> Option<Uuid> {
    members
        .iter()
        .min_by_key(|m| (m.publish_date.unwrap_or(m.added_date), m.added_date, m.id))
        .map(|m| m.id)
}

#[derive(Clone)]
pub struct ArticleService {
    db: Database,
    feed: Arc<dyn ArticleFeed>,
    badge: Arc<dyn BadgeSink>,
    page_limit: usize,
}

impl ArticleService {
    pub fn new(db: Database, feed: Arc<dyn ArticleFeed>, badge: Arc<dyn BadgeSink>) -> Self {
        Self {
            db,
            feed,
            badge,
            page_limit: DEFAULT_SYNC_PAGE_LIMIT,
        }
    }

    /// Page size used by [`perform_background_sync`](Self::perform_background_sync)
    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn feed(&self) -> &Arc<dyn ArticleFeed> {
        &self.feed
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn fetch_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, ServiceError> {
        Ok(self.db.query_articles(filter).await?)
    }

    pub async fn fetch_article(&self, lookup: &ArticleLookup) -> Result<Option<Article>, ServiceError> {
        let article = match lookup {
            ArticleLookup::Id(id) => self.db.get_article(*id).await?,
            ArticleLookup::JsonUrl(url) => self.db.get_article_by_json_url(url).await?,
        };
        Ok(article)
    }

    // ========================================================================
    // User Mutations
    // ========================================================================

    pub async fn mark_article(&self, id: Uuid, mark: ArticleMark) -> Result<(), ServiceError> {
        match mark {
            ArticleMark::Read(viewed) => {
                self.db.set_article_viewed(id, viewed).await?;
                self.schedule_badge_update();
            }
            ArticleMark::Bookmarked(bookmarked) => {
                self.db.set_article_bookmarked(id, bookmarked).await?;
            }
        }
        Ok(())
    }

    /// Mark every unread article as read. Returns how many changed.
    pub async fn mark_all_read(&self) -> Result<u64, ServiceError> {
        let changed = self.db.mark_all_viewed().await?;
        if changed > 0 {
            self.schedule_badge_update();
        }
        Ok(changed)
    }

    pub async fn delete_article(&self, id: Uuid) -> Result<(), ServiceError> {
        self.db.delete_article(id).await?;
        self.schedule_badge_update();
        Ok(())
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Fetch one page from the server and insert the articles not yet stored.
    ///
    /// Returns the number inserted. Existing json_urls are skipped, never updated.
    pub async fn sync_articles_from_server(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<usize, ServiceError> {
        let items = self.feed.fetch_articles(topic, limit).await?;
        let outcome = self.insert_from_json(items).await;
        Ok(outcome.inserted)
    }

    /// Insert server records in transactions of [`SYNC_BATCH_SIZE`].
    ///
    /// A malformed item is recorded and skipped. A batch whose transaction
    /// fails is recorded as failed and the next batch still runs.
    pub async fn insert_from_json(&self, items: Vec<ArticleJson>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let now = chrono::Utc::now().timestamp();
        let mut items = items.into_iter().peekable();
        let mut batch_index = 0usize;

        while items.peek().is_some() {
            let chunk: Vec<ArticleJson> = items.by_ref().take(SYNC_BATCH_SIZE).collect();
            let (articles, labels) = prepare_batch(chunk, now, &mut outcome);

            match self.db.insert_articles(&articles).await {
                Ok(statuses) => outcome.record(labels, statuses),
                Err(e) => {
                    tracing::warn!(
                        batch = batch_index,
                        size = articles.len(),
                        error = %e,
                        "Sync batch failed, continuing with next batch"
                    );
                    outcome.fail_all(labels, &e.to_string());
                }
            }
            batch_index += 1;
        }

        tracing::info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            failed = outcome.failed.len(),
            "Inserted articles from server"
        );
        if outcome.inserted > 0 {
            self.schedule_badge_update();
        }
        outcome
    }

    /// Insert server records in a single transaction: all or nothing on
    /// storage failure, per-item reporting otherwise.
    pub async fn insert_from_json_atomic(
        &self,
        items: Vec<ArticleJson>,
    ) -> Result<BatchOutcome, ServiceError> {
        let mut outcome = BatchOutcome::default();
        let now = chrono::Utc::now().timestamp();
        let (articles, labels) = prepare_batch(items, now, &mut outcome);

        let statuses = self.db.insert_articles(&articles).await?;
        outcome.record(labels, statuses);

        if outcome.inserted > 0 {
            self.schedule_badge_update();
        }
        Ok(outcome)
    }

    /// Fetch one page, insert it, then drain queued fetches.
    pub async fn perform_background_sync(&self) -> Result<SyncSummary, ServiceError> {
        let started = Instant::now();

        let items = self.feed.fetch_articles(None, self.page_limit).await?;
        let outcome = self.insert_from_json(items).await;
        let queued_drained = self.drain_queue(QUEUE_DRAIN_LIMIT).await?;

        if let Err(e) = self
            .db
            .record_run("sync.last_run", chrono::Utc::now().timestamp())
            .await
        {
            tracing::warn!(error = %e, "Failed to record sync run time");
        }

        let summary = SyncSummary {
            inserted: outcome.inserted,
            skipped_existing: outcome.skipped,
            failed: outcome.failed.len(),
            queued_drained,
            duration: started.elapsed(),
        };
        tracing::info!(
            inserted = summary.inserted,
            skipped = summary.skipped_existing,
            failed = summary.failed,
            queued_drained = summary.queued_drained,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Background sync complete"
        );
        Ok(summary)
    }

    /// Retry queued fetches, oldest first.
    ///
    /// Returns how many entries were resolved (inserted or found already
    /// stored). Failures bump the entry's attempt count.
    pub async fn drain_queue(&self, limit: i64) -> Result<usize, ServiceError> {
        let queued = self.db.queued_fetches(limit).await?;
        if queued.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut resolved = 0;
        let mut inserted = 0;

        for entry in queued {
            match self.fetch_and_insert(&entry.json_url, now).await {
                Ok(()) => {
                    inserted += 1;
                    resolved += 1;
                    self.db.remove_queued(&entry.json_url).await?;
                }
                Err(ServiceError::UniquenessViolation { .. }) => {
                    resolved += 1;
                    self.db.remove_queued(&entry.json_url).await?;
                }
                Err(e @ ServiceError::Database(StoreError::Database(_))) => return Err(e),
                Err(e) => {
                    tracing::debug!(json_url = %entry.json_url, error = %e, "Queued fetch failed");
                    self.db
                        .record_queue_failure(&entry.json_url, &e.to_string())
                        .await?;
                }
            }
        }

        if inserted > 0 {
            self.schedule_badge_update();
        }
        Ok(resolved)
    }

    async fn fetch_and_insert(&self, json_url: &str, now: i64) -> Result<(), ServiceError> {
        if self.db.article_exists_by_json_url(json_url).await? {
            return Err(ServiceError::UniquenessViolation {
                json_url: json_url.to_string(),
            });
        }

        let json = self.feed.fetch_article(json_url).await?;
        let mut article = json.into_new_article(now)?;
        if article.json_url.is_none() {
            article.json_url = Some(json_url.to_string());
        }
        self.db.insert_article(&article).await?;
        Ok(())
    }

    // ========================================================================
    // Dedup
    // ========================================================================

    /// Collapse every json_url group to its survivor in one transaction.
    ///
    /// Returns the number of articles removed.
    pub async fn remove_duplicate_articles(&self) -> Result<usize, ServiceError> {
        let groups = self.db.duplicate_groups().await?;
        let mut losers = Vec::new();

        for group in &groups {
            let Some(keep) = pick_survivor(&group.members) else {
                continue;
            };
            let before = losers.len();
            losers.extend(group.members.iter().map(|m| m.id).filter(|id| *id != keep));
            tracing::info!(
                json_url = %group.json_url,
                kept = %keep,
                removed = losers.len() - before,
                "Removing duplicate articles"
            );
        }

        if losers.is_empty() {
            return Ok(0);
        }

        let removed = self.db.delete_articles(&losers).await?;
        self.schedule_badge_update();
        Ok(removed as usize)
    }

    // ========================================================================
    // Badge
    // ========================================================================

    /// Recount unread articles and push the count to the badge sink from a
    /// spawned task. The handle resolves to the pushed count.
    pub fn schedule_badge_update(&self) -> JoinHandle<Option<u64>> {
        let db = self.db.clone();
        let badge = Arc::clone(&self.badge);
        tokio::spawn(async move {
            match db.count_unread().await {
                Ok(count) => {
                    let count = u64::try_from(count).unwrap_or(0);
                    badge.set_unread_count(count);
                    Some(count)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Badge recompute failed");
                    None
                }
            }
        })
    }
}

/// Convert server records, recording conversion failures in `outcome`.
fn prepare_batch(
    items: Vec<ArticleJson>,
    now: i64,
    outcome: &mut BatchOutcome,
) -> (Vec<NewArticle>, Vec<String>) {
    let mut articles = Vec::with_capacity(items.len());
    let mut labels = Vec::with_capacity(items.len());

    for item in items {
        let label = item
            .json_url
            .clone()
            .or_else(|| item.title.clone())
            .unwrap_or_else(|| "<unnamed>".to_string());
        match item.into_new_article(now) {
            Ok(article) => {
                labels.push(label);
                articles.push(article);
            }
            Err(e) => {
                tracing::warn!(article = %label, error = %e, "Skipping malformed article");
                outcome.failed.push((label, e.to_string()));
            }
        }
    }

    (articles, labels)
}
