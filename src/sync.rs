//! Seen-article reconciliation with the server.
//!
//! The client reports which json_urls it saw in the last day; the server
//! answers with the ones the client has not got. Those are fetched
//! concurrently and inserted in one transaction. The network phase has a hard
//! deadline; running out of time skips the round instead of failing it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::feed::{ArticleFeed, ArticleJson, FeedError};
use crate::service::{ArticleService, ServiceError};

/// Look-back window for seen URLs reported to the server
pub const SEEN_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Article fetches in flight at once
pub const MAX_CONCURRENT_FETCHES: usize = 4;

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The round finished within the deadline
    Completed {
        reported: usize,
        inserted: usize,
        skipped: usize,
        queued: usize,
    },
    /// The deadline passed; in-flight requests were dropped and nothing was written
    Skipped,
}

/// Results of the concurrent fetch step
#[derive(Default)]
struct Fetched {
    articles: Vec<ArticleJson>,
    failed: Vec<(String, FeedError)>,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    service: ArticleService,
    timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(service: ArticleService) -> Self {
        Self {
            service,
            timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Report recently seen articles and pull in the ones the server says
    /// are missing.
    ///
    /// Fetch failures are queued for the next maintenance pass. Storage errors
    /// are returned; network trouble and the deadline only skip the round.
    pub async fn send_recent_articles_to_server(&self) -> Result<SyncOutcome, ServiceError> {
        let db = self.service.database();
        let feed = Arc::clone(self.service.feed());
        let deadline = Instant::now() + self.timeout;

        let since = chrono::Utc::now().timestamp() - SEEN_WINDOW_SECS;
        let seen = db.seen_urls_since(since).await?;
        let reported = seen.len();

        let unseen = match tokio::time::timeout_at(deadline, feed.sync_seen(&seen)).await {
            Ok(Ok(unseen)) => unseen,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Seen sync request failed, skipping round");
                return Ok(SyncOutcome::Skipped);
            }
            Err(_) => return Ok(self.timed_out()),
        };

        let mut unique = HashSet::new();
        let candidates: Vec<String> = unseen
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty() && unique.insert(url.clone()))
            .collect();
        let stored = db.existing_json_urls(&candidates).await?;
        let missing: Vec<String> = candidates
            .into_iter()
            .filter(|url| !stored.contains(url))
            .collect();

        let fetched = match tokio::time::timeout_at(deadline, fetch_all(feed, missing)).await {
            Ok(fetched) => fetched,
            Err(_) => return Ok(self.timed_out()),
        };

        let now = chrono::Utc::now().timestamp();
        for (json_url, err) in &fetched.failed {
            tracing::debug!(json_url = %json_url, error = %err, "Queueing failed article fetch");
            db.enqueue_fetch(json_url, now).await?;
        }

        let outcome = self.service.insert_from_json_atomic(fetched.articles).await?;
        tracing::info!(
            reported = reported,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            queued = fetched.failed.len(),
            "Seen sync complete"
        );
        if let Err(e) = db.record_run("sync.last_seen_sync", now).await {
            tracing::warn!(error = %e, "Failed to record seen sync time");
        }

        Ok(SyncOutcome::Completed {
            reported,
            inserted: outcome.inserted,
            skipped: outcome.skipped + outcome.failed.len(),
            queued: fetched.failed.len(),
        })
    }

    fn timed_out(&self) -> SyncOutcome {
        tracing::warn!(
            timeout_ms = self.timeout.as_millis() as u64,
            "Seen sync timed out, skipping round"
        );
        SyncOutcome::Skipped
    }
}

/// Fetch every URL with at most [`MAX_CONCURRENT_FETCHES`] in flight.
///
/// Dropping the returned future cancels every request still running.
async fn fetch_all(feed: Arc<dyn ArticleFeed>, urls: Vec<String>) -> Fetched {
    let results: Vec<(String, Result<ArticleJson, FeedError>)> = stream::iter(urls)
        .map(|json_url| {
            let feed = Arc::clone(&feed);
            async move {
                let result = feed.fetch_article(&json_url).await;
                (json_url, result)
            }
        })
        .buffer_unordered(MAX_CONCURRENT_FETCHES)
        .collect()
        .await;

    let mut fetched = Fetched::default();
    for (json_url, result) in results {
        match result {
            Ok(mut article) => {
                // Keyed by the URL we asked for when the payload omits it
                if !matches!(article.json_url.as_deref(), Some(url) if !url.trim().is_empty()) {
                    article.json_url = Some(json_url);
                }
                fetched.articles.push(article);
            }
            Err(e) => fetched.failed.push((json_url, e)),
        }
    }
    fetched
}
