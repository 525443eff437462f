use super::schema::Database;
use super::types::{QueuedArticle, StoreError};

/// Failed attempts after which a queued fetch is abandoned
pub const MAX_QUEUE_ATTEMPTS: i64 = 5;

impl Database {
    // ========================================================================
    // Queued Fetch Operations
    // ========================================================================

    /// Queue a json_url for a later fetch.
    ///
    /// Re-queueing an existing URL keeps its attempt count and original time.
    pub async fn enqueue_fetch(&self, json_url: &str, queued_at: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO queued_articles (json_url, queued_at, attempts) VALUES (?, ?, 0)",
        )
        .bind(json_url)
        .bind(queued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Oldest queued fetches first
    pub async fn queued_fetches(&self, limit: i64) -> Result<Vec<QueuedArticle>, StoreError> {
        let rows = sqlx::query_as::<_, QueuedArticle>(
            r#"
            SELECT json_url, queued_at, attempts, last_error
            FROM queued_articles
            ORDER BY queued_at ASC, json_url ASC
            LIMIT ?
        "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_queued(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queued_articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` when the entry hit [`MAX_QUEUE_ATTEMPTS`] and was dropped.
    pub async fn record_queue_failure(
        &self,
        json_url: &str,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let attempts: Option<(i64,)> = sqlx::query_as(
            "UPDATE queued_articles SET attempts = attempts + 1, last_error = ? \
             WHERE json_url = ? RETURNING attempts",
        )
        .bind(error)
        .bind(json_url)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((attempts,)) = attempts else {
            tx.commit().await?;
            return Err(StoreError::NotFound(format!("queued fetch {json_url}")));
        };

        let dropped = attempts >= MAX_QUEUE_ATTEMPTS;
        if dropped {
            sqlx::query("DELETE FROM queued_articles WHERE json_url = ?")
                .bind(json_url)
                .execute(&mut *tx)
                .await?;
            tracing::warn!(
                json_url = %json_url,
                attempts = attempts,
                error = %error,
                "Giving up on queued fetch"
            );
        }

        tx.commit().await?;
        Ok(dropped)
    }

    pub async fn remove_queued(&self, json_url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM queued_articles WHERE json_url = ?")
            .bind(json_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
