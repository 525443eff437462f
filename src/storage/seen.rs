use uuid::Uuid;

use super::schema::Database;
use super::types::{SeenArticle, StoreError};

impl Database {
    // ========================================================================
    // Seen Article Markers
    // ========================================================================

    /// Record that a json_url was fetched. A second call for the same URL is a no-op.
    pub async fn mark_seen(&self, json_url: &str, date: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO seen_articles (id, json_url, date) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(json_url)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_seen(&self, json_url: &str) -> Result<Option<SeenArticle>, StoreError> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT id, json_url, date FROM seen_articles WHERE json_url = ?")
                .bind(json_url)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id, json_url, date)| {
            let id = Uuid::parse_str(&id)
                .map_err(|e| StoreError::Validation(format!("seen id '{id}': {e}")))?;
            Ok(SeenArticle { id, json_url, date })
        })
        .transpose()
    }

    /// json_urls seen at or after `since` (unix seconds), newest first
    pub async fn seen_urls_since(&self, since: i64) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT json_url FROM seen_articles WHERE date >= ? ORDER BY date DESC, json_url",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    pub async fn count_seen(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen_articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Delete markers older than `cutoff` (unix seconds), returns count removed
    pub async fn prune_seen_older_than(&self, cutoff: i64) -> Result<u64, StoreError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("DELETE FROM seen_articles WHERE date < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
