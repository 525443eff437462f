use super::schema::Database;
use super::types::StoreError;

impl Database {
    // ========================================================================
    // Run Bookkeeping
    // ========================================================================

    /// Get a single stored value by key.
    ///
    /// Keys use dotted convention: `maintenance.last_cleanup`, `sync.last_run`.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a value (UPSERT), refreshing its timestamp.
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record that a job ran at `at` (unix seconds)
    pub async fn record_run(&self, key: &str, at: i64) -> Result<(), StoreError> {
        self.set_preference(key, &at.to_string()).await
    }

    /// Unix seconds of the last recorded run. Unparseable values read as never run.
    pub async fn last_run(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .get_preference(key)
            .await?
            .and_then(|value| value.parse::<i64>().ok()))
    }
}
