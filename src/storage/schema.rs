use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::{is_lock_error, StoreError};

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    /// Serializes check-then-insert and delete batches so overlapping sync
    /// triggers cannot both pass the json_url existence check.
    pub(crate) write_gate: Arc<Mutex<()>>,
}

impl Database {
    /// Open a database connection and create the schema
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process holds the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Database` for other database errors.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file with user-only permissions so there is no window
        // where it exists with the default umask.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite will report the error at connect_with.
                }
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Set via pragma() so every pooled
        // connection inherits it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers the background sync,
        // maintenance and blob cache readers running at once.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;
        let db = Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        };
        db.create_schema().await.map_err(|e| {
            if is_lock_error(&e.to_string()) {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Close the pool, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables within a single transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. The query indexes are not created here; they are
    /// owned by [`Database::ensure_indexes`] which tolerates schema skew.
    async fn create_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // json_url is deliberately not UNIQUE: uniqueness is checked at write
        // time, and older generations may carry duplicates for dedup to remove.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                json_url TEXT,
                title TEXT NOT NULL,
                body TEXT,
                article_url TEXT,
                domain TEXT,
                topic TEXT,
                publish_date INTEGER,
                added_date INTEGER NOT NULL,
                is_viewed INTEGER NOT NULL DEFAULT 0,
                is_bookmarked INTEGER NOT NULL DEFAULT 0,
                sources_quality INTEGER NOT NULL DEFAULT -1,
                argument_quality INTEGER NOT NULL DEFAULT -1,
                quality INTEGER NOT NULL DEFAULT -1,
                source_type TEXT,
                summary TEXT,
                critical_analysis TEXT,
                logical_fallacies TEXT,
                source_analysis TEXT,
                relation_to_topic TEXT,
                additional_insights TEXT,
                title_blob BLOB,
                body_blob BLOB,
                summary_blob BLOB,
                critical_analysis_blob BLOB,
                logical_fallacies_blob BLOB,
                source_analysis_blob BLOB,
                relation_to_topic_blob BLOB,
                additional_insights_blob BLOB
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Secondary lookup by dedup key
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_json_url ON articles(json_url)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                name TEXT PRIMARY KEY,
                priority TEXT NOT NULL DEFAULT 'normal',
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_topics (
                article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                topic_name TEXT NOT NULL REFERENCES topics(name),
                PRIMARY KEY (article_id, topic_name)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_article_topics_topic ON article_topics(topic_name)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_articles (
                id TEXT PRIMARY KEY,
                json_url TEXT NOT NULL UNIQUE,
                date INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_seen_articles_date ON seen_articles(date)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_articles (
                json_url TEXT PRIMARY KEY,
                queued_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Key-value store for run bookkeeping. Keys use dotted convention:
        // maintenance.last_cleanup, sync.last_run, etc.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
