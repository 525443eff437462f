use std::collections::{BTreeMap, HashSet};

use sqlx::{Acquire, QueryBuilder, SqliteConnection};
use uuid::Uuid;

use super::schema::Database;
use super::types::{
    quality_to_db, Article, ArticleDbRow, ArticleFilter, ArticleOrder, DuplicateCandidate,
    DuplicateGroup, InsertStatus, NewArticle, StoreError, ARTICLE_COLUMNS,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Bind-parameter chunk for IN (...) lookups, well under SQLite's 999 limit
const LOOKUP_CHUNK_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Article Inserts
    // ========================================================================

    /// Insert a batch of articles in a single transaction.
    ///
    /// Each article is written inside its own savepoint together with its
    /// topic link, its SeenArticle marker and any carried blobs, so one bad
    /// row rolls back only itself. The json_url existence check runs inside the
    /// transaction while holding the write gate: an article whose json_url is
    /// already stored (or appeared earlier in the same batch) is reported as
    /// [`InsertStatus::Duplicate`] and never updated.
    ///
    /// A failure to begin or commit the outer transaction discards the whole
    /// batch and is returned as an error.
    pub async fn insert_articles(
        &self,
        articles: &[NewArticle],
    ) -> Result<Vec<InsertStatus>, StoreError> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut statuses = Vec::with_capacity(articles.len());

        for article in articles {
            if let Some(json_url) = &article.json_url {
                if json_url_exists(&mut *tx, json_url).await? {
                    tracing::debug!(json_url = %json_url, "Skipping article already in store");
                    statuses.push(InsertStatus::Duplicate);
                    continue;
                }
            }

            let mut savepoint = Acquire::begin(&mut *tx).await?;
            match insert_one(&mut *savepoint, article).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    statuses.push(InsertStatus::Inserted);
                }
                Err(e) => {
                    tracing::warn!(
                        id = %article.id,
                        json_url = ?article.json_url,
                        error = %e,
                        "Article insert failed, skipping"
                    );
                    savepoint.rollback().await?;
                    statuses.push(InsertStatus::Failed(e.to_string()));
                }
            }
        }

        tx.commit().await?;
        Ok(statuses)
    }

    /// Insert one article, surfacing a json_url clash as `UniquenessViolation`.
    pub async fn insert_article(&self, article: &NewArticle) -> Result<(), StoreError> {
        let status = self
            .insert_articles(std::slice::from_ref(article))
            .await?
            .pop();

        match status {
            Some(InsertStatus::Inserted) => Ok(()),
            Some(InsertStatus::Duplicate) => Err(StoreError::UniquenessViolation {
                json_url: article.json_url.clone().unwrap_or_default(),
            }),
            Some(InsertStatus::Failed(reason)) => Err(StoreError::Validation(reason)),
            None => Err(StoreError::Validation("insert produced no status".to_string())),
        }
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Get a single article by its id
    pub async fn get_article(&self, id: Uuid) -> Result<Option<Article>, StoreError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?");
        let row = sqlx::query_as::<_, ArticleDbRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ArticleDbRow::into_article).transpose()
    }

    /// Get the oldest stored article carrying a json_url
    pub async fn get_article_by_json_url(
        &self,
        json_url: &str,
    ) -> Result<Option<Article>, StoreError> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE json_url = ? \
             ORDER BY COALESCE(publish_date, added_date) ASC, added_date ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, ArticleDbRow>(&sql)
            .bind(json_url)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ArticleDbRow::into_article).transpose()
    }

    /// Query articles by predicate.
    ///
    /// Topic matches go through the article/topic relationship table. Dates
    /// compare `COALESCE(publish_date, added_date)`. Results are capped at
    /// MAX_ARTICLES regardless of the requested limit.
    pub async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError> {
        let limit = filter.limit.unwrap_or(MAX_ARTICLES).clamp(0, MAX_ARTICLES);
        tracing::debug!(limit = limit, filter = ?filter, "query_articles with limit cap");

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1 = 1"));

        if let Some(topic) = &filter.topic {
            builder.push(
                " AND id IN (SELECT article_id FROM article_topics WHERE topic_name = ",
            );
            builder.push_bind(topic.clone());
            builder.push(")");
        }
        if let Some(viewed) = filter.is_viewed {
            builder.push(" AND is_viewed = ");
            builder.push_bind(viewed);
        }
        if let Some(bookmarked) = filter.is_bookmarked {
            builder.push(" AND is_bookmarked = ");
            builder.push_bind(bookmarked);
        }
        if let Some(since) = filter.since {
            builder.push(" AND COALESCE(publish_date, added_date) >= ");
            builder.push_bind(since);
        }
        if let Some(until) = filter.until {
            builder.push(" AND COALESCE(publish_date, added_date) < ");
            builder.push_bind(until);
        }

        builder.push(match filter.order {
            ArticleOrder::PublishDateDesc => {
                " ORDER BY COALESCE(publish_date, added_date) DESC, added_date DESC"
            }
            ArticleOrder::PublishDateAsc => {
                " ORDER BY COALESCE(publish_date, added_date) ASC, added_date ASC"
            }
            ArticleOrder::AddedDateDesc => " ORDER BY added_date DESC",
        });

        builder.push(" LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset.unwrap_or(0).max(0));

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(ArticleDbRow::into_article).collect()
    }

    /// Total number of stored articles
    pub async fn count_articles(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Number of articles not yet viewed
    pub async fn count_unread(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE is_viewed = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Whether any stored article carries this json_url
    pub async fn article_exists_by_json_url(&self, json_url: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM articles WHERE json_url = ? LIMIT 1")
            .bind(json_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Return the subset of `json_urls` already present in the store.
    ///
    /// Chunks at 500 URLs per query to stay under SQLite's bind-parameter limit.
    pub async fn existing_json_urls(
        &self,
        json_urls: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let mut found = HashSet::new();
        if json_urls.is_empty() {
            return Ok(found);
        }

        for chunk in json_urls.chunks(LOOKUP_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT DISTINCT json_url FROM articles WHERE json_url IN (");
            let mut separated = builder.separated(", ");
            for url in chunk {
                separated.push_bind(url.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            found.extend(rows.into_iter().map(|(url,)| url));
        }

        Ok(found)
    }

    /// Ids of the most recently added articles, newest first
    pub async fn recent_article_ids(&self, limit: i64) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM articles ORDER BY added_date DESC LIMIT ?")
                .bind(limit.clamp(0, MAX_ARTICLES))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id,)| {
                Uuid::parse_str(&id)
                    .map_err(|e| StoreError::Validation(format!("article id '{id}': {e}")))
            })
            .collect()
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Set the viewed flag. Returns `NotFound` if the id is absent.
    pub async fn set_article_viewed(&self, id: Uuid, viewed: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE articles SET is_viewed = ? WHERE id = ?")
            .bind(viewed)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    /// Set the bookmarked flag. Returns `NotFound` if the id is absent.
    pub async fn set_article_bookmarked(
        &self,
        id: Uuid,
        bookmarked: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE articles SET is_bookmarked = ? WHERE id = ?")
            .bind(bookmarked)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    /// Mark every unread article as viewed, returns count changed
    pub async fn mark_all_viewed(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE articles SET is_viewed = 1 WHERE is_viewed = 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete one article. Returns `NotFound` if the id is absent.
    pub async fn delete_article(&self, id: Uuid) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    /// Delete a set of articles in one transaction, returns count removed
    pub async fn delete_articles(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in ids.chunks(LOOKUP_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM articles WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");

            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Delete unbookmarked articles added before `cutoff` (unix seconds)
    pub async fn delete_articles_older_than(&self, cutoff: i64) -> Result<u64, StoreError> {
        let _gate = self.write_gate.lock().await;
        let result =
            sqlx::query("DELETE FROM articles WHERE is_bookmarked = 0 AND added_date < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Duplicate Detection
    // ========================================================================

    /// All json_url groups holding more than one article.
    ///
    /// Articles without a json_url are never grouped.
    pub async fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, StoreError> {
        let rows: Vec<(String, String, Option<i64>, i64)> = sqlx::query_as(
            r#"
            SELECT id, json_url, publish_date, added_date
            FROM articles
            WHERE json_url IN (
                SELECT json_url FROM articles
                WHERE json_url IS NOT NULL
                GROUP BY json_url
                HAVING COUNT(*) > 1
            )
            ORDER BY json_url
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut groups: BTreeMap<String, Vec<DuplicateCandidate>> = BTreeMap::new();
        for (id, json_url, publish_date, added_date) in rows {
            let id = Uuid::parse_str(&id)
                .map_err(|e| StoreError::Validation(format!("article id '{id}': {e}")))?;
            groups.entry(json_url).or_default().push(DuplicateCandidate {
                id,
                publish_date,
                added_date,
            });
        }

        Ok(groups
            .into_iter()
            .map(|(json_url, members)| DuplicateGroup { json_url, members })
            .collect())
    }
}

async fn json_url_exists(conn: &mut SqliteConnection, json_url: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM articles WHERE json_url = ? LIMIT 1")
        .bind(json_url)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Write one article with its relationships on an open transaction
async fn insert_one(conn: &mut SqliteConnection, article: &NewArticle) -> Result<(), sqlx::Error> {
    let id = article.id.to_string();

    sqlx::query(
        r#"
        INSERT INTO articles (
            id, json_url, title, body, article_url, domain, topic, publish_date, added_date,
            is_viewed, is_bookmarked, sources_quality, argument_quality, quality, source_type,
            summary, critical_analysis, logical_fallacies, source_analysis, relation_to_topic,
            additional_insights
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(&id)
    .bind(&article.json_url)
    .bind(&article.title)
    .bind(&article.body)
    .bind(&article.article_url)
    .bind(&article.domain)
    .bind(&article.topic)
    .bind(article.publish_date)
    .bind(article.added_date)
    .bind(article.is_viewed)
    .bind(article.is_bookmarked)
    .bind(quality_to_db(article.sources_quality))
    .bind(quality_to_db(article.argument_quality))
    .bind(quality_to_db(article.quality))
    .bind(&article.source_type)
    .bind(&article.summary)
    .bind(&article.critical_analysis)
    .bind(&article.logical_fallacies)
    .bind(&article.source_analysis)
    .bind(&article.relation_to_topic)
    .bind(&article.additional_insights)
    .execute(&mut *conn)
    .await?;

    if let Some(topic) = article.topic.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        sqlx::query("INSERT OR IGNORE INTO topics (name, priority, created_at) VALUES (?, 'normal', ?)")
            .bind(topic)
            .bind(article.added_date)
            .execute(&mut *conn)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO article_topics (article_id, topic_name) VALUES (?, ?)")
            .bind(&id)
            .bind(topic)
            .execute(&mut *conn)
            .await?;
    }

    if let Some(json_url) = &article.json_url {
        sqlx::query("INSERT OR IGNORE INTO seen_articles (id, json_url, date) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(json_url)
            .bind(article.added_date)
            .execute(&mut *conn)
            .await?;
    }

    for (field, blob) in &article.blobs {
        let sql = format!("UPDATE articles SET {} = ? WHERE id = ?", field.blob_column());
        sqlx::query(&sql)
            .bind(blob.as_slice())
            .bind(&id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
