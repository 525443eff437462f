use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::MigrationError;
use crate::richtext::{blob, RichTextField};
use crate::storage::{NewArticle, NotificationPriority, QUALITY_MAX};
use crate::util::clean_field;

/// One row of the previous-generation article table
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct LegacyRecord {
    pub rowid: i64,
    pub id: Option<String>,
    pub json_url: Option<String>,
    pub article_title: Option<String>,
    pub article_body: Option<String>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub topic: Option<String>,
    pub date: Option<i64>,
    pub added_date: Option<i64>,
    pub read: Option<bool>,
    pub bookmarked: Option<bool>,
    pub sources_quality: Option<i64>,
    pub argument_quality: Option<i64>,
    pub quality: Option<i64>,
    pub source_type: Option<String>,
    pub summary: Option<String>,
    pub critical_analysis: Option<String>,
    pub logical_fallacies: Option<String>,
    pub source_analysis: Option<String>,
    pub relation_to_topic: Option<String>,
    pub additional_insights: Option<String>,
    pub title_blob: Option<Vec<u8>>,
    pub body_blob: Option<Vec<u8>>,
    pub summary_blob: Option<Vec<u8>>,
    pub critical_analysis_blob: Option<Vec<u8>>,
    pub logical_fallacies_blob: Option<Vec<u8>>,
    pub source_analysis_blob: Option<Vec<u8>>,
    pub relation_to_topic_blob: Option<Vec<u8>>,
    pub additional_insights_blob: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LegacyTopic {
    pub name: String,
    pub priority: Option<String>,
}

/// Read side of the previous-generation store
#[async_trait]
pub trait LegacyStore: Send + Sync {
    /// Whether the legacy schema exists at all
    async fn is_present(&self) -> Result<bool, MigrationError>;

    async fn count_articles(&self) -> Result<u64, MigrationError>;

    /// Articles in stable (rowid) order
    async fn read_batch(&self, offset: u64, limit: u64) -> Result<Vec<LegacyRecord>, MigrationError>;

    async fn read_topics(&self) -> Result<Vec<LegacyTopic>, MigrationError>;
}

/// Legacy store backed by the old SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteLegacyStore {
    pool: SqlitePool,
}

impl SqliteLegacyStore {
    /// Open the legacy database read-only. Returns `None` if the file is absent.
    pub async fn open(path: &Path) -> Result<Option<Self>, MigrationError> {
        if !path.exists() {
            return Ok(None);
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(MigrationError::Legacy)?;
        Ok(Some(Self { pool }))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LegacyStore for SqliteLegacyStore {
    async fn is_present(&self) -> Result<bool, MigrationError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'legacy_articles'",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(MigrationError::Legacy)?;
        Ok(row.is_some())
    }

    async fn count_articles(&self) -> Result<u64, MigrationError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM legacy_articles")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::Legacy)?;
        Ok(u64::try_from(count.0).unwrap_or(0))
    }

    async fn read_batch(&self, offset: u64, limit: u64) -> Result<Vec<LegacyRecord>, MigrationError> {
        sqlx::query_as::<_, LegacyRecord>(
            r#"
            SELECT rowid AS rowid, id, json_url, article_title, article_body, url, domain, topic,
                   date, added_date, read, bookmarked, sources_quality, argument_quality, quality,
                   source_type, summary, critical_analysis, logical_fallacies, source_analysis,
                   relation_to_topic, additional_insights, title_blob, body_blob, summary_blob,
                   critical_analysis_blob, logical_fallacies_blob, source_analysis_blob,
                   relation_to_topic_blob, additional_insights_blob
            FROM legacy_articles
            ORDER BY rowid
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(MigrationError::Legacy)
    }

    async fn read_topics(&self) -> Result<Vec<LegacyTopic>, MigrationError> {
        let present: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'legacy_topics'",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(MigrationError::Legacy)?;
        if present.is_none() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, LegacyTopic>("SELECT name, priority FROM legacy_topics ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::Legacy)
    }
}

// ============================================================================
// Record Transform
// ============================================================================

/// Id for a migrated record: the legacy UUID when it parses, otherwise a
/// name-based UUID over the json_url, falling back to the legacy rowid.
pub fn derive_article_id(record: &LegacyRecord) -> Uuid {
    if let Some(id) = record.id.as_deref().and_then(|s| Uuid::parse_str(s.trim()).ok()) {
        return id;
    }
    match record.json_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(json_url) => Uuid::new_v5(&Uuid::NAMESPACE_URL, json_url.as_bytes()),
        None => Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("legacy_articles:{}", record.rowid).as_bytes(),
        ),
    }
}

fn legacy_quality(value: Option<i64>) -> Option<u8> {
    value
        .and_then(|v| u8::try_from(v).ok())
        .filter(|v| *v <= QUALITY_MAX)
}

/// Map a legacy row onto the current article shape.
///
/// Blob columns are kept only when they decode as a valid rich-text blob;
/// anything else is dropped and regenerated lazily later.
pub fn transform(record: LegacyRecord, now: i64) -> Result<NewArticle, MigrationError> {
    let id = derive_article_id(&record);
    let title = clean_field(record.article_title.as_deref()).ok_or_else(|| {
        MigrationError::Transform(format!("legacy row {} has no title", record.rowid))
    })?;

    let legacy_blobs = [
        (RichTextField::Title, record.title_blob),
        (RichTextField::Body, record.body_blob),
        (RichTextField::Summary, record.summary_blob),
        (RichTextField::CriticalAnalysis, record.critical_analysis_blob),
        (RichTextField::LogicalFallacies, record.logical_fallacies_blob),
        (RichTextField::SourceAnalysis, record.source_analysis_blob),
        (RichTextField::RelationToTopic, record.relation_to_topic_blob),
        (RichTextField::AdditionalInsights, record.additional_insights_blob),
    ];
    let blobs = legacy_blobs
        .into_iter()
        .filter_map(|(field, bytes)| bytes.map(|b| (field, b)))
        .filter(|(_, bytes)| blob::is_valid(bytes))
        .collect();

    Ok(NewArticle {
        id,
        json_url: record
            .json_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()),
        title,
        body: record.article_body,
        article_url: clean_field(record.url.as_deref()),
        domain: clean_field(record.domain.as_deref()),
        topic: clean_field(record.topic.as_deref()),
        publish_date: record.date,
        added_date: record.added_date.or(record.date).unwrap_or(now),
        is_viewed: record.read.unwrap_or(false),
        is_bookmarked: record.bookmarked.unwrap_or(false),
        sources_quality: legacy_quality(record.sources_quality),
        argument_quality: legacy_quality(record.argument_quality),
        quality: legacy_quality(record.quality),
        source_type: clean_field(record.source_type.as_deref()),
        summary: record.summary,
        critical_analysis: record.critical_analysis,
        logical_fallacies: record.logical_fallacies,
        source_analysis: record.source_analysis,
        relation_to_topic: record.relation_to_topic,
        additional_insights: record.additional_insights,
        blobs,
    })
}

/// Legacy priority strings, defaulting to normal when unrecognized
pub fn legacy_priority(raw: Option<&str>) -> NotificationPriority {
    raw.and_then(|p| NotificationPriority::from_str(p).ok())
        .unwrap_or_default()
}
