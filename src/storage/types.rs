use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::richtext::RichTextField;

// ============================================================================
// Error Types
// ============================================================================

/// Store errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another instance of the application has locked the database
    #[error("Another instance of newsdesk appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Schema setup failed
    #[error("Database schema setup failed: {0}")]
    Migration(String),

    /// The requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An insert would duplicate a json_url already present
    #[error("Article with json_url {json_url} already exists")]
    UniquenessViolation { json_url: String },

    /// A stored value could not be interpreted
    #[error("Invalid stored data: {0}")]
    Validation(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Database(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// message text through sqlx.
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Quality Scores
// ============================================================================

/// Stored sentinel for "no quality score"
pub const QUALITY_NONE: i64 = -1;

/// Highest valid quality score
pub const QUALITY_MAX: u8 = 3;

/// Convert a stored quality column into a score, treating the sentinel and any
/// out-of-range value as absent.
pub(crate) fn quality_from_db(value: i64) -> Option<u8> {
    u8::try_from(value).ok().filter(|v| *v <= QUALITY_MAX)
}

pub(crate) fn quality_to_db(value: Option<u8>) -> i64 {
    match value {
        Some(v) if v <= QUALITY_MAX => i64::from(v),
        _ => QUALITY_NONE,
    }
}

// ============================================================================
// Topics
// ============================================================================

/// How loudly new articles in a topic should be announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPriority {
    Off,
    #[default]
    Normal,
    High,
}

impl NotificationPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationPriority::Off => "off",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        }
    }
}

impl FromStr for NotificationPriority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "muted" => Ok(NotificationPriority::Off),
            "normal" | "low" | "" => Ok(NotificationPriority::Normal),
            "high" | "urgent" => Ok(NotificationPriority::High),
            other => Err(StoreError::Validation(format!(
                "unknown notification priority '{other}'"
            ))),
        }
    }
}

/// Name-keyed topic label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub priority: NotificationPriority,
}

// ============================================================================
// Articles
// ============================================================================

/// Internal row type for Article queries (used by sqlx FromRow)
/// Converts to Article via into_article()
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: String,
    pub json_url: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub article_url: Option<String>,
    pub domain: Option<String>,
    pub topic: Option<String>,
    pub publish_date: Option<i64>,
    pub added_date: i64,
    pub is_viewed: bool,
    pub is_bookmarked: bool,
    pub sources_quality: i64,
    pub argument_quality: i64,
    pub quality: i64,
    pub source_type: Option<String>,
    pub summary: Option<String>,
    pub critical_analysis: Option<String>,
    pub logical_fallacies: Option<String>,
    pub source_analysis: Option<String>,
    pub relation_to_topic: Option<String>,
    pub additional_insights: Option<String>,
}

/// Column list matching [`ArticleDbRow`]
pub(crate) const ARTICLE_COLUMNS: &str = "id, json_url, title, body, article_url, domain, topic, \
     publish_date, added_date, is_viewed, is_bookmarked, sources_quality, argument_quality, \
     quality, source_type, summary, critical_analysis, logical_fallacies, source_analysis, \
     relation_to_topic, additional_insights";

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Result<Article, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Validation(format!("article id '{}': {e}", self.id)))?;
        Ok(Article {
            id,
            json_url: self.json_url,
            title: self.title,
            body: self.body,
            article_url: self.article_url,
            domain: self.domain,
            topic: self.topic,
            publish_date: self.publish_date,
            added_date: self.added_date,
            is_viewed: self.is_viewed,
            is_bookmarked: self.is_bookmarked,
            sources_quality: quality_from_db(self.sources_quality),
            argument_quality: quality_from_db(self.argument_quality),
            quality: quality_from_db(self.quality),
            source_type: self.source_type,
            summary: self.summary,
            critical_analysis: self.critical_analysis,
            logical_fallacies: self.logical_fallacies,
            source_analysis: self.source_analysis,
            relation_to_topic: self.relation_to_topic,
            additional_insights: self.additional_insights,
        })
    }
}

/// Article data from database
///
/// Rich-text blobs are not loaded with the article; the blob cache reads them
/// by id when a field is displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: Uuid,
    /// External dedup key. `None` marks an orphaned article that is always new.
    pub json_url: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub article_url: Option<String>,
    pub domain: Option<String>,
    pub topic: Option<String>,
    /// Unix seconds
    pub publish_date: Option<i64>,
    /// Unix seconds when the article was stored locally
    pub added_date: i64,
    pub is_viewed: bool,
    pub is_bookmarked: bool,
    pub sources_quality: Option<u8>,
    pub argument_quality: Option<u8>,
    pub quality: Option<u8>,
    pub source_type: Option<String>,
    pub summary: Option<String>,
    pub critical_analysis: Option<String>,
    pub logical_fallacies: Option<String>,
    pub source_analysis: Option<String>,
    pub relation_to_topic: Option<String>,
    pub additional_insights: Option<String>,
}

impl Article {
    /// Date used for ordering and duplicate tie-breaking
    pub fn effective_date(&self) -> i64 {
        self.publish_date.unwrap_or(self.added_date)
    }

    /// Markdown source text for a rich-text field
    pub fn rich_text_source(&self, field: RichTextField) -> Option<&str> {
        match field {
            RichTextField::Title => Some(self.title.as_str()),
            RichTextField::Body => self.body.as_deref(),
            RichTextField::Summary => self.summary.as_deref(),
            RichTextField::CriticalAnalysis => self.critical_analysis.as_deref(),
            RichTextField::LogicalFallacies => self.logical_fallacies.as_deref(),
            RichTextField::SourceAnalysis => self.source_analysis.as_deref(),
            RichTextField::RelationToTopic => self.relation_to_topic.as_deref(),
            RichTextField::AdditionalInsights => self.additional_insights.as_deref(),
        }
    }
}

/// A fully-formed article ready for insertion
///
/// Built by the sync path from network JSON and by the migration engine from
/// legacy records. Blobs carried here are written in the same transaction.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub id: Uuid,
    pub json_url: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub article_url: Option<String>,
    pub domain: Option<String>,
    pub topic: Option<String>,
    pub publish_date: Option<i64>,
    pub added_date: i64,
    pub is_viewed: bool,
    pub is_bookmarked: bool,
    pub sources_quality: Option<u8>,
    pub argument_quality: Option<u8>,
    pub quality: Option<u8>,
    pub source_type: Option<String>,
    pub summary: Option<String>,
    pub critical_analysis: Option<String>,
    pub logical_fallacies: Option<String>,
    pub source_analysis: Option<String>,
    pub relation_to_topic: Option<String>,
    pub additional_insights: Option<String>,
    pub blobs: Vec<(RichTextField, Vec<u8>)>,
}

/// Per-item result of [`Database::insert_articles`](super::Database::insert_articles)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertStatus {
    Inserted,
    /// An article with the same json_url is already stored
    Duplicate,
    /// The row could not be written; the rest of the batch is unaffected
    Failed(String),
}

// ============================================================================
// Queries
// ============================================================================

/// Result ordering for article queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArticleOrder {
    #[default]
    PublishDateDesc,
    PublishDateAsc,
    AddedDateDesc,
}

/// Predicates for [`Database::query_articles`](super::Database::query_articles)
///
/// Dates compare against `publish_date`, falling back to `added_date`.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub topic: Option<String>,
    pub is_viewed: Option<bool>,
    pub is_bookmarked: Option<bool>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: ArticleOrder,
}

impl ArticleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn unread(mut self) -> Self {
        self.is_viewed = Some(false);
        self
    }

    pub fn viewed(mut self, viewed: bool) -> Self {
        self.is_viewed = Some(viewed);
        self
    }

    pub fn bookmarked(mut self, bookmarked: bool) -> Self {
        self.is_bookmarked = Some(bookmarked);
        self
    }

    pub fn between(mut self, since: Option<i64>, until: Option<i64>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order(mut self, order: ArticleOrder) -> Self {
        self.order = order;
        self
    }
}

/// One member of a json_url duplicate group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCandidate {
    pub id: Uuid,
    pub publish_date: Option<i64>,
    pub added_date: i64,
}

/// Articles sharing one json_url
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub json_url: String,
    pub members: Vec<DuplicateCandidate>,
}

// ============================================================================
// Seen + Queue Records
// ============================================================================

/// Marker that a json_url has been fetched by this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenArticle {
    pub id: Uuid,
    pub json_url: String,
    pub date: i64,
}

/// A json_url waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct QueuedArticle {
    pub json_url: String,
    pub queued_at: i64,
    pub attempts: i64,
    pub last_error: Option<String>,
}

// ============================================================================
// Index Verification Report
// ============================================================================

/// Outcome of [`Database::ensure_indexes`](super::Database::ensure_indexes)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Indexes created by this run
    pub created: Vec<String>,
    /// Indexes that already existed
    pub present: Vec<String>,
    /// Indexes skipped because the schema generation lacks a column
    pub skipped: Vec<(String, String)>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}
