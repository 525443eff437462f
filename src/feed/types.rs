use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::FeedError;
use crate::storage::{NewArticle, QUALITY_MAX};
use crate::util::clean_field;

/// One article as served by the remote API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleJson {
    pub json_url: Option<String>,
    pub title: Option<String>,
    pub tiny_title: Option<String>,
    pub body: Option<String>,
    pub tiny_summary: Option<String>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub topic: Option<String>,
    pub pub_date: Option<String>,
    pub summary: Option<String>,
    pub critical_analysis: Option<String>,
    pub logical_fallacies: Option<String>,
    pub source_analysis: Option<String>,
    pub relation_to_topic: Option<String>,
    pub additional_insights: Option<String>,
    pub sources_quality: Option<i64>,
    pub argument_quality: Option<i64>,
    pub quality: Option<i64>,
    pub source_type: Option<String>,
}

/// `POST /articles/sync` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenSyncRequest {
    pub seen_articles: Vec<String>,
}

/// `POST /articles/sync` response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeenSyncResponse {
    #[serde(default)]
    pub unseen_articles: Vec<String>,
}

/// Scores outside 0..=3 are clamped; negatives mean "no score"
fn clamp_quality(value: Option<i64>) -> Option<u8> {
    let value = value?;
    if value < 0 {
        return None;
    }
    Some(value.min(i64::from(QUALITY_MAX)) as u8)
}

/// Parse an ISO-8601 timestamp into unix seconds.
///
/// Accepts RFC 3339, naive date-times (read as UTC) and bare dates.
pub fn parse_pub_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    tracing::debug!(pub_date = %raw, "Unparseable pub_date, leaving unset");
    None
}

impl ArticleJson {
    /// Build a storable article with a fresh id.
    ///
    /// Text is sanitized of control characters. A record with neither `title`
    /// nor `tiny_title` is rejected.
    pub fn into_new_article(self, added_date: i64) -> Result<NewArticle, FeedError> {
        let title = clean_field(self.title.as_deref())
            .or_else(|| clean_field(self.tiny_title.as_deref()))
            .ok_or_else(|| {
                FeedError::Malformed(format!(
                    "article {} has no title",
                    self.json_url.as_deref().unwrap_or("<no json_url>")
                ))
            })?;

        let json_url = self
            .json_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let article_url = clean_field(self.url.as_deref());
        let domain = clean_field(self.domain.as_deref()).or_else(|| {
            article_url
                .as_deref()
                .and_then(|u| url::Url::parse(u).ok())
                .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        });

        Ok(NewArticle {
            id: Uuid::new_v4(),
            json_url,
            title,
            body: clean_field(self.body.as_deref())
                .or_else(|| clean_field(self.tiny_summary.as_deref())),
            article_url,
            domain,
            topic: clean_field(self.topic.as_deref()),
            publish_date: self.pub_date.as_deref().and_then(parse_pub_date),
            added_date,
            is_viewed: false,
            is_bookmarked: false,
            sources_quality: clamp_quality(self.sources_quality),
            argument_quality: clamp_quality(self.argument_quality),
            quality: clamp_quality(self.quality),
            source_type: clean_field(self.source_type.as_deref()),
            summary: clean_field(self.summary.as_deref()),
            critical_analysis: clean_field(self.critical_analysis.as_deref()),
            logical_fallacies: clean_field(self.logical_fallacies.as_deref()),
            source_analysis: clean_field(self.source_analysis.as_deref()),
            relation_to_topic: clean_field(self.relation_to_topic.as_deref()),
            additional_insights: clean_field(self.additional_insights.as_deref()),
            blobs: Vec::new(),
        })
    }
}
