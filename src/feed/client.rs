use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use super::types::{ArticleJson, SeenSyncRequest, SeenSyncResponse};
use crate::util::{same_origin, validate_base_url, validate_url, UrlValidationError};

/// Largest response body accepted from the API
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Retries after the first attempt for transient failures (1s, 2s, 4s)
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Rejected URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Malformed article: {0}")]
    Malformed(String),
}

impl FeedError {
    /// True if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Timeout(_) | FeedError::Network(_) => true,
            FeedError::HttpStatus(status) => *status >= 500 || *status == 429,
            FeedError::ResponseTooLarge(_)
            | FeedError::InvalidUtf8
            | FeedError::InvalidUrl(_)
            | FeedError::Decode(_)
            | FeedError::Malformed(_) => false,
        }
    }
}

/// Remote source of articles
#[async_trait]
pub trait ArticleFeed: Send + Sync {
    /// A page of articles, optionally restricted to a topic
    async fn fetch_articles(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ArticleJson>, FeedError>;

    /// One article by its json_url
    async fn fetch_article(&self, json_url: &str) -> Result<ArticleJson, FeedError>;

    /// Report seen json_urls, returning the ones the server has that we lack
    async fn sync_seen(&self, seen: &[String]) -> Result<Vec<String>, FeedError>;
}

/// reqwest-backed [`ArticleFeed`]
#[derive(Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    base: Url,
    api_key: Option<SecretString>,
    request_timeout: Duration,
    max_retries: u32,
}

impl std::fmt::Debug for HttpFeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFeedClient")
            .field("base", &self.base.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl HttpFeedClient {
    /// Build a client for `base_url`. Plain HTTP is refused except for localhost.
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let mut base = validate_base_url(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            api_key,
            request_timeout,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Override the retry count (0 disables retries)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, FeedError> {
        self.base
            .join(path)
            .map_err(|e| FeedError::InvalidUrl(UrlValidationError::InvalidUrl(e)))
    }

    /// URLs on the API host are trusted; anything else must pass SSRF checks.
    fn resolve_article_url(&self, json_url: &str) -> Result<Url, FeedError> {
        if let Ok(url) = Url::parse(json_url) {
            if same_origin(&url, &self.base) {
                return Ok(url);
            }
        }
        Ok(validate_url(json_url)?)
    }

    async fn get_text(&self, url: &Url) -> Result<String, FeedError> {
        self.with_retry(url, || self.send_once(self.client.get(url.as_str()), url))
            .await
    }

    async fn post_json<T: serde::Serialize + Sync>(
        &self,
        url: &Url,
        body: &T,
    ) -> Result<String, FeedError> {
        self.with_retry(url, || {
            self.send_once(self.client.post(url.as_str()).json(body), url)
        })
        .await
    }

    /// Exponential backoff over transient errors: 1s, 2s, 4s.
    async fn with_retry<F, Fut>(&self, url: &Url, mut attempt: F) -> Result<String, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<String, FeedError>>,
    {
        let mut retry_count = 0;
        loop {
            match attempt().await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && retry_count < self.max_retries => {
                    let delay = 1u64 << retry_count;
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        retry = retry_count + 1,
                        delay_secs = delay,
                        "Retrying feed request after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        mut request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<String, FeedError> {
        // Credentials only travel to the configured API origin
        if let Some(key) = &self.api_key {
            if same_origin(url, &self.base) {
                request = request.bearer_auth(key.expose_secret());
            }
        }

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| FeedError::Timeout(self.request_timeout.as_secs()))??;

        if !response.status().is_success() {
            return Err(FeedError::HttpStatus(response.status().as_u16()));
        }

        read_limited_text(response, MAX_RESPONSE_SIZE).await
    }
}

#[async_trait]
impl ArticleFeed for HttpFeedClient {
    async fn fetch_articles(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ArticleJson>, FeedError> {
        let mut url = self.endpoint("articles")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(topic) = topic {
                query.append_pair("topic", topic);
            }
            query.append_pair("limit", &limit.to_string());
        }

        let body = self.get_text(&url).await?;
        decode_article_list(&body)
    }

    async fn fetch_article(&self, json_url: &str) -> Result<ArticleJson, FeedError> {
        let url = self.resolve_article_url(json_url)?;
        let body = self.get_text(&url).await?;
        let mut article: ArticleJson = serde_json::from_str(&body)?;
        if article.json_url.is_none() {
            article.json_url = Some(json_url.to_string());
        }
        Ok(article)
    }

    async fn sync_seen(&self, seen: &[String]) -> Result<Vec<String>, FeedError> {
        let url = self.endpoint("articles/sync")?;
        let request = SeenSyncRequest {
            seen_articles: seen.to_vec(),
        };
        let body = self.post_json(&url, &request).await?;
        let response: SeenSyncResponse = serde_json::from_str(&body)?;
        Ok(response.unseen_articles)
    }
}

/// Decode a list response item by item so one bad record does not sink the page.
///
/// Accepts a bare array or an object with an `articles` array.
fn decode_article_list(body: &str) -> Result<Vec<ArticleJson>, FeedError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("articles") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(FeedError::Malformed(
                    "response object has no articles array".to_string(),
                ))
            }
        },
        _ => return Err(FeedError::Malformed("unexpected response shape".to_string())),
    };

    let total = items.len();
    let articles: Vec<ArticleJson> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ArticleJson>(item) {
            Ok(article) => Some(article),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable article in list response");
                None
            }
        })
        .collect();

    if articles.len() < total {
        tracing::debug!(decoded = articles.len(), total = total, "Partial article list decode");
    }
    Ok(articles)
}

async fn read_limited_text(response: reqwest::Response, limit: usize) -> Result<String, FeedError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FeedError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| FeedError::InvalidUtf8)
}
