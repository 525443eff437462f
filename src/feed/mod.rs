//! Remote article API.
//!
//! - [`ArticleFeed`] is the seam the service and sync layers depend on
//! - [`HttpFeedClient`] implements it over reqwest with timeouts, retry with
//!   backoff, response size caps and SSRF-safe URL checks
//! - [`ArticleJson`] is the wire shape, converted to a storable article with
//!   [`ArticleJson::into_new_article`]

mod client;
mod types;

pub use client::{ArticleFeed, FeedError, HttpFeedClient};
pub use types::{parse_pub_date, ArticleJson, SeenSyncRequest, SeenSyncResponse};
