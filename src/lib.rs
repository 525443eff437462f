//! Article persistence and synchronization core of the newsdesk client.
//!
//! - [`storage`]: SQLite article store (articles, topics, seen markers, fetch queue)
//! - [`richtext`]: markdown rendered to styled text, cached as checksummed blobs
//! - [`feed`]: remote article API client
//! - [`service`]: sync, dedup and user mutations over the store
//! - [`migration`]: resumable one-time import from the legacy store
//! - [`maintenance`]: retention, dedup, index checks, badge and queue upkeep
//! - [`sync`]: seen-article reconciliation with the server

pub mod config;
pub mod feed;
pub mod maintenance;
pub mod migration;
pub mod richtext;
pub mod service;
pub mod storage;
pub mod sync;
pub mod util;
