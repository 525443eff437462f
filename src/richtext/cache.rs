use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::blob;
use super::field::RichTextField;
use super::markdown::{MarkdownRenderer, PulldownRenderer};
use super::styled::StyledText;
use crate::storage::{Database, StoreError};

/// Decoded blobs kept in memory, keyed by (article, field) and checked
/// against the stored bytes on every read
const MEMO_CAPACITY: usize = 256;

/// Decoded text together with the SHA-256 of the stored bytes it came from
struct MemoEntry {
    digest: [u8; 32],
    text: StyledText,
}

/// Lazily materialized rich-text blobs for article fields.
///
/// Reads a stored blob when it validates, otherwise renders the markdown
/// source and writes the result back. A blob that fails validation is treated
/// as missing and never surfaced as an error.
#[derive(Clone)]
pub struct RichTextCache {
    db: Database,
    renderer: Arc<dyn MarkdownRenderer>,
    memo: Arc<Mutex<LruCache<(Uuid, RichTextField), MemoEntry>>>,
}

impl RichTextCache {
    pub fn new(db: Database) -> Self {
        Self::with_renderer(db, Arc::new(PulldownRenderer))
    }

    pub fn with_renderer(db: Database, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        let capacity = NonZeroUsize::new(MEMO_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            renderer,
            memo: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Styled content for one field of one article.
    ///
    /// With `create_if_missing == false` only a valid stored blob is returned.
    /// Otherwise a missing or invalid blob is regenerated from the markdown
    /// source; a blank source yields `None` without writing anything.
    pub async fn get_attributed_content(
        &self,
        field: RichTextField,
        article_id: Uuid,
        create_if_missing: bool,
    ) -> Result<Option<StyledText>, StoreError> {
        if let Some(text) = self.load_valid(article_id, field).await? {
            return Ok(Some(text));
        }

        if !create_if_missing {
            return Ok(None);
        }

        self.materialize(article_id, field).await
    }

    /// Regenerate every field of an article that lacks a valid blob.
    ///
    /// Returns the number of blobs written. Fields whose blob is already valid,
    /// or whose source is blank, are left alone.
    pub async fn regenerate_missing_blobs(&self, article_id: Uuid) -> Result<usize, StoreError> {
        let mut written = 0;
        for field in RichTextField::ALL {
            if self.load_valid(article_id, field).await?.is_some() {
                continue;
            }
            if self.materialize(article_id, field).await?.is_some() {
                written += 1;
            }
        }

        if written > 0 {
            tracing::debug!(article_id = %article_id, written = written, "Regenerated rich-text blobs");
        }
        Ok(written)
    }

    /// Run [`regenerate_missing_blobs`](Self::regenerate_missing_blobs) over
    /// the most recently added articles.
    pub async fn regenerate_all_missing(&self, limit: i64) -> Result<usize, StoreError> {
        let mut total = 0;
        for id in self.db.recent_article_ids(limit).await? {
            total += self.regenerate_missing_blobs(id).await?;
        }
        tracing::info!(written = total, "Rich-text regeneration pass complete");
        Ok(total)
    }

    async fn load_valid(
        &self,
        article_id: Uuid,
        field: RichTextField,
    ) -> Result<Option<StyledText>, StoreError> {
        let Some(bytes) = self.db.get_blob(article_id, field).await? else {
            self.memo_pop(article_id, field);
            return Ok(None);
        };

        // The memo only answers for the exact bytes it was decoded from
        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        if let Some(text) = self.memo_get(article_id, field, &digest) {
            return Ok(Some(text));
        }

        match blob::decode(&bytes) {
            Ok(text) => {
                self.memo_put(article_id, field, digest, text.clone());
                Ok(Some(text))
            }
            Err(e) => {
                self.memo_pop(article_id, field);
                tracing::warn!(
                    article_id = %article_id,
                    field = %field,
                    error = %e,
                    "Stored rich-text blob is invalid, ignoring"
                );
                Ok(None)
            }
        }
    }

    /// Render from source and persist. Encode or write failures still return
    /// the rendered text.
    async fn materialize(
        &self,
        article_id: Uuid,
        field: RichTextField,
    ) -> Result<Option<StyledText>, StoreError> {
        let Some(source) = self.db.get_rich_text_source(article_id, field).await? else {
            return Ok(None);
        };
        if source.trim().is_empty() {
            return Ok(None);
        }

        let text = self.renderer.render(&source, field.style());
        if text.is_empty() {
            return Ok(None);
        }

        match blob::encode(&text) {
            Ok(bytes) => match self.db.set_blob(article_id, field, &bytes).await {
                Ok(()) => {
                    let digest: [u8; 32] = Sha256::digest(&bytes).into();
                    self.memo_put(article_id, field, digest, text.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        article_id = %article_id,
                        field = %field,
                        error = %e,
                        "Failed to persist rich-text blob"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(article_id = %article_id, field = %field, error = %e, "Failed to encode rich-text blob");
            }
        }

        Ok(Some(text))
    }

    fn memo_get(&self, article_id: Uuid, field: RichTextField, digest: &[u8; 32]) -> Option<StyledText> {
        let mut memo = self.memo.lock().ok()?;
        let text = memo
            .get(&(article_id, field))
            .filter(|entry| &entry.digest == digest)
            .map(|entry| entry.text.clone());
        text
    }

    fn memo_put(&self, article_id: Uuid, field: RichTextField, digest: [u8; 32], text: StyledText) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.put((article_id, field), MemoEntry { digest, text });
        }
    }

    fn memo_pop(&self, article_id: Uuid, field: RichTextField) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.pop(&(article_id, field));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::richtext::field::TextStyle;
    use crate::storage::test_support::{new_article, test_db};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts renders so tests can tell cache hits from regeneration
    struct CountingRenderer(AtomicUsize);

    impl MarkdownRenderer for CountingRenderer {
        fn render(&self, markdown: &str, style: TextStyle) -> StyledText {
            self.0.fetch_add(1, Ordering::SeqCst);
            PulldownRenderer.render(markdown, style)
        }
    }

    async fn setup() -> (Database, Uuid) {
        let db = test_db().await;
        let mut article = new_article("https://x/a.json", "Title");
        article.summary = Some("A **short** summary".to_string());
        db.insert_articles(&[article.clone()]).await.unwrap();
        (db, article.id)
    }

    #[tokio::test]
    async fn test_absent_blob_without_create_is_none() {
        let (db, id) = setup().await;
        let cache = RichTextCache::new(db.clone());

        let text = cache
            .get_attributed_content(RichTextField::Summary, id, false)
            .await
            .unwrap();
        assert!(text.is_none());
        assert!(db.get_blob(id, RichTextField::Summary).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_writes_decodable_blob() {
        let (db, id) = setup().await;
        let cache = RichTextCache::new(db.clone());

        let text = cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text.plain_text(), "A short summary");

        let stored = db.get_blob(id, RichTextField::Summary).await.unwrap().unwrap();
        assert_eq!(blob::decode(&stored).unwrap(), text);
    }

    #[tokio::test]
    async fn test_valid_blob_is_not_rewritten() {
        let (db, id) = setup().await;
        let renderer = Arc::new(CountingRenderer(AtomicUsize::new(0)));
        let cache = RichTextCache::with_renderer(db.clone(), renderer.clone());

        cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap();
        let first = db.get_blob(id, RichTextField::Summary).await.unwrap();

        // Fresh cache with an empty memo still reuses the stored blob
        let cold = RichTextCache::with_renderer(db.clone(), renderer.clone());
        cold.get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap();

        assert_eq!(renderer.0.load(Ordering::SeqCst), 1);
        assert_eq!(db.get_blob(id, RichTextField::Summary).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_regenerated() {
        let (db, id) = setup().await;
        db.set_blob(id, RichTextField::Summary, b"\x00\x01garbage")
            .await
            .unwrap();
        let cache = RichTextCache::new(db.clone());

        let without_create = cache
            .get_attributed_content(RichTextField::Summary, id, false)
            .await
            .unwrap();
        assert!(without_create.is_none());

        let text = cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap()
            .unwrap();
        let stored = db.get_blob(id, RichTextField::Summary).await.unwrap().unwrap();
        assert_eq!(blob::decode(&stored).unwrap(), text);
    }

    #[tokio::test]
    async fn test_blob_corrupted_after_memoized_read_is_regenerated() {
        let (db, id) = setup().await;
        let renderer = Arc::new(CountingRenderer(AtomicUsize::new(0)));
        let cache = RichTextCache::with_renderer(db.clone(), renderer.clone());

        let first = cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap()
            .unwrap();
        db.set_blob(id, RichTextField::Summary, b"\x00garbage")
            .await
            .unwrap();

        let again = cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, first);
        assert_eq!(renderer.0.load(Ordering::SeqCst), 2);
        let stored = db.get_blob(id, RichTextField::Summary).await.unwrap().unwrap();
        assert!(blob::is_valid(&stored));
    }

    #[tokio::test]
    async fn test_corrupted_blob_without_create_ignores_memo() {
        let (db, id) = setup().await;
        let cache = RichTextCache::new(db.clone());

        cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap();
        db.set_blob(id, RichTextField::Summary, b"\x00garbage")
            .await
            .unwrap();

        let text = cache
            .get_attributed_content(RichTextField::Summary, id, false)
            .await
            .unwrap();
        assert!(text.is_none());
    }

    #[tokio::test]
    async fn test_deleted_article_is_not_served_from_memo() {
        let (db, id) = setup().await;
        let cache = RichTextCache::new(db.clone());

        cache
            .get_attributed_content(RichTextField::Summary, id, true)
            .await
            .unwrap();
        db.delete_article(id).await.unwrap();

        let text = cache
            .get_attributed_content(RichTextField::Summary, id, false)
            .await
            .unwrap();
        assert!(text.is_none());
    }

    #[tokio::test]
    async fn test_blank_source_writes_nothing() {
        let (db, id) = setup().await;
        let cache = RichTextCache::new(db.clone());

        let text = cache
            .get_attributed_content(RichTextField::LogicalFallacies, id, true)
            .await
            .unwrap();
        assert!(text.is_none());
        assert!(db
            .get_blob(id, RichTextField::LogicalFallacies)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_regenerate_missing_counts_written() {
        let (db, id) = setup().await;
        let cache = RichTextCache::new(db.clone());

        // title, body and summary carry source text
        assert_eq!(cache.regenerate_missing_blobs(id).await.unwrap(), 3);
        assert_eq!(cache.regenerate_missing_blobs(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_article_is_none() {
        let db = test_db().await;
        let cache = RichTextCache::new(db);
        let text = cache
            .get_attributed_content(RichTextField::Title, Uuid::new_v4(), true)
            .await
            .unwrap();
        assert!(text.is_none());
    }
}
