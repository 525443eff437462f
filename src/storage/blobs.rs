use uuid::Uuid;

use super::schema::Database;
use super::types::StoreError;
use crate::richtext::RichTextField;

// Column names are interpolated from the static RichTextField table, never
// from caller input.

impl Database {
    // ========================================================================
    // Rich-Text Blob Columns
    // ========================================================================

    /// Stored blob for a field. Missing article and missing blob both read as `None`.
    pub async fn get_blob(
        &self,
        article_id: Uuid,
        field: RichTextField,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let sql = format!("SELECT {} FROM articles WHERE id = ?", field.blob_column());
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as(&sql)
            .bind(article_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(blob,)| blob))
    }

    /// Store a blob for a field. Returns `NotFound` if the article is absent.
    pub async fn set_blob(
        &self,
        article_id: Uuid,
        field: RichTextField,
        blob: &[u8],
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE articles SET {} = ? WHERE id = ?", field.blob_column());
        let result = sqlx::query(&sql)
            .bind(blob)
            .bind(article_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("article {article_id}")));
        }
        Ok(())
    }

    /// Markdown source text for a field
    pub async fn get_rich_text_source(
        &self,
        article_id: Uuid,
        field: RichTextField,
    ) -> Result<Option<String>, StoreError> {
        let sql = format!("SELECT {} FROM articles WHERE id = ?", field.source_column());
        let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
            .bind(article_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(source,)| source))
    }
}
