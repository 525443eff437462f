use std::str::FromStr;

use super::schema::Database;
use super::types::{NotificationPriority, StoreError, Topic};

impl Database {
    // ========================================================================
    // Topic Operations
    // ========================================================================

    /// Create the topic if missing. An existing topic keeps its priority.
    pub async fn ensure_topic(
        &self,
        name: &str,
        priority: NotificationPriority,
    ) -> Result<(), StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("topic name is empty".to_string()));
        }

        sqlx::query("INSERT OR IGNORE INTO topics (name, priority, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(priority.as_str())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_topic(&self, name: &str) -> Result<Option<Topic>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT name, priority FROM topics WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(name, priority)| topic_from_row(name, &priority))
            .transpose()
    }

    /// All topics, alphabetically
    pub async fn list_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, priority FROM topics ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(name, priority)| topic_from_row(name, &priority))
            .collect()
    }

    /// Change a topic's notification priority. Returns `NotFound` if absent.
    pub async fn set_topic_priority(
        &self,
        name: &str,
        priority: NotificationPriority,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE topics SET priority = ? WHERE name = ?")
            .bind(priority.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("topic {name}")));
        }
        Ok(())
    }

    /// Number of articles linked to a topic
    pub async fn count_articles_in_topic(&self, name: &str) -> Result<i64, StoreError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM article_topics WHERE topic_name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}

fn topic_from_row(name: String, priority: &str) -> Result<Topic, StoreError> {
    Ok(Topic {
        name,
        priority: NotificationPriority::from_str(priority)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{new_article, test_db};

    #[tokio::test]
    async fn test_ensure_topic_is_idempotent() {
        let db = test_db().await;
        db.ensure_topic("Science", NotificationPriority::High)
            .await
            .unwrap();
        db.ensure_topic("Science", NotificationPriority::Off)
            .await
            .unwrap();

        let topic = db.get_topic("Science").await.unwrap().unwrap();
        assert_eq!(topic.priority, NotificationPriority::High);
        assert_eq!(db.list_topics().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_topic_rejects_blank() {
        let db = test_db().await;
        let err = db
            .ensure_topic("   ", NotificationPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_set_topic_priority() {
        let db = test_db().await;
        db.ensure_topic("Tech", NotificationPriority::Normal)
            .await
            .unwrap();
        db.set_topic_priority("Tech", NotificationPriority::Off)
            .await
            .unwrap();
        assert_eq!(
            db.get_topic("Tech").await.unwrap().unwrap().priority,
            NotificationPriority::Off
        );

        let err = db
            .set_topic_priority("Missing", NotificationPriority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_topic_link_removed_with_article() {
        let db = test_db().await;
        let mut article = new_article("https://x/a.json", "A");
        article.topic = Some("World".to_string());
        db.insert_articles(&[article.clone()]).await.unwrap();
        assert_eq!(db.count_articles_in_topic("World").await.unwrap(), 1);

        db.delete_article(article.id).await.unwrap();
        assert_eq!(db.count_articles_in_topic("World").await.unwrap(), 0);
        // Topics outlive their articles
        assert!(db.get_topic("World").await.unwrap().is_some());
    }
}
