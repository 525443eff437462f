use super::schema::Database;
use super::types::{IndexReport, StoreError};

/// An index the query paths expect to exist
#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Composite and partial indexes over the article query predicates
pub const EXPECTED_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "idx_articles_topic_date",
        sql: "CREATE INDEX idx_articles_topic_date ON articles(topic, publish_date DESC)",
    },
    IndexSpec {
        name: "idx_articles_bookmarked_date",
        sql: "CREATE INDEX idx_articles_bookmarked_date ON articles(is_bookmarked, publish_date DESC)",
    },
    IndexSpec {
        name: "idx_articles_unread",
        sql: "CREATE INDEX idx_articles_unread ON articles(publish_date DESC) WHERE is_viewed = 0",
    },
    IndexSpec {
        name: "idx_articles_added_date",
        sql: "CREATE INDEX idx_articles_added_date ON articles(added_date)",
    },
    IndexSpec {
        name: "idx_articles_quality",
        sql: "CREATE INDEX idx_articles_quality ON articles(quality, sources_quality, argument_quality)",
    },
];

impl Database {
    /// Verify the expected query indexes, creating any that are missing.
    pub async fn ensure_indexes(&self) -> Result<IndexReport, StoreError> {
        self.ensure_index_specs(EXPECTED_INDEXES).await
    }

    /// Create each index unless present.
    ///
    /// "already exists" (a racing creator) counts as present. "no such column"
    /// means this schema generation lacks the column and the index is skipped.
    /// Any other failure is returned.
    pub async fn ensure_index_specs(&self, specs: &[IndexSpec]) -> Result<IndexReport, StoreError> {
        let mut report = IndexReport::default();

        for spec in specs {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?")
                    .bind(spec.name)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_some() {
                report.present.push(spec.name.to_string());
                continue;
            }

            match sqlx::query(spec.sql).execute(&self.pool).await {
                Ok(_) => {
                    tracing::info!(index = spec.name, "Created missing index");
                    report.created.push(spec.name.to_string());
                }
                Err(e) => {
                    let message = e.to_string();
                    if message.contains("already exists") {
                        report.present.push(spec.name.to_string());
                    } else if message.contains("no such column") {
                        tracing::warn!(index = spec.name, error = %message, "Skipping index for missing column");
                        report.skipped.push((spec.name.to_string(), message));
                    } else {
                        return Err(StoreError::Database(e));
                    }
                }
            }
        }

        Ok(report)
    }
}
