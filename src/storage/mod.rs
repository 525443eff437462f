mod articles;
mod blobs;
mod indexes;
mod preferences;
mod queue;
mod schema;
mod seen;
mod topics;
mod types;

pub use indexes::{IndexSpec, EXPECTED_INDEXES};
pub use queue::MAX_QUEUE_ATTEMPTS;
pub use schema::Database;
pub use types::{
    Article, ArticleFilter, ArticleOrder, DuplicateCandidate, DuplicateGroup, IndexReport,
    InsertStatus, NewArticle, NotificationPriority, QueuedArticle, SeenArticle, StoreError, Topic,
    QUALITY_MAX, QUALITY_NONE,
};
