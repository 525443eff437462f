//! Migration from a real legacy SQLite file into a file-backed store,
//! including resume from an on-disk checkpoint.

use std::path::Path;
use std::sync::Arc;

use newsdesk::migration::{
    LegacyStore, MigrationEngine, MigrationProgress, MigrationState, ProgressStore,
    SqliteLegacyStore, CHECKPOINT_FILE,
};
use newsdesk::richtext::{blob, RichTextCache, RichTextField, StyledLine, StyledSpan, StyledText};
use newsdesk::storage::{Database, NotificationPriority};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Write a legacy database with `count` articles; rowids listed in
/// `untitled` get no title.
async fn write_legacy_db(path: &Path, count: i64, untitled: &[i64]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query(
        r#"
        CREATE TABLE legacy_articles (
            id TEXT, json_url TEXT, article_title TEXT, article_body TEXT, url TEXT,
            domain TEXT, topic TEXT, date INTEGER, added_date INTEGER, read INTEGER,
            bookmarked INTEGER, sources_quality INTEGER, argument_quality INTEGER,
            quality INTEGER, source_type TEXT, summary TEXT, critical_analysis TEXT,
            logical_fallacies TEXT, source_analysis TEXT, relation_to_topic TEXT,
            additional_insights TEXT, title_blob BLOB, body_blob BLOB, summary_blob BLOB,
            critical_analysis_blob BLOB, logical_fallacies_blob BLOB,
            source_analysis_blob BLOB, relation_to_topic_blob BLOB,
            additional_insights_blob BLOB
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("CREATE TABLE legacy_topics (name TEXT, priority TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO legacy_topics VALUES ('Economy', 'urgent'), ('Arts', 'muted')")
        .execute(&pool)
        .await
        .unwrap();

    let valid_blob = blob::encode(&StyledText {
        lines: vec![StyledLine {
            spans: vec![StyledSpan::plain("Archived summary")],
        }],
    })
    .unwrap();

    for rowid in 1..=count {
        let title = (!untitled.contains(&rowid)).then(|| format!("Legacy story {rowid}"));
        let summary_blob = match rowid % 3 {
            0 => Some(valid_blob.clone()),
            1 => Some(b"garbage".to_vec()),
            _ => None,
        };
        sqlx::query(
            "INSERT INTO legacy_articles (rowid, json_url, article_title, topic, date, read, summary, summary_blob)
             VALUES (?, ?, ?, 'Economy', ?, ?, 'A *summary*', ?)",
        )
        .bind(rowid)
        .bind(format!("https://legacy.example.com/{rowid}.json"))
        .bind(title)
        .bind(1_650_000_000 + rowid)
        .bind(rowid % 2 == 0)
        .bind(summary_blob)
        .execute(&pool)
        .await
        .unwrap();
    }
    pool.close().await;
}

async fn open_store(dir: &Path) -> Database {
    Database::open(dir.join("newsdesk.db").to_str().unwrap())
        .await
        .unwrap()
}

async fn engine_for(db: &Database, dir: &Path) -> MigrationEngine {
    let legacy = SqliteLegacyStore::open(&dir.join("legacy.db"))
        .await
        .unwrap()
        .map(|store| Arc::new(store) as Arc<dyn LegacyStore>);
    MigrationEngine::new(
        db.clone(),
        legacy,
        ProgressStore::beside(&dir.join("newsdesk.db")),
    )
}

#[tokio::test]
async fn test_migrates_articles_topics_and_valid_blobs() {
    let dir = tempfile::tempdir().unwrap();
    write_legacy_db(&dir.path().join("legacy.db"), 35, &[7]).await;
    let db = open_store(dir.path()).await;
    let engine = engine_for(&db, dir.path()).await;

    assert!(engine.check_migration_status().await.unwrap());
    assert!(engine.migrate_all_data().await.unwrap());

    let progress = engine.progress();
    assert_eq!(progress.state, MigrationState::Completed);
    assert_eq!(progress.total_batches, 4);
    assert_eq!(progress.migrated_article_ids.len(), 34);
    assert_eq!(progress.skipped_count, 1);
    assert_eq!(db.count_articles().await.unwrap(), 34);
    assert_eq!(db.count_unread().await.unwrap(), 17);

    assert_eq!(
        db.get_topic("Economy").await.unwrap().unwrap().priority,
        NotificationPriority::High
    );
    assert_eq!(
        db.get_topic("Arts").await.unwrap().unwrap().priority,
        NotificationPriority::Off
    );

    // Valid legacy blob carried over as-is, corrupt one dropped
    let kept = db
        .get_article_by_json_url("https://legacy.example.com/3.json")
        .await
        .unwrap()
        .unwrap();
    let dropped = db
        .get_article_by_json_url("https://legacy.example.com/4.json")
        .await
        .unwrap()
        .unwrap();
    let kept_blob = db.get_blob(kept.id, RichTextField::Summary).await.unwrap().unwrap();
    assert_eq!(blob::decode(&kept_blob).unwrap().plain_text(), "Archived summary");
    assert!(db.get_blob(dropped.id, RichTextField::Summary).await.unwrap().is_none());

    // The dropped blob is rebuilt from the markdown source on demand
    let cache = RichTextCache::new(db.clone());
    let text = cache
        .get_attributed_content(RichTextField::Summary, dropped.id, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(text.plain_text(), "A summary");
    assert!(db.get_blob(dropped.id, RichTextField::Summary).await.unwrap().is_some());

    assert!(!engine.check_migration_status().await.unwrap());
}

#[tokio::test]
async fn test_resumes_after_checkpointed_batch() {
    let dir = tempfile::tempdir().unwrap();
    write_legacy_db(&dir.path().join("legacy.db"), 50, &[]).await;
    let db = open_store(dir.path()).await;

    // A previous run committed batches 0 and 1 and was then killed
    let store = ProgressStore::new(dir.path().join(CHECKPOINT_FILE));
    store
        .save(&MigrationProgress {
            state: MigrationState::InProgress,
            last_batch_index: Some(1),
            total_batches: 5,
            percentage: 40.0,
            ..Default::default()
        })
        .unwrap();

    let engine = engine_for(&db, dir.path()).await;
    assert!(engine.was_migration_interrupted());
    assert!(engine.migrate_all_data().await.unwrap());

    // Only batches 2..=4 were read on this run
    assert_eq!(db.count_articles().await.unwrap(), 30);
    assert!(db
        .get_article_by_json_url("https://legacy.example.com/20.json")
        .await
        .unwrap()
        .is_none());
    assert!(db
        .get_article_by_json_url("https://legacy.example.com/21.json")
        .await
        .unwrap()
        .is_some());

    let saved = store.load();
    assert_eq!(saved.state, MigrationState::Completed);
    assert_eq!(saved.last_batch_index, Some(4));
    assert_eq!(saved.percentage, 100.0);
}

#[tokio::test]
async fn test_rerun_after_lost_checkpoint_does_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    write_legacy_db(&dir.path().join("legacy.db"), 12, &[]).await;
    let db = open_store(dir.path()).await;

    let engine = engine_for(&db, dir.path()).await;
    assert!(engine.migrate_all_data().await.unwrap());

    // Checkpoint gone: the store still holds the rows
    std::fs::remove_file(dir.path().join(CHECKPOINT_FILE)).unwrap();

    let rerun = engine_for(&db, dir.path()).await;
    assert!(rerun.migrate_all_data().await.unwrap());
    assert_eq!(rerun.progress().migrated_article_ids.len(), 12);
    assert_eq!(db.count_articles().await.unwrap(), 12);
    assert!(db.duplicate_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_legacy_file_means_nothing_to_migrate() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path()).await;
    let engine = engine_for(&db, dir.path()).await;

    assert!(!engine.check_migration_status().await.unwrap());
    assert!(engine.migrate_all_data().await.unwrap());
    assert_eq!(engine.progress().state, MigrationState::Completed);
}
