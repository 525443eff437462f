use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use newsdesk::config::Config;
use newsdesk::feed::HttpFeedClient;
use newsdesk::maintenance::MaintenanceCoordinator;
use newsdesk::migration::{
    LegacyStore, MigrationEngine, MigrationWait, ProgressStore, SqliteLegacyStore,
};
use newsdesk::richtext::RichTextCache;
use newsdesk::service::{ArticleService, LogBadgeSink};
use newsdesk::storage::{ArticleFilter, Database, StoreError};
use newsdesk::sync::{SyncOrchestrator, SyncOutcome};

/// Get the config directory path (~/.config/newsdesk/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsdesk"))
}

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Article store, sync and maintenance for newsdesk")]
struct Args {
    /// Config file (default: ~/.config/newsdesk/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/newsdesk/newsdesk.db)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import the legacy store, resuming an interrupted run
    Migrate {
        /// Discard a failed run's checkpoint and start over
        #[arg(long)]
        reset: bool,
    },
    /// Fetch a page of articles from the server
    Sync {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Report recently seen articles and fetch the ones the server says are missing
    SeenSync,
    /// Run one maintenance pass, or keep running on the configured interval
    Maintain {
        #[arg(long)]
        daemon: bool,
    },
    /// Render and store rich-text blobs that are missing or invalid
    Regenerate {
        #[arg(long, default_value_t = 500)]
        limit: i64,
    },
    /// List stored articles
    List {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        unread: bool,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Mark every stored article as read
    MarkRead,
    /// Show store and migration status
    Status,
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(dir) {
        Ok(metadata) => {
            let mut perms = metadata.permissions();
            perms.set_mode(0o700);
            if let Err(e) = std::fs::set_permissions(dir, perms) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to set config directory permissions to 0700");
            }
        }
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to read config directory metadata");
        }
    }
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) {}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsdesk appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn migration_engine(config: &Config, db: &Database, db_path: &Path) -> Result<MigrationEngine> {
    let legacy: Option<Arc<dyn LegacyStore>> = match &config.legacy_database {
        Some(path) => SqliteLegacyStore::open(path)
            .await
            .with_context(|| format!("Failed to open legacy database '{}'", path.display()))?
            .map(|store| Arc::new(store) as Arc<dyn LegacyStore>),
        None => None,
    };
    Ok(MigrationEngine::new(
        db.clone(),
        legacy,
        ProgressStore::beside(db_path),
    ))
}

/// Import pending legacy data before a command writes new articles
async fn migrate_first(config: &Config, db: &Database, db_path: &Path) -> Result<()> {
    let engine = migration_engine(config, db, db_path).await?;
    if engine.was_migration_interrupted() {
        println!("Resuming interrupted migration...");
    }
    let finished = engine
        .ensure_migrated(config.migration_ui_timeout())
        .await
        .context("Legacy migration failed; run `newsdesk migrate` to retry")?;
    if !finished {
        anyhow::bail!("Legacy migration did not finish; run `newsdesk migrate` to resume");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }
    restrict_dir_permissions(&config_dir);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?
        .with_env_overrides();
    tracing::debug!(config = ?config, "Effective configuration");

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config_dir.join("newsdesk.db"));
    let db = open_database(&db_path).await?;

    let feed = HttpFeedClient::new(
        &config.api_base_url,
        config.api_key.clone(),
        config.request_timeout(),
    )
    .context("Invalid API configuration")?;
    let badge = Arc::new(LogBadgeSink::new());
    let service = ArticleService::new(db.clone(), Arc::new(feed), badge.clone())
        .with_page_limit(config.sync_page_limit);

    match args.command {
        Command::Migrate { reset } => {
            let engine = migration_engine(&config, &db, &db_path).await?;
            if reset && engine.reset_failed()? {
                println!("Discarded failed migration checkpoint.");
            }
            if engine.was_migration_interrupted() {
                println!("Resuming interrupted migration...");
            }

            let terminate = engine.clone();
            let mut wait = Box::pin(engine.run_with_ui_timeout(config.migration_ui_timeout()));
            let outcome = tokio::select! {
                outcome = &mut wait => outcome,
                _ = tokio::signal::ctrl_c() => {
                    terminate.app_will_terminate();
                    println!("Interrupted; progress saved, rerun to resume.");
                    return Ok(());
                }
            };

            let result = match outcome {
                MigrationWait::Finished(result) => result,
                MigrationWait::TimedOut(handle) => {
                    println!("Migration is taking a while; continuing in the background...");
                    tokio::select! {
                        joined = handle => joined.context("Migration task panicked")?,
                        _ = tokio::signal::ctrl_c() => {
                            terminate.app_will_terminate();
                            println!("Interrupted; progress saved, rerun to resume.");
                            return Ok(());
                        }
                    }
                }
            };
            let progress = engine.progress();
            match result.context("Migration failed")? {
                true => println!(
                    "Migration complete: {} articles, {} topics, {} skipped",
                    progress.migrated_article_ids.len(),
                    progress.migrated_topic_names.len(),
                    progress.skipped_count
                ),
                false => println!(
                    "Migration stopped at {:.0}%; rerun to resume.",
                    progress.percentage
                ),
            }
        }
        Command::Sync { topic, limit } => {
            migrate_first(&config, &db, &db_path).await?;
            let limit = limit.unwrap_or(config.sync_page_limit);
            let inserted = service
                .sync_articles_from_server(topic.as_deref(), limit)
                .await
                .context("Sync failed")?;
            println!("Inserted {} new articles", inserted);
        }
        Command::SeenSync => {
            migrate_first(&config, &db, &db_path).await?;
            let orchestrator = SyncOrchestrator::new(service.clone()).with_timeout(config.sync_timeout());
            match orchestrator
                .send_recent_articles_to_server()
                .await
                .context("Seen sync failed")?
            {
                SyncOutcome::Completed {
                    reported,
                    inserted,
                    skipped,
                    queued,
                } => println!(
                    "Reported {} seen, inserted {}, skipped {}, queued {} for retry",
                    reported, inserted, skipped, queued
                ),
                SyncOutcome::Skipped => println!("Server unreachable or too slow; skipped this round."),
            }
        }
        Command::Maintain { daemon } => {
            migrate_first(&config, &db, &db_path).await?;
            let coordinator = MaintenanceCoordinator::new(service.clone(), config.retention_days);
            match (daemon, config.maintenance_interval()) {
                (true, Some(interval)) => {
                    let handle = coordinator.spawn_periodic(interval);
                    tokio::signal::ctrl_c()
                        .await
                        .context("Failed to listen for Ctrl-C")?;
                    handle.abort();
                }
                (true, None) => {
                    anyhow::bail!("maintenance_interval_minutes is 0; periodic maintenance is disabled")
                }
                (false, _) => {
                    let report = coordinator.run_all().await;
                    if let Some(cleanup) = report.cleanup {
                        println!(
                            "Cleanup: {} articles, {} seen markers removed",
                            cleanup.articles_removed, cleanup.seen_pruned
                        );
                    }
                    if let Some(removed) = report.duplicates_removed {
                        println!("Duplicates removed: {}", removed);
                    }
                    if let Some(indexes) = &report.indexes {
                        println!(
                            "Indexes: {} created, {} present, {} skipped",
                            indexes.created.len(),
                            indexes.present.len(),
                            indexes.skipped.len()
                        );
                    }
                    if let Some(unread) = report.unread {
                        println!("Unread: {}", unread);
                    }
                    for error in &report.errors {
                        eprintln!("Warning: {}", error);
                    }
                }
            }
        }
        Command::Regenerate { limit } => {
            let cache = RichTextCache::new(db.clone());
            let written = cache
                .regenerate_all_missing(limit)
                .await
                .context("Failed to regenerate rich-text blobs")?;
            println!("Wrote {} rich-text blobs", written);
        }
        Command::List {
            topic,
            unread,
            limit,
        } => {
            let mut filter = ArticleFilter::new().limit(limit);
            if let Some(topic) = topic {
                filter = filter.topic(topic);
            }
            if unread {
                filter = filter.unread();
            }
            let articles = service
                .fetch_articles(&filter)
                .await
                .context("Failed to load articles")?;
            for article in articles {
                let date = chrono::DateTime::from_timestamp(article.effective_date(), 0)
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                let marker = if article.is_viewed { ' ' } else { '*' };
                println!(
                    "{} {} [{}] {}",
                    marker,
                    date,
                    article.topic.as_deref().unwrap_or("-"),
                    article.title
                );
            }
        }
        Command::MarkRead => {
            let changed = service
                .mark_all_read()
                .await
                .context("Failed to mark articles read")?;
            println!("Marked {} articles read", changed);
        }
        Command::Status => {
            let engine = migration_engine(&config, &db, &db_path).await?;
            let progress = engine.progress();
            println!("Articles:  {}", db.count_articles().await?);
            println!("Unread:    {}", db.count_unread().await?);
            println!("Seen:      {}", db.count_seen().await?);
            println!("Queued:    {}", db.count_queued().await?);
            println!(
                "Migration: {:?} ({:.0}%){}",
                progress.state,
                progress.percentage,
                if engine.was_migration_interrupted() {
                    ", interrupted"
                } else {
                    ""
                }
            );
            if engine.check_migration_status().await? {
                println!("Legacy data is waiting to be migrated; run `newsdesk migrate`.");
            }
            for key in ["sync.last_run", "sync.last_seen_sync", "maintenance.last_cleanup"] {
                if let Some(at) = db.last_run(key).await? {
                    let when = chrono::DateTime::from_timestamp(at, 0)
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_default();
                    println!("{:<26} {}", key, when);
                }
            }
        }
    }

    // Let the last badge update land before closing the pool
    tokio::task::yield_now().await;
    tracing::debug!(unread = badge.last_count(), "Final badge count");
    db.close().await;
    Ok(())
}
