//! Configuration file parser for ~/.config/newsdesk/config.toml.
//!
//! The file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `api_key`
pub const API_KEY_ENV: &str = "NEWSDESK_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Application configuration. Any subset of keys may be given.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the article API
    pub api_base_url: String,

    /// Bearer token for the article API. `NEWSDESK_API_KEY` wins over this.
    pub api_key: Option<SecretString>,

    /// Unbookmarked articles older than this are removed by maintenance
    pub retention_days: u32,

    /// Articles requested per background sync
    pub sync_page_limit: usize,

    /// Deadline for the whole seen-sync network phase
    pub sync_timeout_secs: u64,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Period of the maintenance pass; 0 disables the periodic task
    pub maintenance_interval_minutes: u64,

    /// How long startup waits on migration before continuing without it
    pub migration_ui_timeout_secs: u64,

    /// Path to the previous-generation database, if any
    pub legacy_database: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.newsdesk.app/v1/".to_string(),
            api_key: None,
            retention_days: 30,
            sync_page_limit: 100,
            sync_timeout_secs: 10,
            request_timeout_secs: 30,
            maintenance_interval_minutes: 60,
            migration_ui_timeout_secs: 30,
            legacy_database: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("retention_days", &self.retention_days)
            .field("sync_page_limit", &self.sync_page_limit)
            .field("sync_timeout_secs", &self.sync_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field(
                "maintenance_interval_minutes",
                &self.maintenance_interval_minutes,
            )
            .field("migration_ui_timeout_secs", &self.migration_ui_timeout_secs)
            .field("legacy_database", &self.legacy_database)
            .finish()
    }
}

const KNOWN_KEYS: [&str; 9] = [
    "api_base_url",
    "api_key",
    "retention_days",
    "sync_page_limit",
    "sync_timeout_secs",
    "request_timeout_secs",
    "maintenance_interval_minutes",
    "migration_ui_timeout_secs",
    "legacy_database",
];

impl Config {
    /// Maximum config file size (1 MB)
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `ConfigError::Parse` with line information
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            api_base_url = %config.api_base_url,
            retention_days = config.retention_days,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply environment overrides. A blank variable is ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.apply_api_key_override(&key);
        }
        self
    }

    fn apply_api_key_override(&mut self, key: &str) {
        let key = key.trim();
        if !key.is_empty() {
            self.api_key = Some(SecretString::from(key.to_string()));
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn migration_ui_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_ui_timeout_secs)
    }

    /// `None` when periodic maintenance is disabled
    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_minutes > 0)
            .then(|| Duration::from_secs(self.maintenance_interval_minutes * 60))
    }
}
