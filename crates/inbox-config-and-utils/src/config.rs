//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://random.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "random-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Sync engine tuning.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Tuning knobs for the sync engine.
///
/// All durations are stored as integers so the JSON file stays hand-editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Notifications fetched per page.
    pub page_size: u32,
    /// Delay between a refresh resolving and the unread counter unfreezing.
    pub freeze_grace_ms: u64,
    /// Maximum dedup entries kept before a bulk eviction.
    pub dedup_capacity: usize,
    /// How long a handled event id is remembered.
    pub dedup_retention_secs: u64,
    /// HTTP request timeout for data API calls.
    pub request_timeout_secs: u64,
    /// Upper bound on one realtime subscribe attempt.
    pub subscribe_timeout_secs: u64,
    /// First resubscribe delay.
    pub backoff_base_ms: u64,
    /// Resubscribe delay cap.
    pub backoff_max_ms: u64,
    /// Realtime heartbeat interval.
    pub heartbeat_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            freeze_grace_ms: 100,
            dedup_capacity: 1000,
            dedup_retention_secs: 300,
            request_timeout_secs: 30,
            subscribe_timeout_secs: 10,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            heartbeat_interval_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn freeze_grace(&self) -> Duration {
        Duration::from_millis(self.freeze_grace_ms)
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            supabase_url: DEFAULT_SUPABASE_URL.to_string(),
            supabase_publishable_key: DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("INBOX_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("INBOX_SUPABASE_URL") {
            self.supabase_url = url;
        }
        if let Ok(key) = std::env::var("INBOX_SUPABASE_PUBLISHABLE_KEY") {
            self.supabase_publishable_key = key;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.supabase_url()?;
        if self.sync.page_size == 0 {
            return Err(CoreError::Config("sync.page_size must be at least 1".to_string()));
        }
        if self.sync.dedup_capacity == 0 {
            return Err(CoreError::Config(
                "sync.dedup_capacity must be at least 1".to_string(),
            ));
        }
        if self.sync.backoff_base_ms > self.sync.backoff_max_ms {
            return Err(CoreError::Config(
                "sync.backoff_base_ms must not exceed sync.backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }
}
