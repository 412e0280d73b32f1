//! Configuration file parser for ~/.config/feedrelay/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::storage::DedupStrategy;

/// Environment variable that overrides `webhook_url`.
pub const WEBHOOK_ENV_VAR: &str = "FEEDRELAY_WEBHOOK_URL";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The webhook URLs carry credentials in their path, so Debug masks them.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Incoming-webhook URL entries are posted to.
    pub webhook_url: Option<String>,

    /// Separate webhook for operator alerts. Falls back to `webhook_url`.
    pub alert_webhook_url: Option<String>,

    /// SQLite database file. Defaults to `feedrelay.db` next to the config.
    pub database_path: Option<PathBuf>,

    /// Interval between scheduled runs in `watch` mode.
    pub check_interval_minutes: u64,

    /// Pause between two posts of the same feed.
    pub delivery_delay_ms: u64,

    /// Pause between two feeds of one run.
    pub feed_delay_ms: u64,

    /// Per-request fetch timeout.
    pub fetch_timeout_secs: u64,

    /// Consecutive failed feeds before an alert is raised. 0 = never alert.
    pub failure_alert_threshold: u32,

    /// Wall-clock budget for one run. 0 = unbounded.
    pub run_deadline_secs: u64,

    /// Strategy given to feeds added without `--strategy`.
    pub default_dedup_strategy: DedupStrategy,

    /// User-Agent header sent with feed requests.
    pub user_agent: String,

    /// Allow feeds on localhost and private networks.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_url: None,
            alert_webhook_url: None,
            database_path: None,
            check_interval_minutes: 15,
            delivery_delay_ms: 1000,
            feed_delay_ms: 2000,
            fetch_timeout_secs: 15,
            failure_alert_threshold: 3,
            run_deadline_secs: 0,
            default_dedup_strategy: DedupStrategy::Watermark,
            user_agent: format!("feedrelay/{}", env!("CARGO_PKG_VERSION")),
            allow_private_hosts: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "[REDACTED]"))
            .field(
                "alert_webhook_url",
                &self.alert_webhook_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("database_path", &self.database_path)
            .field("check_interval_minutes", &self.check_interval_minutes)
            .field("delivery_delay_ms", &self.delivery_delay_ms)
            .field("feed_delay_ms", &self.feed_delay_ms)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("failure_alert_threshold", &self.failure_alert_threshold)
            .field("run_deadline_secs", &self.run_deadline_secs)
            .field("default_dedup_strategy", &self.default_dedup_strategy)
            .field("user_agent", &self.user_agent)
            .field("allow_private_hosts", &self.allow_private_hosts)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 12] = [
        "webhook_url",
        "alert_webhook_url",
        "database_path",
        "check_interval_minutes",
        "delivery_delay_ms",
        "feed_delay_ms",
        "fetch_timeout_secs",
        "failure_alert_threshold",
        "run_deadline_secs",
        "default_dedup_strategy",
        "user_agent",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or blank file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value types → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a corrupted file cannot exhaust memory
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
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            interval_minutes = config.check_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Main webhook, preferring the environment over the file.
    pub fn webhook(&self) -> Option<SecretString> {
        self.webhook_with_env(std::env::var(WEBHOOK_ENV_VAR).ok())
    }

    fn webhook_with_env(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.webhook_url.clone())
            .map(|v| SecretString::from(v.trim().to_string()))
    }

    pub fn alert_webhook(&self) -> Option<SecretString> {
        self.alert_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.to_string()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// `None` disables scheduled runs.
    pub fn check_interval(&self) -> Option<Duration> {
        (self.check_interval_minutes > 0)
            .then(|| Duration::from_secs(self.check_interval_minutes.saturating_mul(60)))
    }

    /// `None` means a run may take as long as it needs.
    pub fn run_deadline(&self) -> Option<Duration> {
        (self.run_deadline_secs > 0).then(|| Duration::from_secs(self.run_deadline_secs))
    }
}

// ============================================================================
// Tests
// ============================================================================
