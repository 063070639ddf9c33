//! Configuration file parser for ~/.config/newscache/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::coordinator::{CATEGORIES, DEFAULT_CATEGORY};
use crate::feed::FetchOptions;
use crate::storage::{DEFAULT_KEEP_PER_CATEGORY, MAX_KEEP_PER_CATEGORY, MAX_PAGE_SIZE};
use crate::util::validate_feed_url;
use crate::view::PagingConfig;

/// Environment variable that overrides `api_key`
pub const API_KEY_ENV: &str = "NEWSCACHE_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed, but a value is out of range.
    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Custom Debug impl masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the feed endpoint; requests go to `{feed_url}/feed`.
    pub feed_url: String,

    /// Sent as `X-Api-Key`. The `NEWSCACHE_API_KEY` env var takes precedence.
    pub api_key: Option<String>,

    /// Category shown at startup.
    pub default_category: String,

    /// Categories the endpoint serves.
    pub categories: Vec<String>,

    /// Rows kept per category after a refresh, bookmarks not counted.
    pub keep_per_category: usize,

    /// Rows per page in live views.
    pub page_size: usize,

    /// Load the next page when the reader is this close to the end.
    pub prefetch_distance: usize,

    pub request_timeout_secs: u64,

    /// Retries for 429, 5xx and truncated responses.
    pub max_retries: u32,

    /// First retry delay; doubles on every retry.
    pub retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "http://localhost:8080/".to_string(),
            api_key: None,
            default_category: DEFAULT_CATEGORY.to_string(),
            categories: CATEGORIES.iter().map(|c| c.to_string()).collect(),
            keep_per_category: DEFAULT_KEEP_PER_CATEGORY,
            page_size: 20,
            prefetch_distance: 10,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 2000,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_url", &self.feed_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("default_category", &self.default_category)
            .field("categories", &self.categories)
            .field("keep_per_category", &self.keep_per_category)
            .field("page_size", &self.page_size)
            .field("prefetch_distance", &self.prefetch_distance)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "feed_url",
    "api_key",
    "default_category",
    "categories",
    "keep_per_category",
    "page_size",
    "prefetch_distance",
    "request_timeout_secs",
    "max_retries",
    "retry_backoff_ms",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Values are not range-checked here; call [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to bound memory use.
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
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
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
            feed_url = %config.feed_url,
            default_category = %config.default_category,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject values the rest of the crate cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_feed_url(&self.feed_url).map_err(|e| ConfigError::Invalid {
            key: "feed_url",
            reason: e.to_string(),
        })?;

        if self.categories.is_empty() || self.categories.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "categories",
                reason: "must be a non-empty list of non-blank names".to_string(),
            });
        }
        if !self.categories.contains(&self.default_category) {
            return Err(ConfigError::Invalid {
                key: "default_category",
                reason: format!("`{}` is not in `categories`", self.default_category),
            });
        }

        check_range("keep_per_category", self.keep_per_category as u64, 1, MAX_KEEP_PER_CATEGORY as u64)?;
        check_range("page_size", self.page_size as u64, 1, MAX_PAGE_SIZE as u64)?;
        check_range("prefetch_distance", self.prefetch_distance as u64, 0, MAX_PAGE_SIZE as u64)?;
        check_range("request_timeout_secs", self.request_timeout_secs, 1, 600)?;
        check_range("max_retries", self.max_retries as u64, 0, 10)?;
        check_range("retry_backoff_ms", self.retry_backoff_ms, 0, 60_000)?;

        Ok(())
    }

    /// The API key to send: env var first, then the config file.
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .map(SecretString::from)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn paging(&self) -> PagingConfig {
        PagingConfig::new(self.page_size, self.prefetch_distance)
    }

    pub fn is_known_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("{value} is outside {min}..={max}"),
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
