//! Configuration file parser for `fhirsite.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feed::MAX_EPISODES;
use crate::util::{validate_url, UrlValidationError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: UrlValidationError,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level relay configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind_addr: String,

    /// Upstream podcast RSS feed, fetched directly (no CORS proxy).
    pub feed_url: String,

    /// Public podcast page linked from the fallback UI when the feed is unavailable.
    pub podcast_page_url: String,

    /// Episodes kept per fetch, clamped to 1..=10.
    pub max_episodes: usize,

    /// How long a fetched feed is served before refreshing. 0 = refresh every request.
    pub cache_ttl_secs: u64,

    pub request_timeout_secs: u64,

    pub max_feed_bytes: usize,

    /// Retries for rate limiting and server errors. 0 = single attempt.
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    /// Optional catalog TOML replacing the built-in resources and tools catalog.
    pub catalog_path: Option<PathBuf>,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            feed_url: "https://fhir.substack.com/feed".to_string(),
            podcast_page_url: "https://fhir.substack.com/podcast".to_string(),
            max_episodes: MAX_EPISODES,
            cache_ttl_secs: 900,
            request_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            max_retries: 2,
            retry_base_delay_ms: 500,
            catalog_path: None,
            user_agent: concat!("fhirsite/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 11] = [
        "bind_addr",
        "feed_url",
        "podcast_page_url",
        "max_episodes",
        "cache_ttl_secs",
        "request_timeout_secs",
        "max_feed_bytes",
        "max_retries",
        "retry_base_delay_ms",
        "catalog_path",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text. Blank input yields defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
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
        tracing::info!(feed = %config.feed_url, bind = %config.bind_addr, "Loaded configuration");
        Ok(config)
    }

    /// Checks values that serde cannot: addresses, URLs and ranges.
    ///
    /// Both upstream URLs go through [`validate_url`], so the relay can never
    /// be pointed at localhost or a private network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "bind_addr",
                reason: e.to_string(),
            })?;

        validate_url(&self.feed_url).map_err(|source| ConfigError::InvalidUrl {
            field: "feed_url",
            source,
        })?;
        validate_url(&self.podcast_page_url).map_err(|source| ConfigError::InvalidUrl {
            field: "podcast_page_url",
            source,
        })?;

        if self.max_episodes == 0 || self.max_episodes > MAX_EPISODES {
            return Err(ConfigError::InvalidValue {
                field: "max_episodes",
                reason: format!("must be between 1 and {MAX_EPISODES}"),
            });
        }
        if self.max_feed_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_feed_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
