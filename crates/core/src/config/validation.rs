//! Configuration validation rules.
//!
//! This module provides validation logic for `WorkerConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::WorkerConfig;
use thiserror::Error;

/// Bounds for the network-first race, in milliseconds.
const MIN_RACE_TIMEOUT_MS: u64 = 100;
const MAX_RACE_TIMEOUT_MS: u64 = 5_000;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn require(field: &str, value: &str, hint: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing { field: field.into(), hint: hint.into() });
    }
    Ok(())
}

impl WorkerConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an http(s) URL
    /// - the cache prefixes collide
    /// - a network-first timeout is outside 100..=5000 ms
    /// - `fetch_timeout_ms` is outside 100..=300000 ms
    /// - `max_dynamic_entries` is 0
    ///
    /// Returns `ConfigError::Missing` if a required name is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(invalid("origin", format!("unsupported scheme: {}", origin.scheme())));
        }

        require("cache_version", &self.cache_version, "Set WAYPOST_CACHE_VERSION to the deployment tag")?;
        require("static_cache_prefix", &self.static_cache_prefix, "Set WAYPOST_STATIC_CACHE_PREFIX")?;
        require("dynamic_cache_prefix", &self.dynamic_cache_prefix, "Set WAYPOST_DYNAMIC_CACHE_PREFIX")?;
        require("replay_endpoint", &self.replay_endpoint, "Set WAYPOST_REPLAY_ENDPOINT")?;
        require("sync_tag", &self.sync_tag, "Set WAYPOST_SYNC_TAG")?;

        if self.static_cache_prefix == self.dynamic_cache_prefix {
            return Err(invalid("dynamic_cache_prefix", "must differ from static_cache_prefix"));
        }

        for (field, value) in [("api_timeout_ms", self.api_timeout_ms), ("default_timeout_ms", self.default_timeout_ms)] {
            if !(MIN_RACE_TIMEOUT_MS..=MAX_RACE_TIMEOUT_MS).contains(&value) {
                return Err(invalid(
                    field,
                    format!("must be between {MIN_RACE_TIMEOUT_MS}ms and {MAX_RACE_TIMEOUT_MS}ms"),
                ));
            }
        }

        if self.fetch_timeout_ms < 100 {
            return Err(invalid("fetch_timeout_ms", "must be at least 100ms"));
        }
        if self.fetch_timeout_ms > 300_000 {
            return Err(invalid("fetch_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_dynamic_entries == 0 {
            return Err(invalid("max_dynamic_entries", "must be greater than 0"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.critical_resources.is_empty() {
            tracing::warn!("critical_resources is empty; nothing will be pre-populated on install");
        }

        Ok(())
    }
}
