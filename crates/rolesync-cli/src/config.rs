//! CLI configuration parsing.
//!
//! A single TOML file describes the authority endpoint and the engine
//! tuning knobs. Every field has a default, so `rolesync reconcile --mock`
//! works with no config file at all.

use std::path::Path;
use std::time::Duration;

use rolesync_core::RetryPolicy;
use rolesync_core::authority::RateLimitConfig;
use rolesync_core::engine::EngineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Could not read the file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Could not parse the TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// Authority endpoint settings.
    #[serde(default)]
    pub authority: AuthoritySection,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineSection,
}

impl CliConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Authority endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthoritySection {
    /// Authority API base URL.
    pub base_url: Option<String>,

    /// Bearer token.
    pub api_token: Option<String>,

    /// Outbound calls allowed per rate-limit window.
    #[serde(default = "default_max_calls")]
    pub max_calls_per_window: u32,

    /// Rate-limit window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl AuthoritySection {
    /// The rate limiter settings for this endpoint.
    #[must_use]
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_calls: self.max_calls_per_window,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Operations dispatched concurrently per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Remote attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter upper bound in milliseconds.
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl EngineSection {
    /// The engine configuration these settings describe.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_size: self.chunk_size,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                jitter_max: Duration::from_millis(self.jitter_max_ms),
            },
        }
    }
}

fn default_max_calls() -> u32 {
    40
}

fn default_window_secs() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_max_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = CliConfig::default();
        let engine = config.engine.engine_config();
        assert_eq!(engine.chunk_size, 10);
        assert_eq!(engine.retry.max_attempts, 3);
        assert_eq!(engine.retry.base_delay, Duration::from_secs(1));
        assert_eq!(engine.retry.max_delay, Duration::from_secs(10));
        assert_eq!(engine.retry.jitter_max, Duration::from_secs(1));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = CliConfig::from_toml(
            r#"
            [authority]
            base_url = "https://authority.example.com/api"
            api_token = "secret"

            [engine]
            chunk_size = 5
            "#,
        )
        .unwrap();

        assert_eq!(
            config.authority.base_url.as_deref(),
            Some("https://authority.example.com/api")
        );
        assert_eq!(config.authority.max_calls_per_window, 40);
        assert_eq!(config.engine.chunk_size, 5);
        assert_eq!(config.engine.max_attempts, 3);
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = CliConfig::from_toml("[authority\nbase_url = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
