//! Executor configuration.
//!
//! Two layers:
//!
//! - [`ExecutorConfig`]: the runtime configuration handed to
//!   [`ExecutorBuilder`](crate::ExecutorBuilder), one sub-config per
//!   collaborator, `Duration`-typed.
//! - [`Config`]: the file representation, deserialised from TOML with
//!   integer `_ms` / `_secs` fields and converted via
//!   [`Config::into_executor_config`]. Every field is optional and falls
//!   back to the documented default.
//!
//! ```toml
//! [circuit_breaker]
//! failure_threshold = 5
//! recovery_timeout_secs = 60
//! success_threshold = 3
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! jitter_span_ms = 1000
//!
//! [rate_limit]
//! max_requests_per_window = 100
//! window_duration_secs = 60
//!
//! [cache]
//! max_size = 100
//! default_ttl_secs = 300
//! ```

use std::time::Duration;

use serde::Deserialize;

#[cfg(feature = "config-file")]
use std::{fs, path::Path};

use crate::cache::CacheConfig;
use crate::guard::{CircuitBreakerConfig, RateLimitConfig};
use crate::retry::RetryConfig;
use crate::{HeimdallError, Result};

/// Runtime configuration for an [`Executor`](crate::Executor).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
}

impl ExecutorConfig {
    /// Reject configurations the collaborators cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker
            .validate()
            .and_then(|()| self.retry.validate())
            .and_then(|()| self.rate_limit.validate())
            .and_then(|()| self.cache.validate())
            .map_err(HeimdallError::Configuration)
    }
}

/// File configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub cache: CacheSection,
}

/// `[circuit_breaker]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerSection {
    /// Failures that trip the circuit (default: 5).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before probing (default: 60).
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Half-open successes needed to close (default: 3).
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    3
}

/// `[retry]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default: 1000).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Cap on any single delay in milliseconds (default: 30000).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Jitter span in milliseconds (default: 1000).
    #[serde(default = "default_jitter_span")]
    pub jitter_span_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_span_ms: default_jitter_span(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter_span() -> u64 {
    1000
}

/// `[rate_limit]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    /// Calls admitted per key per window (default: 100).
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: usize,
    /// Window length in seconds (default: 60).
    #[serde(default = "default_window")]
    pub window_duration_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests_per_window: default_max_requests(),
            window_duration_secs: default_window(),
        }
    }
}

fn default_max_requests() -> usize {
    100
}

fn default_window() -> u64 {
    60
}

/// `[cache]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Maximum stored responses (default: 100).
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    /// TTL in seconds when a call sets none (default: 300).
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            default_ttl_secs: default_ttl(),
        }
    }
}

fn default_cache_max_size() -> usize {
    100
}

fn default_ttl() -> u64 {
    300
}

impl Config {
    /// Convert into a validated runtime configuration.
    pub fn into_executor_config(self) -> Result<ExecutorConfig> {
        let config = ExecutorConfig {
            circuit_breaker: CircuitBreakerConfig::new()
                .failure_threshold(self.circuit_breaker.failure_threshold)
                .recovery_timeout(Duration::from_secs(self.circuit_breaker.recovery_timeout_secs))
                .success_threshold(self.circuit_breaker.success_threshold),
            retry: RetryConfig::new()
                .max_retries(self.retry.max_retries)
                .base_delay(Duration::from_millis(self.retry.base_delay_ms))
                .max_delay(Duration::from_millis(self.retry.max_delay_ms))
                .jitter_span(Duration::from_millis(self.retry.jitter_span_ms)),
            rate_limit: RateLimitConfig::new()
                .max_requests(self.rate_limit.max_requests_per_window)
                .window(Duration::from_secs(self.rate_limit.window_duration_secs)),
            cache: CacheConfig::new()
                .max_size(self.cache.max_size)
                .default_ttl(Duration::from_secs(self.cache.default_ttl_secs)),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "config-file")]
impl Config {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HeimdallError::Configuration(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }
}
