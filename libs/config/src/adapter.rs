//! Per-adapter configuration
//!
//! Every source adapter is registered together with an [`AdapterConfig`]. The
//! registry rejects a registration whose config fails [`AdapterConfig::validate`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy bounds for calls into one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt, 0..=10
    pub max_retries: u32,
    /// Delay before the first retry, 100ms..=10s
    pub base_delay_ms: u64,
    /// Backoff multiplier, 1.0..=5.0
    pub multiplier: f64,
    /// Upper bound on any single delay, at least `base_delay_ms`
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validate retry bounds
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err(format!("max_retries must be at most 10, got {}", self.max_retries));
        }
        if !(100..=10_000).contains(&self.base_delay_ms) {
            return Err(format!(
                "base_delay_ms must be between 100 and 10000, got {}",
                self.base_delay_ms
            ));
        }
        if !(1.0..=5.0).contains(&self.multiplier) {
            return Err(format!(
                "multiplier must be between 1 and 5, got {}",
                self.multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be greater than or equal to base_delay_ms".to_string());
        }
        Ok(())
    }
}

/// Circuit breaker thresholds for one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time an open circuit waits before allowing a trial call
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Cache behaviour for data fetched through one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterCacheConfig {
    pub enabled: bool,
    /// Entry lifetime, 60s..=24h
    pub ttl_secs: u64,
}

impl Default for AdapterCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
        }
    }
}

impl AdapterCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Configuration an adapter is registered with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Registry key, unique across adapters
    pub game_id: String,
    /// Human readable game name
    pub name: String,
    /// Upstream HTTP endpoint
    pub api_endpoint: String,
    /// Upstream push endpoint, enables real-time updates when set
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    /// Credential sent upstream, may reference `${ENV_VAR}`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Adapter implementation to construct
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Whether the adapter participates in ingestion right after registration
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-request timeout for upstream calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub cache: AdapterCacheConfig,
}

fn default_kind() -> String {
    "rest".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl AdapterConfig {
    /// Minimal config with defaults for everything but identity and endpoint
    pub fn new(
        game_id: impl Into<String>,
        name: impl Into<String>,
        api_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            name: name.into(),
            api_endpoint: api_endpoint.into(),
            ws_endpoint: None,
            api_key: None,
            kind: default_kind(),
            enabled: true,
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: AdapterCacheConfig::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.game_id.trim().is_empty() {
            return Err("game_id is required".to_string());
        }

        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }

        if self.api_endpoint.trim().is_empty() {
            return Err("api_endpoint is required".to_string());
        }

        if !self.api_endpoint.starts_with("http://") && !self.api_endpoint.starts_with("https://")
        {
            return Err("api_endpoint must start with http:// or https://".to_string());
        }

        if let Some(ws) = &self.ws_endpoint {
            if !ws.starts_with("ws://") && !ws.starts_with("wss://") {
                return Err("ws_endpoint must start with ws:// or wss://".to_string());
            }
        }

        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }

        self.retry.validate()?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit breaker failure_threshold must be greater than 0".to_string());
        }

        if self.circuit_breaker.reset_timeout_ms == 0 {
            return Err("circuit breaker reset_timeout_ms must be greater than 0".to_string());
        }

        if self.cache.enabled && !(60..=86_400).contains(&self.cache.ttl_secs) {
            return Err(format!(
                "cache ttl_secs must be between 60 and 86400, got {}",
                self.cache.ttl_secs
            ));
        }

        Ok(())
    }

    /// Expand `${VAR}` references in endpoint and credential fields
    pub fn expand_env_vars(&mut self) -> anyhow::Result<()> {
        use anyhow::Context;

        self.api_endpoint = shellexpand::env(&self.api_endpoint)
            .context("Failed to expand api_endpoint")?
            .to_string();

        if let Some(ws) = &self.ws_endpoint {
            let expanded = shellexpand::env(ws).context("Failed to expand ws_endpoint")?;
            self.ws_endpoint = Some(expanded.to_string());
        }

        if let Some(key) = &self.api_key {
            let expanded = shellexpand::env(key).context("Failed to expand api_key")?;
            self.api_key = Some(expanded.to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AdapterConfig {
        AdapterConfig::new("game-a", "Game A", "https://api.game-a.io")
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_required_fields() {
        let mut config = valid();
        config.game_id = "  ".to_string();
        assert!(config.validate().unwrap_err().contains("game_id"));

        let mut config = valid();
        config.api_endpoint = "ftp://nope".to_string();
        assert!(config.validate().unwrap_err().contains("api_endpoint"));
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = valid();
        config.retry.max_retries = 11;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.base_delay_ms = 50;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.multiplier = 5.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.base_delay_ms = 2000;
        config.retry.max_delay_ms = 1000;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.max_retries = 0;
        config.retry.multiplier = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_ttl_bounds_only_apply_when_enabled() {
        let mut config = valid();
        config.cache.ttl_secs = 10;
        assert!(config.validate().is_err());

        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("GAMESYNC_TEST_API_KEY", "secret");
        let mut config = valid();
        config.api_key = Some("${GAMESYNC_TEST_API_KEY}".to_string());
        config.expand_env_vars().unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
    }
}
