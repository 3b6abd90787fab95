//! Service Configuration Module
//!
//! Provides configuration loading and management for the game sync service.
//! Supports loading from TOML files with environment-specific overrides.

use crate::adapter::AdapterConfig;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main service configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSyncConfig {
    pub logging: LoggingConfig,
    pub broker: BrokerConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub validation: ValidationConfig,
    pub registry: RegistryConfig,
    pub live: LiveConfig,
    /// Adapters registered at startup
    pub adapters: Vec<AdapterConfig>,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Pub/sub broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Prefix of every channel name, `{prefix}:player:{id}:updates`
    pub channel_prefix: String,
    /// Buffered messages per channel before slow subscribers lag
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "gamesync".to_string(),
            channel_capacity: 1024,
        }
    }
}

/// Batching and ingestion settings for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Queue length that triggers an immediate flush
    pub batch_size: usize,
    /// Timer interval for periodic flushes
    pub batch_interval_ms: u64,
    /// Updates beyond this queue depth are rejected
    pub max_queue_size: usize,
    /// Lifetime of player payloads written during flush
    pub cache_ttl_secs: u64,
    /// Poll cadence for sources without real-time updates
    pub poll_interval_secs: u64,
    /// Per-subscriber channel buffer
    pub subscriber_buffer: usize,
    /// First wait before resubscribing a push source whose stream ended
    pub resubscribe_base_backoff_ms: u64,
    /// Cap on the doubling resubscribe wait
    pub resubscribe_max_backoff_ms: u64,
    /// After this many failed attempts the source waits for a registry event
    pub max_resubscribe_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_interval_ms: 1000,
            max_queue_size: 10_000,
            cache_ttl_secs: 300,
            poll_interval_secs: 60,
            subscriber_buffer: 256,
            resubscribe_base_backoff_ms: 1000,
            resubscribe_max_backoff_ms: 30_000,
            max_resubscribe_attempts: 10,
        }
    }
}

impl SyncConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Wait before resubscribe attempt `attempt` (0-based), doubling up to the cap
    pub fn resubscribe_backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.min(16));
        let delay = self.resubscribe_base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.resubscribe_max_backoff_ms))
    }
}

/// A named rule mapping trigger events to a key pattern to purge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationStrategyConfig {
    pub name: String,
    pub triggers: Vec<String>,
    /// Glob with `{field}` placeholders, `{prefix}` is always available
    pub pattern: String,
}

impl InvalidationStrategyConfig {
    pub fn new(name: &str, triggers: &[&str], pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            pattern: pattern.to_string(),
        }
    }
}

/// Cache layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub key_prefix: String,
    pub default_ttl_secs: u64,
    pub compression_enabled: bool,
    /// Serialized payloads larger than this are compressed
    pub compression_threshold_bytes: usize,
    /// Samples kept for the rolling response time average
    pub response_time_window: usize,
    pub strategies: Vec<InvalidationStrategyConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "gamesync".to_string(),
            default_ttl_secs: 300,
            compression_enabled: true,
            compression_threshold_bytes: 1024,
            response_time_window: 100,
            strategies: default_strategies(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

fn default_strategies() -> Vec<InvalidationStrategyConfig> {
    vec![
        InvalidationStrategyConfig::new(
            "player_assets",
            &["ASSET_CHANGE", "ASSET_TRANSFER", "FULL_SYNC"],
            "{prefix}:player_assets:{gameId}:{playerId}*",
        ),
        InvalidationStrategyConfig::new(
            "player_achievements",
            &["ACHIEVEMENT_EARNED", "FULL_SYNC"],
            "{prefix}:player_achievements:{gameId}:{playerId}*",
        ),
        InvalidationStrategyConfig::new(
            "player_stats",
            &["STATS_UPDATE", "FULL_SYNC"],
            "{prefix}:player_stats:{gameId}:{playerId}*",
        ),
        InvalidationStrategyConfig::new(
            "leaderboards",
            &["STATS_UPDATE", "ACHIEVEMENT_EARNED"],
            "{prefix}:leaderboard:{gameId}*",
        ),
        InvalidationStrategyConfig::new(
            "game_config",
            &["GAME_CONFIG_CHANGE"],
            "{prefix}:*:{gameId}*",
        ),
    ]
}

/// Required field names per entity, matched against the camelCase wire names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredFields {
    pub game_data: Vec<String>,
    pub asset: Vec<String>,
    pub achievement: Vec<String>,
}

impl Default for RequiredFields {
    fn default() -> Self {
        let owned = |fields: &[&str]| fields.iter().map(|f| f.to_string()).collect();
        Self {
            game_data: owned(&["playerId", "gameId", "lastUpdated"]),
            asset: owned(&["id", "gameId", "tokenId", "contractAddress", "owner"]),
            achievement: owned(&["id", "gameId", "playerId", "achievementType", "title", "earnedAt"]),
        }
    }
}

/// Validation stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum score for a record to be accepted
    pub min_valid_score: u32,
    /// Records older than this produce a freshness warning
    pub max_data_age_secs: u64,
    /// Tolerated clock skew for `lastUpdated` in the future
    pub future_skew_secs: u64,
    pub required_fields: RequiredFields,
    /// Check asset contracts against `known_contracts`
    pub enable_contract_validation: bool,
    /// Lowercased contract addresses per game id
    pub known_contracts: HashMap<String, Vec<String>>,
    /// Ask the owning adapter to confirm each asset
    pub enable_ownership_validation: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_valid_score: 70,
            max_data_age_secs: 3600,
            future_skew_secs: 300,
            required_fields: RequiredFields::default(),
            enable_contract_validation: false,
            known_contracts: HashMap::new(),
            enable_ownership_validation: false,
        }
    }
}

impl ValidationConfig {
    pub fn max_data_age(&self) -> Duration {
        Duration::from_secs(self.max_data_age_secs)
    }
}

/// Adapter registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub health_check_interval_secs: u64,
    pub health_check_timeout_ms: u64,
    /// Buffered registry events per listener
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            health_check_timeout_ms: 5000,
            event_capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

/// Live-connection (WebSocket) server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    /// Largest inbound or outbound message
    pub max_payload_bytes: usize,
    pub max_connections: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8090,
            heartbeat_interval_secs: 30,
            max_payload_bytes: 1024 * 1024,
            max_connections: 1000,
        }
    }
}

impl LiveConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl GameSyncConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/game_sync.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(base_path.is_some()));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (GAMESYNC_SYNC__BATCH_SIZE=100)
        builder = builder.add_source(
            Environment::with_prefix("GAMESYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut loaded: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        loaded.expand_env_vars()?;
        loaded
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        Ok(loaded)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse TOML configuration")?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }

    /// Expand environment variables in adapter endpoints and credentials
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for adapter in &mut self.adapters {
            adapter
                .expand_env_vars()
                .with_context(|| format!("Failed to expand adapter {}", adapter.game_id))?;
        }
        Ok(())
    }

    /// Validate cross-section bounds
    pub fn validate(&self) -> Result<(), String> {
        if self.sync.batch_size == 0 {
            return Err("sync.batch_size must be greater than 0".to_string());
        }
        if self.sync.batch_interval_ms == 0 {
            return Err("sync.batch_interval_ms must be greater than 0".to_string());
        }
        if self.sync.max_queue_size < self.sync.batch_size {
            return Err("sync.max_queue_size must be at least sync.batch_size".to_string());
        }
        if self.sync.subscriber_buffer == 0 {
            return Err("sync.subscriber_buffer must be greater than 0".to_string());
        }
        if self.broker.channel_prefix.is_empty() {
            return Err("broker.channel_prefix cannot be empty".to_string());
        }
        if self.broker.channel_capacity == 0 {
            return Err("broker.channel_capacity must be greater than 0".to_string());
        }
        if self.cache.response_time_window == 0 {
            return Err("cache.response_time_window must be greater than 0".to_string());
        }
        if self.validation.min_valid_score > 100 {
            return Err("validation.min_valid_score must be at most 100".to_string());
        }
        if self.registry.health_check_interval_secs == 0 {
            return Err("registry.health_check_interval_secs must be greater than 0".to_string());
        }
        if self.live.max_payload_bytes == 0 {
            return Err("live.max_payload_bytes must be greater than 0".to_string());
        }
        if self.live.heartbeat_interval_secs == 0 {
            return Err("live.heartbeat_interval_secs must be greater than 0".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for adapter in &self.adapters {
            if !seen.insert(adapter.game_id.as_str()) {
                return Err(format!("duplicate adapter game_id: {}", adapter.game_id));
            }
            adapter
                .validate()
                .map_err(|e| format!("adapter {}: {}", adapter.game_id, e))?;
        }

        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>, environment: Option<&str>) -> Result<GameSyncConfig> {
    GameSyncConfig::load(path, environment)
}
