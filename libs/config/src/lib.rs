//! # Game Sync Configuration
//!
//! Centralized, typed configuration for every game sync component.
//!
//! ## Features
//!
//! - **Service Configuration**: broker, batching, cache, validation, registry and
//!   live-connection settings with production defaults
//! - **Adapter Configuration**: per-game retry, circuit breaker and cache bounds,
//!   validated before an adapter is admitted to the registry
//! - **Layered Loading**: base TOML file, optional environment overlay, then
//!   `GAMESYNC_` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sync_config::GameSyncConfig;
//!
//! let config = GameSyncConfig::load(None, Some("production")).unwrap();
//! println!("batch size: {}", config.sync.batch_size);
//! ```

pub mod adapter;
pub mod service_config;

// Re-export commonly used types
pub use adapter::{AdapterCacheConfig, AdapterConfig, CircuitBreakerSettings, RetryConfig};
pub use service_config::{
    load_config, BrokerConfig, CacheConfig, GameSyncConfig, InvalidationStrategyConfig,
    LiveConfig, LoggingConfig, RegistryConfig, RequiredFields, SyncConfig, ValidationConfig,
};
