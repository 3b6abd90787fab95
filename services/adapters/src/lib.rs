//! # Game Source Adapters
//!
//! ## Purpose
//!
//! Plugin layer between independently operated game backends and the sync
//! engine. Each backend is wrapped in a [`SourceAdapter`] that fetches raw
//! player data and normalizes it into [`sync_types::StandardizedGameData`].
//! Adapters are registered in an [`AdapterRegistry`], which validates their
//! configuration, checks their health and hands out [`ResilientAdapter`]
//! wrappers that apply retry and circuit-breaker policy to every call.
//!
//! ## Integration Points
//!
//! - **Upstream**: whatever transport an adapter chooses; [`RestGameAdapter`]
//!   speaks HTTP with an optional WebSocket push stream
//! - **Downstream**: the sync service, which only ever calls adapters through
//!   the registry
//! - **Signals**: [`RegistryEvent`]s on a broadcast channel for activation and
//!   health changes
//!
//! ## Adapters ARE / are NOT
//!
//! Adapters fetch, normalize, push and confirm assets. They never write to the
//! cache or the broker; that belongs to the sync engine.
//!
//! ## Error Handling
//!
//! Every error leaving [`ResilientAdapter`] is an [`AdapterError::Upstream`]
//! carrying the game id, an [`ErrorKind`] and the original cause. Network
//! errors are retried with exponential backoff, unrecognised upstream errors
//! once, and auth, data-integrity and business-logic errors never.
//!
//! ## Example
//!
//! ```rust,no_run
//! use adapter_service::{build_adapter, AdapterRegistry};
//! use std::sync::Arc;
//! use sync_config::{AdapterConfig, RegistryConfig};
//!
//! # async fn run() -> adapter_service::Result<()> {
//! let registry = Arc::new(AdapterRegistry::new(RegistryConfig::default()));
//! let config = AdapterConfig::new("game-a", "Game A", "https://api.game-a.example");
//!
//! registry.register_adapter(build_adapter(&config)?, config).await?;
//! registry.start_health_checks();
//!
//! if let Some(adapter) = registry.get_adapter("game-a").await {
//!     let data = adapter.fetch_player_data("player-1").await?;
//!     println!("{} assets", data.assets.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod circuit_breaker;
pub mod error;
pub mod registry;
pub mod resilient;
pub mod retry;
pub mod source;
pub mod sources;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitState,
};
pub use error::{classify_message, AdapterError, ErrorKind, Result};
pub use registry::{AdapterInfo, AdapterRegistration, AdapterRegistry, HealthSummary, RegistryEvent};
pub use resilient::ResilientAdapter;
pub use retry::RetryPolicy;
pub use source::{AdapterFeature, FeatureSet, SourceAdapter};
pub use sources::{build_adapter, RestGameAdapter};
