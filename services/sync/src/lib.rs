//! # Game Sync Service
//!
//! Accepts normalized game records from business services and from the
//! per-game source adapters, scores them, batches the accepted ones and
//! fans each flushed update out to the cache, the pub/sub broker, local
//! subscribers and live WebSocket clients.
//!
//! ## Architecture
//!
//! ```text
//! adapters (poll / push) ─┐
//!                         ├─> validation ─> batch queue ─> flush ─┬─> cache
//! business services ──────┘                                      ├─> broker
//!                                                                ├─> local subscribers
//!                                                                └─> live clients
//! ```
//!
//! [`SyncCore`] is the entry point; [`live::LiveServer`] serves the
//! WebSocket and operator endpoints on top of it.

#![warn(clippy::all)]

pub mod api;
pub mod broker;
pub mod engine;
pub mod error;
pub mod health;
pub mod live;
pub mod metrics;
pub mod validation;

pub use api::{ProcessOutcome, SyncCore};
pub use broker::{Broker, BrokerMessage, BrokerSubscription, InMemoryBroker};
pub use engine::{SourceState, SubmitOutcome, SubscriptionHandle, SyncEngine, SyncEvent};
pub use error::{Result, SyncError};
pub use health::{HealthReport, ServiceMetrics};
pub use live::LiveServer;
pub use validation::{GameDataValidator, Severity, ValidationResult};
