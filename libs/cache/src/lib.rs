//! # Sync Cache
//!
//! TTL cache for normalized game data. Values are wrapped in a
//! [`CacheEntry`] envelope, optionally LZ4 compressed, and written to any
//! [`CacheStore`]. Named [`InvalidationStrategy`] rules purge key patterns when
//! an update trigger such as `ASSET_CHANGE` fires.
//!
//! ```ignore
//! let cache = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
//! let key = cache.keys().player_data("game-a", "p1");
//! cache.set(&key, &data, None).await?;
//! ```

pub mod entry;
pub mod error;
pub mod keys;
pub mod layer;
pub mod metrics;
pub mod store;
pub mod strategy;

pub use entry::{CacheEntry, Payload};
pub use error::{CacheError, Result};
pub use keys::{escape_segment, CacheEntryType, CacheKey, CacheKeyBuilder};
pub use layer::{CacheLayer, WarmUpReport};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use store::{CacheStore, InMemoryStore, KeyTtl};
pub use strategy::InvalidationStrategy;
