//! Cache layer over a [`CacheStore`]
//!
//! Only `set` reports failures to the caller. Reads, deletes and invalidations
//! log the store error, bump the error counter and fall back to a neutral
//! result, so a broken store degrades to cache misses instead of failed syncs.

use crate::entry::CacheEntry;
use crate::error::Result;
use crate::keys::CacheKeyBuilder;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::store::CacheStore;
use crate::strategy::InvalidationStrategy;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_config::CacheConfig;
use tracing::{debug, info, warn};

/// Outcome of [`CacheLayer::warm_up`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmUpReport {
    pub loaded: usize,
    /// Loader returned nothing for these players
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// Read statistics of a key since its last write
#[derive(Debug, Clone, Copy)]
struct AccessStats {
    last_accessed: DateTime<Utc>,
    count: u64,
}

pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    keys: CacheKeyBuilder,
    strategies: Vec<InvalidationStrategy>,
    metrics: CacheMetrics,
    // Kept beside the store so a hit never writes the payload back
    access: DashMap<String, AccessStats>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        let strategies = config.strategies.iter().map(InvalidationStrategy::from).collect();
        Self {
            store,
            keys: CacheKeyBuilder::new(config.key_prefix.clone()),
            metrics: CacheMetrics::new(config.response_time_window),
            strategies,
            config,
            access: DashMap::new(),
        }
    }

    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    pub fn strategies(&self) -> &[InvalidationStrategy] {
        &self.strategies
    }

    fn compress_above(&self) -> Option<usize> {
        self.config
            .compression_enabled
            .then_some(self.config.compression_threshold_bytes)
    }

    /// Read and decode a value
    ///
    /// A hit resets the key's TTL to the lifetime it was written with, so
    /// frequently read keys stay alive. Only the expiry is refreshed; a write
    /// or invalidation racing the read is never undone.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();
        let result = self.read_entry(key).await;
        self.metrics.record_response_time(started.elapsed());

        match result {
            Ok(Some(value)) => {
                self.metrics.record_hit();
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                warn!("Cache get failed for {}: {}", key, e);
                self.metrics.record_error();
                self.metrics.record_miss();
                None
            }
        }
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.store.get(key).await? else {
            self.access.remove(key);
            return Ok(None);
        };

        let entry = CacheEntry::from_bytes(&bytes)?;
        let value = serde_json::from_value(entry.value()?)?;

        let live = match entry.ttl() {
            Some(ttl) => self.store.expire(key, ttl).await?,
            None => true,
        };
        if live {
            self.record_access(key);
        }

        Ok(Some(value))
    }

    fn record_access(&self, key: &str) {
        let now = Utc::now();
        self.access
            .entry(key.to_string())
            .and_modify(|stats| {
                stats.last_accessed = now;
                stats.count += 1;
            })
            .or_insert(AccessStats {
                last_accessed: now,
                count: 1,
            });
    }

    fn forget_access(&self, keys: &[String]) {
        for key in keys {
            self.access.remove(key);
        }
    }

    /// Stored envelope of a key with its current access statistics
    ///
    /// Does not count as a hit and does not refresh the TTL.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!("Cache entry lookup failed for {}: {}", key, e);
                self.metrics.record_error();
                return None;
            }
        };

        let mut entry = match CacheEntry::from_bytes(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache entry for {} is unreadable: {}", key, e);
                self.metrics.record_error();
                return None;
            }
        };
        if let Some(stats) = self.access.get(key) {
            entry.last_accessed = stats.last_accessed;
            entry.access_count = stats.count;
        }
        Some(entry)
    }

    /// Write a value, `None` uses the configured default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());

        let result: Result<()> = async {
            let entry = CacheEntry::encode(
                key,
                serde_json::to_value(value)?,
                Some(ttl),
                self.compress_above(),
            )?;
            self.store.set(key, entry.to_bytes()?, Some(ttl)).await
        }
        .await;

        self.metrics.record_response_time(started.elapsed());
        match result {
            Ok(()) => {
                self.access.remove(key);
                self.metrics.record_set();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    /// Remove one key, returning whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        let keys = [key.to_string()];
        match self.store.delete(&keys).await {
            Ok(removed) => {
                self.forget_access(&keys);
                self.metrics.record_deletes(removed);
                removed > 0
            }
            Err(e) => {
                warn!("Cache delete failed for {}: {}", key, e);
                self.metrics.record_error();
                false
            }
        }
    }

    /// Remove every key matching a glob pattern
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let result: Result<usize> = async {
            let keys = self.store.keys(pattern).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            let removed = self.store.delete(&keys).await?;
            self.forget_access(&keys);
            Ok(removed)
        }
        .await;

        match result {
            Ok(removed) => {
                self.metrics.record_deletes(removed);
                if removed > 0 {
                    debug!("Invalidated {} keys matching {}", removed, pattern);
                }
                removed
            }
            Err(e) => {
                warn!("Cache invalidation failed for {}: {}", pattern, e);
                self.metrics.record_error();
                0
            }
        }
    }

    /// Run every strategy listening for `trigger`
    ///
    /// Context keys are the placeholder names used in strategy patterns,
    /// typically `gameId` and `playerId`.
    pub async fn invalidate_by_trigger(
        &self,
        trigger: &str,
        context: &HashMap<String, String>,
    ) -> usize {
        let mut removed = 0;
        for strategy in self.strategies.iter().filter(|s| s.matches(trigger)) {
            let pattern = strategy.resolve(self.keys.prefix(), context);
            let count = self.invalidate_pattern(&pattern).await;
            debug!(
                "Strategy {} removed {} keys for trigger {}",
                strategy.name, count, trigger
            );
            removed += count;
        }
        removed
    }

    /// Pre-load player records for a game
    ///
    /// Every player is loaded concurrently. A loader or write failure for one
    /// player is recorded in the report and never aborts the others.
    pub async fn warm_up<T, E, F, Fut>(
        &self,
        game_id: &str,
        player_ids: &[String],
        loader: F,
    ) -> WarmUpReport
    where
        T: Serialize,
        E: Display,
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let loads = player_ids.iter().map(|player_id| {
            let load = loader(player_id.clone());
            async move {
                let outcome = match load.await {
                    Ok(Some(value)) => {
                        let key = self.keys.player_data(game_id, player_id);
                        self.set(&key, &value, None)
                            .await
                            .map(|_| true)
                            .map_err(|e| e.to_string())
                    }
                    Ok(None) => Ok(false),
                    Err(e) => Err(e.to_string()),
                };
                (player_id, outcome)
            }
        });

        let mut report = WarmUpReport::default();
        for (player_id, outcome) in join_all(loads).await {
            match outcome {
                Ok(true) => report.loaded += 1,
                Ok(false) => report.skipped += 1,
                Err(reason) => {
                    warn!("Cache warm-up failed for {}/{}: {}", game_id, player_id, reason);
                    report.failed.push(player_id.clone());
                }
            }
        }

        info!(
            "Cache warm-up for {}: {} loaded, {} skipped, {} failed",
            game_id,
            report.loaded,
            report.skipped,
            report.failed.len()
        );
        report
    }

    /// Remove keys under the prefix that have no remaining lifetime
    pub async fn cleanup(&self) -> usize {
        let pattern = format!("{}:*", glob::Pattern::escape(self.keys.prefix()));
        let keys = match self.store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache cleanup listing failed: {}", e);
                self.metrics.record_error();
                return 0;
            }
        };

        let mut sweep = Vec::new();
        for key in keys {
            match self.store.ttl(&key).await {
                Ok(ttl) if ttl.is_sweepable() => sweep.push(key),
                Ok(_) => {}
                Err(e) => {
                    warn!("Cache TTL lookup failed for {}: {}", key, e);
                    self.metrics.record_error();
                }
            }
        }

        if sweep.is_empty() {
            return 0;
        }

        match self.store.delete(&sweep).await {
            Ok(removed) => {
                self.forget_access(&sweep);
                self.metrics.record_evictions(removed);
                info!("Cache cleanup evicted {} keys", removed);
                removed
            }
            Err(e) => {
                warn!("Cache cleanup delete failed: {}", e);
                self.metrics.record_error();
                0
            }
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}
