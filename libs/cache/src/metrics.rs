//! Cache hit/miss and latency accounting

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters updated by every cache operation
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    response_times: Mutex<VecDeque<f64>>,
    window: usize,
}

/// Point-in-time view of [`CacheMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Hits over lookups, 0.0 before the first lookup
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub evictions: u64,
    /// Mean over the most recent response time samples
    pub avg_response_time_ms: f64,
}

impl CacheMetrics {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: usize) {
        self.deletes.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let mut samples = self.response_times.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        let avg_response_time_ms = {
            let samples = self.response_times.lock();
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        };

        CacheMetricsSnapshot {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            avg_response_time_ms,
        }
    }
}
