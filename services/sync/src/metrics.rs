//! Engine counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    updates_received: AtomicU64,
    updates_accepted: AtomicU64,
    updates_rejected: AtomicU64,
    queue_full_rejections: AtomicU64,
    updates_published: AtomicU64,
    batches_flushed: AtomicU64,
    flush_failures: AtomicU64,
    live_deliveries: AtomicU64,
    score_total: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self, score: u32) {
        self.updates_accepted.fetch_add(1, Ordering::Relaxed);
        self.score_total.fetch_add(score as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, score: u32) {
        self.updates_rejected.fetch_add(1, Ordering::Relaxed);
        self.score_total.fetch_add(score as u64, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.queue_full_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, size: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.updates_published.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_live_deliveries(&self, count: usize) {
        self.live_deliveries.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let accepted = self.updates_accepted.load(Ordering::Relaxed);
        let rejected = self.updates_rejected.load(Ordering::Relaxed);
        let validated = accepted + rejected;

        SyncMetricsSnapshot {
            updates_received: self.updates_received.load(Ordering::Relaxed),
            updates_accepted: accepted,
            updates_rejected: rejected,
            queue_full_rejections: self.queue_full_rejections.load(Ordering::Relaxed),
            updates_published: self.updates_published.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            live_deliveries: self.live_deliveries.load(Ordering::Relaxed),
            validity_rate: if validated == 0 {
                1.0
            } else {
                accepted as f64 / validated as f64
            },
            average_score: if validated == 0 {
                0.0
            } else {
                self.score_total.load(Ordering::Relaxed) as f64 / validated as f64
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub updates_received: u64,
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub queue_full_rejections: u64,
    pub updates_published: u64,
    pub batches_flushed: u64,
    pub flush_failures: u64,
    pub live_deliveries: u64,
    /// Accepted share of validated updates
    pub validity_rate: f64,
    pub average_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_rate() {
        let metrics = SyncMetrics::new();
        assert_eq!(metrics.snapshot().validity_rate, 1.0);

        metrics.record_accepted(100);
        metrics.record_accepted(90);
        metrics.record_accepted(80);
        metrics.record_rejected(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.validity_rate, 0.75);
        assert_eq!(snapshot.average_score, 67.5);
    }
}
