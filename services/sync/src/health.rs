//! Health and metrics reports served by the sync service

use crate::engine::{SourceState, SyncEngine};
use crate::metrics::SyncMetricsSnapshot;
use adapter_service::{AdapterInfo, HealthSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use sync_cache::CacheMetricsSnapshot;
use sync_types::HealthStatus;

/// Queue fill ratio above which the service reports itself degraded
const QUEUE_PRESSURE: f64 = 0.8;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub engine_running: bool,
    pub uptime_secs: u64,
    pub adapters: HealthSummary,
    pub adapter_details: Vec<AdapterInfo>,
    pub sources: BTreeMap<String, SourceState>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub live_connections: usize,
    pub cache_hit_rate: f64,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub async fn collect(engine: &SyncEngine, started_at: DateTime<Utc>) -> Self {
        let registry = engine.registry();
        let adapters = registry.get_health_summary().await;
        let queue_depth = engine.queue_depth();
        let queue_capacity = engine.max_queue_size();
        let now = Utc::now();

        Self {
            status: overall_status(engine.is_running(), &adapters, queue_depth, queue_capacity),
            engine_running: engine.is_running(),
            uptime_secs: (now - started_at).num_seconds().max(0) as u64,
            adapter_details: registry.adapter_infos().await,
            adapters,
            sources: engine.source_states(),
            queue_depth,
            queue_capacity,
            live_connections: engine.hub().client_count().await,
            cache_hit_rate: engine.cache().metrics().hit_rate,
            checked_at: now,
        }
    }
}

/// UNHEALTHY when the engine is down or no registered adapter is usable,
/// DEGRADED when any adapter is impaired or the queue is close to full.
pub fn overall_status(
    running: bool,
    adapters: &HealthSummary,
    queue_depth: usize,
    queue_capacity: usize,
) -> HealthStatus {
    if !running {
        return HealthStatus::Unhealthy;
    }
    if adapters.total > 0 && adapters.unhealthy == adapters.total {
        return HealthStatus::Unhealthy;
    }

    let pressured = queue_capacity > 0 && queue_depth as f64 / queue_capacity as f64 >= QUEUE_PRESSURE;
    if adapters.unhealthy > 0 || adapters.degraded > 0 || pressured {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

/// Everything `/metrics` reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub sync: SyncMetricsSnapshot,
    pub cache: CacheMetricsSnapshot,
    pub queue_depth: usize,
    pub active_subscriptions: usize,
    pub live_connections: usize,
    pub sources_running: usize,
    pub adapters: HealthSummary,
    pub collected_at: DateTime<Utc>,
}

impl ServiceMetrics {
    pub async fn collect(engine: &SyncEngine) -> Self {
        Self {
            sync: engine.metrics(),
            cache: engine.cache().metrics(),
            queue_depth: engine.queue_depth(),
            active_subscriptions: engine.subscriptions().len(),
            live_connections: engine.hub().client_count().await,
            sources_running: engine
                .source_states()
                .values()
                .filter(|state| **state == SourceState::Running)
                .count(),
            adapters: engine.registry().get_health_summary().await,
            collected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total: usize, degraded: usize, unhealthy: usize) -> HealthSummary {
        HealthSummary {
            total,
            active: total,
            healthy: total - degraded - unhealthy,
            degraded,
            unhealthy,
        }
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(overall_status(false, &summary(1, 0, 0), 0, 10), HealthStatus::Unhealthy);
        assert_eq!(overall_status(true, &summary(0, 0, 0), 0, 10), HealthStatus::Healthy);
        assert_eq!(overall_status(true, &summary(2, 0, 0), 0, 10), HealthStatus::Healthy);
        assert_eq!(overall_status(true, &summary(2, 1, 0), 0, 10), HealthStatus::Degraded);
        assert_eq!(overall_status(true, &summary(2, 0, 1), 0, 10), HealthStatus::Degraded);
        assert_eq!(overall_status(true, &summary(2, 0, 2), 0, 10), HealthStatus::Unhealthy);
        assert_eq!(overall_status(true, &summary(2, 0, 0), 8, 10), HealthStatus::Degraded);
    }
}
