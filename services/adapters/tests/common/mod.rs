#![allow(dead_code)]

use adapter_service::{AdapterError, AdapterFeature, FeatureSet, Result, SourceAdapter};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use sync_config::AdapterConfig;
use sync_types::{GameAsset, StandardizedGameData};
use tokio::sync::mpsc;

/// Scriptable adapter for registry and wrapper tests
pub struct MockAdapter {
    pub game_id: String,
    pub features: FeatureSet,
    pub healthy: AtomicBool,
    pub health_delay_ms: AtomicU64,
    pub panic_on_health: AtomicBool,
    /// Fetches that fail with a network error before one succeeds
    pub failing_fetches: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub unsubscribe_calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(game_id: &str) -> Self {
        Self {
            game_id: game_id.to_string(),
            features: FeatureSet::new(&[AdapterFeature::Statistics]),
            healthy: AtomicBool::new(true),
            health_delay_ms: AtomicU64::new(0),
            panic_on_health: AtomicBool::new(false),
            failing_fetches: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            unsubscribe_calls: AtomicU32::new(0),
        }
    }

    pub fn with_features(mut self, features: &[AdapterFeature]) -> Self {
        self.features = FeatureSet::new(features);
        self
    }
}

pub fn config(game_id: &str) -> AdapterConfig {
    let mut config = AdapterConfig::new(game_id, game_id, "http://localhost:9");
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 100;
    config.request_timeout_ms = 1_000;
    config
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    fn name(&self) -> &str {
        "Mock"
    }

    fn features(&self) -> &FeatureSet {
        &self.features
    }

    async fn fetch_raw_player_data(&self, player_id: &str) -> Result<Value> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_fetches.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::Network("connection refused".into()));
        }
        Ok(json!({ "playerId": player_id, "gameId": self.game_id, "lastUpdated": "2024-01-01T00:00:00Z", "statistics": { "level": 2 } }))
    }

    fn normalize(&self, raw: &Value) -> Result<StandardizedGameData> {
        serde_json::from_value(raw.clone()).map_err(|e| AdapterError::DataIntegrity(e.to_string()))
    }

    async fn subscribe_to_updates(&self, _sink: mpsc::Sender<StandardizedGameData>) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe_from_updates(&self) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn validate_asset(&self, _asset: &GameAsset) -> Result<bool> {
        Ok(true)
    }

    async fn is_healthy(&self) -> bool {
        if self.panic_on_health.load(Ordering::SeqCst) {
            panic!("health check exploded");
        }
        let delay = self.health_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.healthy.load(Ordering::SeqCst)
    }
}
