//! Retry and circuit-breaker wrapper around a [`SourceAdapter`]

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry};
use crate::retry::RetryPolicy;
use crate::source::{AdapterFeature, FeatureSet, SourceAdapter};
use crate::{AdapterError, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sync_config::AdapterConfig;
use sync_types::{GameAsset, StandardizedGameData};
use tokio::sync::mpsc;

/// Every adapter call the engine makes goes through this wrapper
///
/// Each kind of downstream call (`fetch`, `validate_asset`, `subscribe`, ...)
/// gets its own breaker named `{game_id}:{call}`, so a broken push stream does
/// not stop plain fetches.
pub struct ResilientAdapter {
    inner: Arc<dyn SourceAdapter>,
    policy: RetryPolicy,
    breakers: CircuitBreakerRegistry,
    attempt_timeout: Duration,
}

impl ResilientAdapter {
    pub fn new(inner: Arc<dyn SourceAdapter>, config: &AdapterConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::from(&config.retry),
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::from(
                &config.circuit_breaker,
            )),
            attempt_timeout: config.request_timeout(),
        }
    }

    pub fn game_id(&self) -> &str {
        self.inner.game_id()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn features(&self) -> &FeatureSet {
        self.inner.features()
    }

    pub fn supports(&self, feature: AdapterFeature) -> bool {
        self.inner.features().contains(feature)
    }

    /// The wrapped adapter, bypassing retries and breakers
    pub fn inner(&self) -> &Arc<dyn SourceAdapter> {
        &self.inner
    }

    async fn guarded<T, F, Fut>(&self, call: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breakers.get_or_create(&format!("{}:{}", self.game_id(), call));
        let timeout = self.attempt_timeout;

        self.policy
            .execute(self.game_id(), &breaker, || {
                let attempt = operation();
                async move {
                    tokio::time::timeout(timeout, attempt)
                        .await
                        .unwrap_or(Err(AdapterError::Timeout {
                            timeout_ms: timeout.as_millis() as u64,
                        }))
                }
            })
            .await
    }

    fn classified(&self, error: AdapterError) -> AdapterError {
        match error {
            AdapterError::Upstream { .. } => error,
            other => AdapterError::Upstream {
                game_id: self.game_id().to_string(),
                kind: other.kind(),
                attempts: 1,
                cause: Box::new(other),
            },
        }
    }

    pub async fn fetch_raw_player_data(&self, player_id: &str) -> Result<Value> {
        self.guarded("fetch", || self.inner.fetch_raw_player_data(player_id))
            .await
    }

    /// Fetch and normalize a player record
    pub async fn fetch_player_data(&self, player_id: &str) -> Result<StandardizedGameData> {
        let raw = self.fetch_raw_player_data(player_id).await?;
        self.inner.normalize(&raw).map_err(|e| self.classified(e))
    }

    pub async fn validate_asset(&self, asset: &GameAsset) -> Result<bool> {
        if !self.supports(AdapterFeature::AssetValidation) {
            return Err(self.classified(AdapterError::NotSupported(format!(
                "{} does not validate assets",
                self.game_id()
            ))));
        }
        self.guarded("validate_asset", || self.inner.validate_asset(asset))
            .await
    }

    pub async fn subscribe_to_updates(&self, sink: mpsc::Sender<StandardizedGameData>) -> Result<()> {
        if !self.supports(AdapterFeature::RealTimeUpdates) {
            return Err(self.classified(AdapterError::NotSupported(format!(
                "{} does not push updates",
                self.game_id()
            ))));
        }
        self.guarded("subscribe", || self.inner.subscribe_to_updates(sink.clone()))
            .await
    }

    pub async fn unsubscribe_from_updates(&self) -> Result<()> {
        self.inner
            .unsubscribe_from_updates()
            .await
            .map_err(|e| self.classified(e))
    }

    pub async fn watch_player(&self, player_id: &str) -> Result<()> {
        self.guarded("watch", || self.inner.watch_player(player_id))
            .await
    }

    pub async fn unwatch_player(&self, player_id: &str) -> Result<()> {
        self.inner
            .unwatch_player(player_id)
            .await
            .map_err(|e| self.classified(e))
    }

    /// Raw health check, not counted against any breaker
    pub async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }

    pub async fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        self.breakers.metrics().await
    }

    pub async fn all_breakers_closed(&self) -> bool {
        self.breakers.all_closed().await
    }
}
