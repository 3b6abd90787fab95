#![allow(dead_code)]

use adapter_service::{AdapterFeature, FeatureSet, Result, SourceAdapter};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_cache::InMemoryStore;
use sync_config::{AdapterConfig, GameSyncConfig};
use sync_service::broker::{Broker, BrokerSubscription};
use sync_service::{InMemoryBroker, SyncCore};
use sync_types::{
    Achievement, AssetType, GameAsset, PlayerStatistics, Rarity, StandardizedGameData,
};
use tokio::sync::mpsc;

pub const CONTRACT: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// In-process game backend
pub struct StubAdapter {
    pub game_id: String,
    pub features: FeatureSet,
    pub healthy: AtomicBool,
    pub sink: Mutex<Option<mpsc::Sender<StandardizedGameData>>>,
    pub watched: Mutex<Vec<String>>,
}

impl StubAdapter {
    pub fn polled(game_id: &str) -> Arc<Self> {
        Arc::new(Self::with_features(
            game_id,
            &[AdapterFeature::Statistics, AdapterFeature::AssetValidation],
        ))
    }

    pub fn live(game_id: &str) -> Arc<Self> {
        Arc::new(Self::with_features(
            game_id,
            &[
                AdapterFeature::RealTimeUpdates,
                AdapterFeature::Statistics,
                AdapterFeature::AssetValidation,
            ],
        ))
    }

    fn with_features(game_id: &str, features: &[AdapterFeature]) -> Self {
        Self {
            game_id: game_id.to_string(),
            features: FeatureSet::new(features),
            healthy: AtomicBool::new(true),
            sink: Mutex::new(None),
            watched: Mutex::new(Vec::new()),
        }
    }

    /// Push a record as the upstream would
    pub async fn push(&self, data: StandardizedGameData) {
        let sink = self.sink.lock().clone().expect("not subscribed");
        sink.send(data).await.expect("ingest closed");
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Close the push stream from the upstream side
    pub fn end_stream(&self) {
        self.sink.lock().take();
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    fn name(&self) -> &str {
        "Stub"
    }

    fn features(&self) -> &FeatureSet {
        &self.features
    }

    async fn fetch_raw_player_data(&self, player_id: &str) -> Result<Value> {
        Ok(json!({
            "playerId": player_id,
            "gameId": self.game_id,
            "lastUpdated": Utc::now(),
            "statistics": { "level": 3, "wins": 1, "gamesPlayed": 2 }
        }))
    }

    fn normalize(&self, raw: &Value) -> Result<StandardizedGameData> {
        serde_json::from_value(raw.clone())
            .map_err(|e| adapter_service::AdapterError::DataIntegrity(e.to_string()))
    }

    async fn subscribe_to_updates(&self, sink: mpsc::Sender<StandardizedGameData>) -> Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn unsubscribe_from_updates(&self) -> Result<()> {
        *self.sink.lock() = None;
        Ok(())
    }

    async fn watch_player(&self, player_id: &str) -> Result<()> {
        self.watched.lock().push(player_id.to_string());
        Ok(())
    }

    async fn unwatch_player(&self, player_id: &str) -> Result<()> {
        self.watched.lock().retain(|p| p != player_id);
        Ok(())
    }

    async fn validate_asset(&self, _asset: &GameAsset) -> Result<bool> {
        Ok(true)
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

pub fn adapter_config(game_id: &str) -> AdapterConfig {
    AdapterConfig::new(game_id, game_id, "http://localhost:9")
}

/// Small batches and a slow timer so tests control flushing
pub fn test_config() -> GameSyncConfig {
    let mut config = GameSyncConfig::default();
    config.sync.batch_size = 3;
    config.sync.batch_interval_ms = 60_000;
    config.sync.max_queue_size = 100;
    config.live.max_payload_bytes = 64 * 1024;
    config.sync.resubscribe_base_backoff_ms = 10;
    config.sync.resubscribe_max_backoff_ms = 50;
    config
}

pub fn core_with(config: GameSyncConfig) -> (Arc<SyncCore>, Arc<InMemoryBroker>) {
    let broker = Arc::new(InMemoryBroker::new(config.broker.channel_capacity));
    let core = Arc::new(SyncCore::new(
        config,
        broker.clone(),
        Arc::new(InMemoryStore::new()),
    ));
    (core, broker)
}

pub fn core_with_broker(config: GameSyncConfig, broker: Arc<dyn Broker>) -> Arc<SyncCore> {
    Arc::new(SyncCore::new(config, broker, Arc::new(InMemoryStore::new())))
}

/// Broker whose publishes take a while, like a remote server under load
pub struct SlowBroker {
    pub inner: InMemoryBroker,
    pub delay: Duration,
}

impl SlowBroker {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryBroker::new(64),
            delay,
        })
    }
}

#[async_trait]
impl Broker for SlowBroker {
    async fn publish(&self, channel: &str, payload: String) -> sync_service::Result<usize> {
        tokio::time::sleep(self.delay).await;
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> sync_service::Result<BrokerSubscription> {
        self.inner.subscribe(channel).await
    }

    async fn psubscribe(&self, pattern: &str) -> sync_service::Result<BrokerSubscription> {
        self.inner.psubscribe(pattern).await
    }

    async fn close(&self) -> sync_service::Result<()> {
        self.inner.close().await
    }
}

pub async fn register(core: &SyncCore, adapter: Arc<StubAdapter>) {
    let game_id = adapter.game_id.clone();
    core.registry()
        .register_adapter(adapter, adapter_config(&game_id))
        .await
        .unwrap();
}

pub fn record(player_id: &str, game_id: &str) -> StandardizedGameData {
    StandardizedGameData::new(player_id, game_id)
        .with_asset(GameAsset::new(
            format!("{}-sword", player_id),
            game_id,
            "1",
            CONTRACT,
            AssetType::Item,
            player_id,
        ))
        .with_statistics(PlayerStatistics {
            level: 5,
            games_played: 10,
            wins: 4,
            ..PlayerStatistics::default()
        })
}

pub fn achievement(player_id: &str, game_id: &str, id: &str) -> Achievement {
    Achievement::new(
        id,
        game_id,
        player_id,
        "FIRST_WIN",
        "First Blood",
        Rarity::Common,
        Utc::now() - chrono::Duration::minutes(5),
    )
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
