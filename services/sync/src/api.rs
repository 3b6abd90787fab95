//! Entry points for business services
//!
//! [`SyncCore`] wires the registry, validator, cache, broker, live hub and
//! engine together and exposes the handful of calls other services make.
//! None of them return raw errors: failures are reported in the returned
//! value or logged.

use crate::broker::Broker;
use crate::engine::{EngineParts, SubmitOutcome, SubscriptionHandle, SyncEngine};
use crate::error::{Result, SyncError};
use crate::health::{HealthReport, ServiceMetrics};
use crate::live::ClientManager;
use crate::validation::{GameDataValidator, OwnershipSource, ValidationResult};
use adapter_service::AdapterRegistry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use sync_cache::{CacheLayer, CacheStore, WarmUpReport};
use sync_config::GameSyncConfig;
use sync_types::{StandardizedGameData, UpdateSource, UpdateType};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often expired cache keys are swept
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of [`SyncCore::process_game_data_update`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessOutcome {
    Accepted {
        #[serde(rename = "updateType")]
        update_type: UpdateType,
        score: u32,
    },
    Rejected {
        validation: ValidationResult,
    },
    /// Not processed: bad request, backpressure or engine stopped
    Failed {
        error: String,
    },
}

impl ProcessOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProcessOutcome::Accepted { .. })
    }
}

pub struct SyncCore {
    config: GameSyncConfig,
    registry: Arc<AdapterRegistry>,
    engine: Arc<SyncEngine>,
    started_at: DateTime<Utc>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCore {
    pub fn new(config: GameSyncConfig, broker: Arc<dyn Broker>, store: Arc<dyn CacheStore>) -> Self {
        let registry = Arc::new(AdapterRegistry::new(config.registry.clone()));

        let mut validator = GameDataValidator::new(config.validation.clone());
        if config.validation.enable_ownership_validation {
            let ownership: Arc<dyn OwnershipSource> = registry.clone();
            validator = validator.with_ownership_source(ownership);
        }

        let cache = Arc::new(CacheLayer::new(store, config.cache.clone()));
        let hub = Arc::new(ClientManager::new(
            config.live.max_connections,
            config.live.max_payload_bytes,
        ));

        let engine = Arc::new(SyncEngine::new(
            config.sync.clone(),
            config.broker.channel_prefix.clone(),
            EngineParts {
                registry: registry.clone(),
                validator: Arc::new(validator),
                cache,
                broker,
                hub,
            },
        ));

        Self {
            config,
            registry,
            engine,
            started_at: Utc::now(),
            maintenance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GameSyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        self.engine.cache()
    }

    pub fn hub(&self) -> &Arc<ClientManager> {
        self.engine.hub()
    }

    /// Start health checks, the engine and the cache sweeper
    pub async fn start(&self) {
        self.registry.start_health_checks();
        self.engine.start().await;

        let cache: Weak<CacheLayer> = Arc::downgrade(self.engine.cache());
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.cleanup().await;
                debug!("Cache sweep evicted {} keys", evicted);
            }
        });
        if let Some(previous) = self.maintenance.lock().replace(sweeper) {
            previous.abort();
        }
        info!("Sync core started");
    }

    /// Submit a record on behalf of a business service
    ///
    /// `player_id` and `game_id` must match the record's own identity.
    pub async fn process_game_data_update(
        &self,
        player_id: &str,
        game_id: &str,
        data: StandardizedGameData,
        source: UpdateSource,
    ) -> ProcessOutcome {
        if data.player_id != player_id || data.game_id != game_id {
            return ProcessOutcome::Failed {
                error: SyncError::InvalidRequest {
                    message: format!(
                        "record is for {}/{}, request names {}/{}",
                        data.game_id, data.player_id, game_id, player_id
                    ),
                }
                .to_string(),
            };
        }

        match self.engine.submit(data, source).await {
            Ok(SubmitOutcome::Queued {
                update_type,
                validation,
            }) => ProcessOutcome::Accepted {
                update_type,
                score: validation.score,
            },
            Ok(SubmitOutcome::Rejected { validation }) => ProcessOutcome::Rejected { validation },
            Err(e) => {
                warn!("Update for {}/{} not processed: {}", game_id, player_id, e);
                ProcessOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Last flushed record for a player, if still cached
    pub async fn get_cached_game_data(
        &self,
        player_id: &str,
        game_id: &str,
    ) -> Option<StandardizedGameData> {
        let key = self.cache().keys().player_data(game_id, player_id);
        self.cache().get(&key).await
    }

    pub async fn subscribe_to_player(
        &self,
        player_id: &str,
        game_ids: Option<Vec<String>>,
    ) -> Result<SubscriptionHandle> {
        self.engine.subscribe_to_player(player_id, game_ids).await
    }

    pub async fn unsubscribe_from_player(&self, player_id: &str) -> bool {
        self.engine.unsubscribe_from_player(player_id).await
    }

    /// Pre-load the cache for a game through its adapter
    pub async fn warm_up_cache(&self, game_id: &str, player_ids: &[String]) -> Result<WarmUpReport> {
        let adapter = self
            .registry
            .get_adapter(game_id)
            .await
            .ok_or_else(|| SyncError::InvalidRequest {
                message: format!("no active adapter for {}", game_id),
            })?;

        let report = self
            .cache()
            .warm_up(game_id, player_ids, |player_id| {
                let adapter = adapter.clone();
                async move { adapter.fetch_player_data(&player_id).await.map(Some) }
            })
            .await;
        Ok(report)
    }

    pub async fn get_health_status(&self) -> HealthReport {
        HealthReport::collect(&self.engine, self.started_at).await
    }

    pub async fn get_metrics(&self) -> ServiceMetrics {
        ServiceMetrics::collect(&self.engine).await
    }

    /// Stop the engine, then the registry
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self.maintenance.lock().take() {
            sweeper.abort();
        }
        self.engine.shutdown().await;
        self.registry.destroy().await;
        info!("Sync core stopped");
    }
}
