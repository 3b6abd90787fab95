//! # Adapter Registry
//!
//! Owns every registered adapter together with its configuration, activation
//! flag and last known health. Lookups only ever return active registrations.
//!
//! ## Locking
//!
//! The adapter map sits behind a single `RwLock`. Adapter calls (health checks,
//! unsubscribes) are made on cloned `Arc`s after the lock is released, so a
//! slow backend never blocks registration or lookups.
//!
//! ## Events
//!
//! State changes are published as [`RegistryEvent`]s on a broadcast channel.
//! The sync engine listens to start and stop ingestion for a source.

use crate::circuit_breaker::CircuitBreakerMetrics;
use crate::resilient::ResilientAdapter;
use crate::source::{AdapterFeature, FeatureSet, SourceAdapter};
use crate::{AdapterError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use sync_config::{AdapterConfig, RegistryConfig};
use sync_types::HealthStatus;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Registry-owned record for one adapter
#[derive(Clone)]
pub struct AdapterRegistration {
    pub adapter: Arc<ResilientAdapter>,
    pub config: AdapterConfig,
    pub registered_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_status: HealthStatus,
}

/// Signals published by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryEvent {
    AdapterRegistered {
        game_id: String,
        active: bool,
    },
    AdapterUnregistered {
        game_id: String,
    },
    ActiveChanged {
        game_id: String,
        active: bool,
    },
    HealthChanged {
        game_id: String,
        previous: HealthStatus,
        current: HealthStatus,
    },
    /// Check panicked or timed out, the adapter was marked unhealthy
    HealthCheckFailed {
        game_id: String,
        error: String,
    },
}

/// Counts of registrations by status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub active: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

/// Serializable view of a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInfo {
    pub game_id: String,
    pub name: String,
    pub features: FeatureSet,
    pub is_active: bool,
    pub health_status: HealthStatus,
    pub registered_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub circuit_breakers: Vec<CircuitBreakerMetrics>,
}

type CheckOutcome = std::result::Result<HealthStatus, String>;

pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, AdapterRegistration>>,
    events: broadcast::Sender<RegistryEvent>,
    config: RegistryConfig,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl AdapterRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            adapters: RwLock::new(HashMap::new()),
            events,
            config,
            health_task: Mutex::new(None),
        }
    }

    /// Listen for registry events
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        debug!("Registry event: {:?}", event);
        // No listeners is fine
        let _ = self.events.send(event);
    }

    /// Register an adapter under its game id
    ///
    /// Fails with [`AdapterError::BusinessLogic`] when the game id is taken,
    /// does not match the config, or the config is invalid. An initial health
    /// check runs before the adapter becomes visible.
    pub async fn register_adapter(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        config: AdapterConfig,
    ) -> Result<()> {
        config.validate().map_err(|reason| {
            AdapterError::BusinessLogic(format!(
                "Invalid configuration for {}: {}",
                config.game_id, reason
            ))
        })?;

        if adapter.game_id() != config.game_id {
            return Err(AdapterError::BusinessLogic(format!(
                "Adapter reports game id {} but was configured as {}",
                adapter.game_id(),
                config.game_id
            )));
        }

        let game_id = config.game_id.clone();
        if self.adapters.read().await.contains_key(&game_id) {
            return Err(already_registered(&game_id));
        }

        let resilient = Arc::new(ResilientAdapter::new(adapter, &config));
        let health_status = match check_health(resilient.clone(), self.config.health_check_timeout()).await
        {
            Ok(status) => status,
            Err(reason) => {
                warn!("Initial health check for {} failed: {}", game_id, reason);
                HealthStatus::Unhealthy
            }
        };

        let active = config.enabled;
        {
            let mut adapters = self.adapters.write().await;
            if adapters.contains_key(&game_id) {
                return Err(already_registered(&game_id));
            }
            adapters.insert(
                game_id.clone(),
                AdapterRegistration {
                    adapter: resilient,
                    config,
                    registered_at: Utc::now(),
                    is_active: active,
                    last_health_check: Some(Utc::now()),
                    health_status,
                },
            );
        }

        info!(
            "Registered adapter {} (active: {}, health: {})",
            game_id, active, health_status
        );
        self.emit(RegistryEvent::AdapterRegistered { game_id, active });
        Ok(())
    }

    /// Remove an adapter, closing its push stream first if it has one
    ///
    /// Unknown game ids fail with [`AdapterError::BusinessLogic`], including a
    /// second unregister of the same id.
    pub async fn unregister_adapter(&self, game_id: &str) -> Result<()> {
        let registration = self
            .adapters
            .write()
            .await
            .remove(game_id)
            .ok_or_else(|| {
                AdapterError::BusinessLogic(format!("Adapter {} is not registered", game_id))
            })?;

        if registration.adapter.supports(AdapterFeature::RealTimeUpdates) {
            if let Err(e) = registration.adapter.unsubscribe_from_updates().await {
                warn!("Failed to unsubscribe {} from updates: {}", game_id, e);
            }
        }

        info!("Unregistered adapter {}", game_id);
        self.emit(RegistryEvent::AdapterUnregistered {
            game_id: game_id.to_string(),
        });
        Ok(())
    }

    /// Active adapter for `game_id`
    pub async fn get_adapter(&self, game_id: &str) -> Option<Arc<ResilientAdapter>> {
        self.adapters
            .read()
            .await
            .get(game_id)
            .filter(|registration| registration.is_active)
            .map(|registration| registration.adapter.clone())
    }

    /// Every active adapter, ordered by game id
    pub async fn get_all_adapters(&self) -> Vec<Arc<ResilientAdapter>> {
        let adapters = self.adapters.read().await;
        let mut active: Vec<&AdapterRegistration> =
            adapters.values().filter(|r| r.is_active).collect();
        active.sort_by(|a, b| a.config.game_id.cmp(&b.config.game_id));
        active.into_iter().map(|r| r.adapter.clone()).collect()
    }

    pub async fn get_adapters_by_feature(&self, feature: AdapterFeature) -> Vec<Arc<ResilientAdapter>> {
        self.get_all_adapters()
            .await
            .into_iter()
            .filter(|adapter| adapter.supports(feature))
            .collect()
    }

    /// Registration regardless of activation
    pub async fn get_registration(&self, game_id: &str) -> Option<AdapterRegistration> {
        self.adapters.read().await.get(game_id).cloned()
    }

    pub async fn is_registered(&self, game_id: &str) -> bool {
        self.adapters.read().await.contains_key(game_id)
    }

    /// Toggle ingestion for an adapter without removing it
    pub async fn set_adapter_active(&self, game_id: &str, active: bool) -> Result<()> {
        let changed = {
            let mut adapters = self.adapters.write().await;
            let registration = adapters.get_mut(game_id).ok_or_else(|| {
                AdapterError::BusinessLogic(format!("Adapter {} is not registered", game_id))
            })?;
            let changed = registration.is_active != active;
            registration.is_active = active;
            changed
        };

        if changed {
            info!("Adapter {} is now {}", game_id, if active { "active" } else { "inactive" });
            self.emit(RegistryEvent::ActiveChanged {
                game_id: game_id.to_string(),
                active,
            });
        }
        Ok(())
    }

    /// Check every active adapter concurrently
    ///
    /// Each check runs in its own task under the configured timeout. A panic or
    /// timeout marks only that adapter unhealthy; the others are unaffected.
    pub async fn perform_health_checks(&self) -> HashMap<String, HealthStatus> {
        let targets: Vec<(String, Arc<ResilientAdapter>)> = self
            .adapters
            .read()
            .await
            .iter()
            .filter(|(_, registration)| registration.is_active)
            .map(|(game_id, registration)| (game_id.clone(), registration.adapter.clone()))
            .collect();

        let timeout = self.config.health_check_timeout();
        let handles: Vec<(String, JoinHandle<CheckOutcome>)> = targets
            .into_iter()
            .map(|(game_id, adapter)| (game_id, tokio::spawn(check_health(adapter, timeout))))
            .collect();

        let (game_ids, tasks): (Vec<String>, Vec<JoinHandle<CheckOutcome>>) =
            handles.into_iter().unzip();
        let outcomes: Vec<CheckOutcome> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(format!("health check panicked: {}", e))))
            .collect();

        let checked_at = Utc::now();
        let mut results = HashMap::new();
        let mut events = Vec::new();
        {
            let mut adapters = self.adapters.write().await;
            for (game_id, outcome) in game_ids.into_iter().zip(outcomes) {
                let Some(registration) = adapters.get_mut(&game_id) else {
                    // Unregistered while the check was running
                    continue;
                };

                let current = match outcome {
                    Ok(status) => status,
                    Err(reason) => {
                        events.push(RegistryEvent::HealthCheckFailed {
                            game_id: game_id.clone(),
                            error: reason,
                        });
                        HealthStatus::Unhealthy
                    }
                };

                let previous = registration.health_status;
                registration.health_status = current;
                registration.last_health_check = Some(checked_at);

                if previous != current {
                    events.push(RegistryEvent::HealthChanged {
                        game_id: game_id.clone(),
                        previous,
                        current,
                    });
                }
                results.insert(game_id, current);
            }
        }

        for event in events {
            match &event {
                RegistryEvent::HealthChanged { game_id, previous, current } => {
                    warn!("Adapter {} health changed: {} -> {}", game_id, previous, current)
                }
                RegistryEvent::HealthCheckFailed { game_id, error } => {
                    error!("Health check failed for {}: {}", game_id, error)
                }
                _ => {}
            }
            self.emit(event);
        }

        results
    }

    /// Run [`Self::perform_health_checks`] on the configured interval
    ///
    /// The task holds only a weak reference and ends once the registry is
    /// dropped or [`Self::destroy`] is called.
    pub fn start_health_checks(self: &Arc<Self>) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health_check_interval().max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.perform_health_checks().await;
            }
        });

        if let Some(previous) = self.health_task.lock().replace(handle) {
            previous.abort();
        }
        info!("Adapter health checks every {:?}", period);
    }

    pub fn stop_health_checks(&self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
    }

    pub async fn get_health_summary(&self) -> HealthSummary {
        let adapters = self.adapters.read().await;
        let mut summary = HealthSummary {
            total: adapters.len(),
            ..HealthSummary::default()
        };

        for registration in adapters.values() {
            if registration.is_active {
                summary.active += 1;
            }
            match registration.health_status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
            }
        }
        summary
    }

    /// Snapshot of every registration, ordered by game id
    pub async fn adapter_infos(&self) -> Vec<AdapterInfo> {
        let registrations: Vec<AdapterRegistration> =
            self.adapters.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(registrations.len());
        for registration in registrations {
            infos.push(AdapterInfo {
                game_id: registration.config.game_id.clone(),
                name: registration.adapter.name().to_string(),
                features: registration.adapter.features().clone(),
                is_active: registration.is_active,
                health_status: registration.health_status,
                registered_at: registration.registered_at,
                last_health_check: registration.last_health_check,
                circuit_breakers: registration.adapter.breaker_metrics().await,
            });
        }
        infos.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        infos
    }

    /// Stop health checks and unregister every adapter
    pub async fn destroy(&self) {
        self.stop_health_checks();

        let game_ids: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        for game_id in game_ids {
            if let Err(e) = self.unregister_adapter(&game_id).await {
                warn!("Failed to unregister {} during shutdown: {}", game_id, e);
            }
        }
        info!("Adapter registry destroyed");
    }
}

fn already_registered(game_id: &str) -> AdapterError {
    AdapterError::BusinessLogic(format!("Adapter {} is already registered", game_id))
}

/// Healthy, or degraded while any breaker is not closed
async fn check_health(adapter: Arc<ResilientAdapter>, timeout: Duration) -> CheckOutcome {
    match tokio::time::timeout(timeout, adapter.is_healthy()).await {
        Err(_) => Err(format!("health check timed out after {:?}", timeout)),
        Ok(false) => Ok(HealthStatus::Unhealthy),
        Ok(true) if adapter.all_breakers_closed().await => Ok(HealthStatus::Healthy),
        Ok(true) => Ok(HealthStatus::Degraded),
    }
}
