//! # Sync Engine
//!
//! Moves normalized records from adapters to subscribers:
//!
//! ```text
//! adapter push / poll / manual ──► validate ──► infer update type ──► queue
//!                                     │                                 │
//!                                  reject                      size or timer flush
//!                                                                        │
//!                        cache invalidate + write ◄──────────────────────┤
//!                        broker publish {prefix}:player:{id}:updates ◄───┤
//!                        live clients following the player ◄─────────────┘
//! ```
//!
//! ## Sources
//!
//! Each registered game is a source with its own lifecycle
//! (`STOPPED → STARTING → RUNNING → STOPPING → STOPPED`). Sources with
//! `REAL_TIME_UPDATES` ingest from the adapter's push stream, the rest are
//! polled for every tracked player. Registry events start and stop sources as
//! adapters are registered, toggled or change health. A push stream that ends
//! on its own stops its source, which is then resubscribed with exponential
//! backoff.
//!
//! ## Delivery
//!
//! A failed flush puts the whole batch back at the front of the queue. Some of
//! its updates may already have been published, so consumers see them again
//! and deduplicate on `(playerId, gameId, timestamp)`. A flush cancelled
//! mid-delivery requeues its batch the same way.
//!
//! ## Locking
//!
//! The queue, subscription map and source map each have their own lock, and
//! none of them is held across an await. Flushes are serialized by an async
//! mutex so a size-triggered flush and the timer never interleave batches.
//! Background loops are never aborted; they are asked to stop and awaited.

mod events;
mod queue;
mod subscriptions;
mod worker;

pub use events::{SourceState, SyncEvent};
pub use subscriptions::{SubscriptionHandle, SubscriptionInfo};

use crate::broker::{player_channel, Broker};
use crate::error::{Result, SyncError};
use crate::live::{ClientManager, ServerMessage};
use crate::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::validation::{GameDataValidator, ValidationResult};
use adapter_service::{AdapterFeature, AdapterRegistry, RegistryEvent};
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use queue::BatchQueue;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use subscriptions::{covers, PlayerSubscription};
use sync_cache::CacheLayer;
use sync_config::SyncConfig;
use sync_types::{GameDataUpdate, StandardizedGameData, UpdateSource, UpdateType};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use worker::{StopSignal, Worker};

const EVENT_CAPACITY: usize = 1024;

/// Result of handing one record to the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitOutcome {
    Queued {
        update_type: UpdateType,
        validation: ValidationResult,
    },
    Rejected {
        validation: ValidationResult,
    },
}

/// Shared collaborators handed to the engine
pub struct EngineParts {
    pub registry: Arc<AdapterRegistry>,
    pub validator: Arc<GameDataValidator>,
    pub cache: Arc<CacheLayer>,
    pub broker: Arc<dyn Broker>,
    pub hub: Arc<ClientManager>,
}

struct SourceRuntime {
    state: SourceState,
    task: Option<Worker>,
}

pub struct SyncEngine {
    config: SyncConfig,
    channel_prefix: String,
    registry: Arc<AdapterRegistry>,
    validator: Arc<GameDataValidator>,
    cache: Arc<CacheLayer>,
    broker: Arc<dyn Broker>,
    hub: Arc<ClientManager>,
    queue: BatchQueue,
    flush_lock: tokio::sync::Mutex<()>,
    subscriptions: Mutex<HashMap<String, PlayerSubscription>>,
    sources: Mutex<HashMap<String, SourceRuntime>>,
    metrics: SyncMetrics,
    events: broadcast::Sender<SyncEvent>,
    tasks: Mutex<Vec<Worker>>,
    // Feeds the resubscriber while the engine runs
    ended_streams: Mutex<Option<mpsc::UnboundedSender<String>>>,
    running: AtomicBool,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, channel_prefix: impl Into<String>, parts: EngineParts) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue: BatchQueue::new(config.max_queue_size),
            config,
            channel_prefix: channel_prefix.into(),
            registry: parts.registry,
            validator: parts.validator,
            cache: parts.cache,
            broker: parts.broker,
            hub: parts.hub,
            flush_lock: tokio::sync::Mutex::new(()),
            subscriptions: Mutex::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
            metrics: SyncMetrics::new(),
            events,
            tasks: Mutex::new(Vec::new()),
            ended_streams: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No listeners is fine
        let _ = self.events.send(event);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn hub(&self) -> &Arc<ClientManager> {
        &self.hub
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn max_queue_size(&self) -> usize {
        self.config.max_queue_size
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn source_state(&self, game_id: &str) -> Option<SourceState> {
        self.sources.lock().get(game_id).map(|runtime| runtime.state)
    }

    pub fn source_states(&self) -> BTreeMap<String, SourceState> {
        self.sources
            .lock()
            .iter()
            .map(|(game_id, runtime)| (game_id.clone(), runtime.state))
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .subscriptions
            .lock()
            .values()
            .map(SubscriptionInfo::from)
            .collect();
        infos.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        infos
    }

    /// Start the flush timer, the registry listener and every healthy source
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        // Listen before scanning so no registration slips between the two
        let registry_events = self.registry.subscribe_events();
        let engine = Arc::downgrade(self);
        let listener = Worker::spawn("registry-listener", move |stop| {
            run_registry_listener(engine, registry_events, stop)
        });
        let engine = Arc::downgrade(self);
        let period = self.config.batch_interval();
        let timer = Worker::spawn("flush-timer", move |stop| run_flush_timer(engine, period, stop));
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        *self.ended_streams.lock() = Some(ended_tx);
        let (engine, config) = (Arc::downgrade(self), self.config.clone());
        let resubscriber = Worker::spawn("resubscriber", move |stop| {
            run_resubscriber(engine, ended_rx, config, stop)
        });
        self.tasks.lock().extend([listener, timer, resubscriber]);

        for adapter in self.registry.get_all_adapters().await {
            let game_id = adapter.game_id().to_string();
            if self.should_ingest(&game_id).await {
                if let Err(e) = self.start_source(&game_id).await {
                    warn!("Source {} failed to start: {}", game_id, e);
                }
            }
        }

        info!(
            "Sync engine started (batch size {}, interval {:?})",
            self.config.batch_size,
            self.config.batch_interval()
        );
    }

    /// Stop everything and flush what is left
    ///
    /// Returns once every loop and source has stopped, the final flush has
    /// run, local subscriptions are released and the broker and live clients
    /// are closed. A flush already in progress completes first.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Sync engine shutting down");

        self.ended_streams.lock().take();
        let workers: Vec<Worker> = self.tasks.lock().drain(..).collect();
        for worker in workers {
            worker.stop().await;
        }

        let game_ids: Vec<String> = self.sources.lock().keys().cloned().collect();
        for game_id in game_ids {
            self.stop_source(&game_id).await;
        }

        self.flush_pending().await;
        let remaining = self.queue.len();
        if remaining > 0 {
            warn!("{} updates still queued at shutdown", remaining);
        }

        let released: Vec<PlayerSubscription> =
            self.subscriptions.lock().drain().map(|(_, s)| s).collect();
        drop(released);

        if let Err(e) = self.broker.close().await {
            warn!("Broker close failed: {}", e);
        }
        self.hub.close_all().await;
        info!("Sync engine stopped");
    }

    /// Validate a record and queue it for the next flush
    ///
    /// Live and polled records are only accepted while their source is
    /// running. Manual submissions are accepted for any game.
    pub async fn submit(
        &self,
        data: StandardizedGameData,
        source: UpdateSource,
    ) -> Result<SubmitOutcome> {
        if !self.is_running() {
            return Err(SyncError::NotRunning);
        }
        if source != UpdateSource::Manual
            && self.source_state(&data.game_id) != Some(SourceState::Running)
        {
            return Err(SyncError::SourceNotRunning {
                game_id: data.game_id,
            });
        }

        self.metrics.record_received();
        let validation = self.validator.validate_game_data(&data).await;

        if !validation.is_valid {
            self.metrics.record_rejected(validation.score);
            warn!(
                "Rejected update for {}/{} (score {}): {:?}",
                data.game_id,
                data.player_id,
                validation.score,
                validation.error_codes()
            );
            self.emit(SyncEvent::ValidationFailed {
                player_id: data.player_id.clone(),
                game_id: data.game_id.clone(),
                score: validation.score,
                errors: validation.error_codes(),
            });
            return Ok(SubmitOutcome::Rejected { validation });
        }

        let previous: Option<StandardizedGameData> = self
            .cache
            .get(&self.cache.keys().player_data(&data.game_id, &data.player_id))
            .await;
        let update_type = infer_update_type(previous.as_ref(), &data);
        let update = GameDataUpdate::new(data, update_type, source);
        let (player_id, game_id) = (update.player_id.clone(), update.game_id.clone());

        let depth = match self.queue.push(update) {
            Ok(depth) => depth,
            Err(_) => {
                let depth = self.queue.len();
                self.metrics.record_queue_full();
                warn!(
                    "QUEUE_FULL: dropping update for {}/{} at depth {}",
                    game_id, player_id, depth
                );
                self.emit(SyncEvent::QueueFull {
                    player_id,
                    game_id,
                    depth,
                });
                return Err(SyncError::QueueFull {
                    max: self.config.max_queue_size,
                });
            }
        };

        self.metrics.record_accepted(validation.score);
        debug!(
            "Queued {} for {}/{} (depth {})",
            update_type, game_id, player_id, depth
        );
        self.emit(SyncEvent::UpdateQueued {
            player_id,
            game_id,
            update_type,
        });

        if depth >= self.config.batch_size {
            // A failed flush requeues the batch, the update stays queued
            let _ = self.flush().await;
        }

        Ok(SubmitOutcome::Queued {
            update_type,
            validation,
        })
    }

    /// Flush at most one batch
    ///
    /// Safe to cancel: a batch whose delivery did not finish goes back to the
    /// front of the queue.
    pub async fn flush(&self) -> Result<usize> {
        let _serialized = self.flush_lock.lock().await;

        let batch = self.queue.take_batch(self.config.batch_size);
        if batch.is_empty() {
            return Ok(0);
        }
        let size = batch.len();

        let delivered = self.deliver(batch.updates()).await;
        match delivered {
            Ok(()) => {
                batch.commit();
                self.metrics.record_flush(size);
                debug!("Flushed batch of {}", size);
                self.emit(SyncEvent::BatchFlushed { size });
                Ok(size)
            }
            Err(e) => {
                drop(batch);
                self.metrics.record_flush_failure();
                error!("Flush of {} updates failed, requeued: {}", size, e);
                self.emit(SyncEvent::FlushFailed {
                    size,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Flush until the queue is empty or a flush fails
    pub async fn flush_pending(&self) {
        loop {
            match self.flush().await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    async fn deliver(&self, batch: &[GameDataUpdate]) -> Result<()> {
        for update in batch {
            let payload = serde_json::to_string(update)?;

            let context = HashMap::from([
                ("gameId".to_string(), update.game_id.clone()),
                ("playerId".to_string(), update.player_id.clone()),
            ]);
            self.cache
                .invalidate_by_trigger(update.update_type.as_trigger(), &context)
                .await;

            if let Some(ttl) = self.cache_ttl_for(&update.game_id).await {
                let key = self
                    .cache
                    .keys()
                    .player_data(&update.game_id, &update.player_id);
                self.cache.set(&key, &update.data, Some(ttl)).await?;
            }

            self.broker
                .publish(&player_channel(&self.channel_prefix, &update.player_id), payload)
                .await?;

            let reached = self
                .hub
                .send_to_player(&update.player_id, &ServerMessage::Update { data: update })
                .await;
            self.metrics.record_live_deliveries(reached);
        }
        Ok(())
    }

    /// Player payload lifetime, bounded by the adapter's cache settings
    async fn cache_ttl_for(&self, game_id: &str) -> Option<Duration> {
        let ttl = self.config.cache_ttl();
        match self.registry.get_registration(game_id).await {
            Some(registration) if !registration.config.cache.enabled => None,
            Some(registration) => Some(ttl.min(registration.config.cache.ttl())),
            None => Some(ttl),
        }
    }

    /// Route a player's updates to a local consumer
    ///
    /// `game_ids` of `None` (or empty) means every game. A second subscription
    /// for the same player replaces the first, whose handle then ends.
    pub async fn subscribe_to_player(
        &self,
        player_id: &str,
        game_ids: Option<Vec<String>>,
    ) -> Result<SubscriptionHandle> {
        if player_id.trim().is_empty() {
            return Err(SyncError::InvalidRequest {
                message: "playerId is required".to_string(),
            });
        }

        let game_ids: Option<BTreeSet<String>> = game_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.into_iter().collect());

        let mut channel = self
            .broker
            .subscribe(&player_channel(&self.channel_prefix, player_id))
            .await?;
        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer);

        let filter = game_ids.clone();
        let player = player_id.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(message) = channel.recv().await {
                let update: GameDataUpdate = match serde_json::from_str(&message.payload) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Dropping unreadable update on {}: {}", message.channel, e);
                        continue;
                    }
                };
                if !covers(filter.as_ref(), &update.game_id) {
                    continue;
                }
                if sender.send(update).await.is_err() {
                    debug!("Consumer for {} went away", player);
                    break;
                }
            }
        });

        let replaced = self.subscriptions.lock().insert(
            player_id.to_string(),
            PlayerSubscription {
                player_id: player_id.to_string(),
                game_ids: game_ids.clone(),
                subscribed_at: Utc::now(),
                forwarder,
            },
        );
        if replaced.is_some() {
            debug!("Replaced existing subscription for {}", player_id);
        }
        drop(replaced);

        self.watch_player(player_id, game_ids.as_ref()).await;
        info!("Subscribed to player {} ({:?})", player_id, game_ids);
        Ok(SubscriptionHandle::new(player_id.to_string(), receiver))
    }

    /// Remove a player's subscription; unknown players are a no-op
    pub async fn unsubscribe_from_player(&self, player_id: &str) -> bool {
        let Some(subscription) = self.subscriptions.lock().remove(player_id) else {
            return false;
        };
        let game_ids = subscription.game_ids.clone();
        drop(subscription);

        if !self.hub.is_followed(player_id).await {
            self.unwatch_player(player_id, game_ids.as_ref()).await;
        }
        info!("Unsubscribed from player {}", player_id);
        true
    }

    /// A live client started following `player_id`
    pub async fn follow_player(&self, player_id: &str) {
        self.watch_player(player_id, None).await;
    }

    /// The last live client stopped following `player_id`
    pub async fn unfollow_player(&self, player_id: &str) {
        let subscribed = self.subscriptions.lock().get(player_id).map(|s| s.game_ids.clone());
        match subscribed {
            // Keep pushing only what the local subscription still needs
            Some(Some(game_ids)) => {
                let adapters = self
                    .registry
                    .get_adapters_by_feature(AdapterFeature::RealTimeUpdates)
                    .await;
                for adapter in adapters.iter().filter(|a| !game_ids.contains(a.game_id())) {
                    if let Err(e) = adapter.unwatch_player(player_id).await {
                        debug!("Unwatch of {} on {} failed: {}", player_id, adapter.game_id(), e);
                    }
                }
            }
            Some(None) => {}
            None => self.unwatch_player(player_id, None).await,
        }
    }

    async fn watch_player(&self, player_id: &str, game_ids: Option<&BTreeSet<String>>) {
        let adapters = self
            .registry
            .get_adapters_by_feature(AdapterFeature::RealTimeUpdates)
            .await;
        for adapter in adapters.iter().filter(|a| covers(game_ids, a.game_id())) {
            if let Err(e) = adapter.watch_player(player_id).await {
                warn!("Watch of {} on {} failed: {}", player_id, adapter.game_id(), e);
            }
        }
    }

    async fn unwatch_player(&self, player_id: &str, game_ids: Option<&BTreeSet<String>>) {
        let adapters = self
            .registry
            .get_adapters_by_feature(AdapterFeature::RealTimeUpdates)
            .await;
        for adapter in adapters.iter().filter(|a| covers(game_ids, a.game_id())) {
            if let Err(e) = adapter.unwatch_player(player_id).await {
                debug!("Unwatch of {} on {} failed: {}", player_id, adapter.game_id(), e);
            }
        }
    }

    /// Players whose data should be ingested for `game_id`
    pub async fn tracked_players(&self, game_id: &str) -> Vec<String> {
        let mut players: HashSet<String> = self
            .subscriptions
            .lock()
            .values()
            .filter(|s| s.covers(game_id))
            .map(|s| s.player_id.clone())
            .collect();
        players.extend(self.hub.followed_players().await);

        let mut players: Vec<String> = players.into_iter().collect();
        players.sort();
        players
    }

    async fn should_ingest(&self, game_id: &str) -> bool {
        self.registry
            .get_registration(game_id)
            .await
            .map(|r| r.is_active && r.health_status.is_operational())
            .unwrap_or(false)
    }

    fn transition(&self, game_id: &str, expected: &[SourceState], next: SourceState) -> bool {
        let previous = {
            let mut sources = self.sources.lock();
            let runtime = sources
                .entry(game_id.to_string())
                .or_insert(SourceRuntime {
                    state: SourceState::Stopped,
                    task: None,
                });
            if !expected.contains(&runtime.state) {
                return false;
            }
            std::mem::replace(&mut runtime.state, next)
        };

        self.announce(game_id, previous, next);
        true
    }

    fn announce(&self, game_id: &str, previous: SourceState, current: SourceState) {
        info!("Source {}: {} -> {}", game_id, previous, current);
        self.emit(SyncEvent::SourceStateChanged {
            game_id: game_id.to_string(),
            previous,
            current,
        });
    }

    /// Begin ingesting from a registered, active adapter
    pub async fn start_source(self: &Arc<Self>, game_id: &str) -> Result<()> {
        if !self.transition(game_id, &[SourceState::Stopped], SourceState::Starting) {
            return Ok(());
        }

        let Some(adapter) = self.registry.get_adapter(game_id).await else {
            self.transition(game_id, &[SourceState::Starting], SourceState::Stopped);
            return Err(SyncError::InvalidRequest {
                message: format!("no active adapter for {}", game_id),
            });
        };

        let live = adapter.supports(AdapterFeature::RealTimeUpdates);
        let task = if live {
            let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer);
            if let Err(e) = adapter.subscribe_to_updates(sender).await {
                self.transition(game_id, &[SourceState::Starting], SourceState::Stopped);
                return Err(e.into());
            }
            for player_id in self.tracked_players(game_id).await {
                if let Err(e) = adapter.watch_player(&player_id).await {
                    warn!("Watch of {} on {} failed: {}", player_id, game_id, e);
                }
            }
            let (engine, game) = (Arc::downgrade(self), game_id.to_string());
            Worker::spawn(format!("push-{}", game_id), move |stop| {
                run_push_ingest(engine, game, receiver, stop)
            })
        } else {
            let (engine, game) = (Arc::downgrade(self), game_id.to_string());
            let period = self.config.poll_interval();
            Worker::spawn(format!("poll-{}", game_id), move |stop| {
                run_poll_ingest(engine, game, period, stop)
            })
        };

        let installed = {
            let mut sources = self.sources.lock();
            match sources.get_mut(game_id) {
                Some(runtime) if runtime.state == SourceState::Starting => {
                    runtime.task = Some(task);
                    None
                }
                _ => Some(task),
            }
        };

        if let Some(task) = installed {
            // Stopped while starting
            task.stop().await;
            if live {
                let _ = adapter.unsubscribe_from_updates().await;
            }
            return Ok(());
        }

        self.transition(game_id, &[SourceState::Starting], SourceState::Running);
        Ok(())
    }

    /// Stop ingesting from a source; no-op unless it is starting or running
    ///
    /// Waits for the ingest loop to finish the record it is working on.
    pub async fn stop_source(&self, game_id: &str) {
        let (previous, task) = {
            let mut sources = self.sources.lock();
            let Some(runtime) = sources.get_mut(game_id) else {
                return;
            };
            match runtime.state {
                SourceState::Running => {
                    runtime.state = SourceState::Stopping;
                    (SourceState::Running, runtime.task.take())
                }
                SourceState::Starting => {
                    // start_source sees this and tears down what it built
                    runtime.state = SourceState::Stopped;
                    (SourceState::Starting, None)
                }
                _ => return,
            }
        };

        if previous == SourceState::Starting {
            self.announce(game_id, previous, SourceState::Stopped);
            return;
        }
        self.announce(game_id, previous, SourceState::Stopping);

        if let Some(task) = task {
            task.stop().await;
        }

        // Deactivated adapters are still registered and may hold a stream
        if let Some(registration) = self.registry.get_registration(game_id).await {
            if registration.adapter.supports(AdapterFeature::RealTimeUpdates) {
                if let Err(e) = registration.adapter.unsubscribe_from_updates().await {
                    warn!("Unsubscribe of {} failed: {}", game_id, e);
                }
            }
        }

        self.transition(game_id, &[SourceState::Stopping], SourceState::Stopped);
    }

    /// The adapter closed its push stream without being asked to
    async fn push_stream_ended(&self, game_id: &str) {
        let ended = {
            let mut sources = self.sources.lock();
            match sources.get_mut(game_id) {
                // A start still in progress sees STOPPED and keeps it
                Some(runtime)
                    if matches!(runtime.state, SourceState::Running | SourceState::Starting)
                        && runtime.task.is_some() =>
                {
                    let previous = std::mem::replace(&mut runtime.state, SourceState::Stopped);
                    runtime.task.take().map(|task| (previous, task))
                }
                // Being stopped, stop_source finishes the teardown
                _ => None,
            }
        };
        // This runs on that worker, so its handle is only detached
        let Some((previous, _detached)) = ended else {
            return;
        };

        warn!("Push stream for {} ended", game_id);
        self.announce(game_id, previous, SourceState::Stopped);

        if let Some(adapter) = self.registry.get_adapter(game_id).await {
            if let Err(e) = adapter.unsubscribe_from_updates().await {
                debug!("Unsubscribe of ended stream {} failed: {}", game_id, e);
            }
        }

        if let Some(resubscriber) = self.ended_streams.lock().as_ref() {
            // Gone only while shutting down
            let _ = resubscriber.send(game_id.to_string());
        }
    }

    async fn handle_registry_event(self: &Arc<Self>, event: RegistryEvent) {
        match event {
            RegistryEvent::AdapterRegistered { game_id, .. }
            | RegistryEvent::ActiveChanged {
                game_id,
                active: true,
            } => {
                if self.should_ingest(&game_id).await {
                    if let Err(e) = self.start_source(&game_id).await {
                        warn!("Source {} failed to start: {}", game_id, e);
                    }
                }
            }
            RegistryEvent::AdapterUnregistered { game_id }
            | RegistryEvent::ActiveChanged {
                game_id,
                active: false,
            } => self.stop_source(&game_id).await,
            RegistryEvent::HealthChanged {
                game_id, current, ..
            } => {
                if current.is_operational() {
                    if self.should_ingest(&game_id).await {
                        if let Err(e) = self.start_source(&game_id).await {
                            warn!("Source {} failed to restart: {}", game_id, e);
                        }
                    }
                } else {
                    self.stop_source(&game_id).await;
                }
            }
            RegistryEvent::HealthCheckFailed { .. } => {}
        }
    }

    async fn poll_source(&self, game_id: &str) {
        let Some(adapter) = self.registry.get_adapter(game_id).await else {
            return;
        };
        let players = self.tracked_players(game_id).await;
        if players.is_empty() {
            return;
        }

        let fetches = players.iter().map(|player_id| {
            let adapter = adapter.clone();
            async move { (player_id, adapter.fetch_player_data(player_id).await) }
        });

        for (player_id, fetched) in join_all(fetches).await {
            match fetched {
                Ok(data) => {
                    if let Err(e) = self.submit(data, UpdateSource::Poll).await {
                        debug!("Polled update for {}/{} not queued: {}", game_id, player_id, e);
                    }
                }
                Err(e) => warn!("Poll of {}/{} failed: {}", game_id, player_id, e),
            }
        }
    }
}

/// Classify a record against the previously cached one
///
/// No previous record is a full sync. A changed asset set wins over new
/// achievements, which win over plain statistics changes.
pub fn infer_update_type(
    previous: Option<&StandardizedGameData>,
    current: &StandardizedGameData,
) -> UpdateType {
    let Some(previous) = previous else {
        return UpdateType::FullSync;
    };

    let holdings = |data: &StandardizedGameData| -> BTreeSet<(String, String, String)> {
        data.assets
            .iter()
            .map(|a| (a.id.clone(), a.token_id.clone(), a.owner.clone()))
            .collect()
    };
    if holdings(previous) != holdings(current) {
        return UpdateType::AssetChange;
    }

    let earned: HashSet<&str> = previous.achievements.iter().map(|a| a.id.as_str()).collect();
    if current
        .achievements
        .iter()
        .any(|a| !earned.contains(a.id.as_str()))
    {
        return UpdateType::AchievementEarned;
    }

    UpdateType::StatsUpdate
}

async fn run_registry_listener(
    engine: Weak<SyncEngine>,
    mut events: broadcast::Receiver<RegistryEvent>,
    mut stop: StopSignal,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = stop.requested() => break,
            received = events.recv() => received,
        };
        let event = match received {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Registry listener lagged, skipped {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.handle_registry_event(event).await;
    }
}

async fn run_flush_timer(engine: Weak<SyncEngine>, period: Duration, mut stop: StopSignal) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.requested() => break,
            _ = ticker.tick() => {}
        }
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.flush_pending().await;
    }
}

async fn run_push_ingest(
    engine: Weak<SyncEngine>,
    game_id: String,
    mut updates: mpsc::Receiver<StandardizedGameData>,
    mut stop: StopSignal,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = stop.requested() => return,
            received = updates.recv() => received,
        };
        let Some(data) = received else {
            break;
        };
        let Some(engine) = engine.upgrade() else {
            return;
        };
        if let Err(e) = engine.submit(data, UpdateSource::Live).await {
            debug!("Pushed update from {} not queued: {}", game_id, e);
        }
    }

    // The adapter dropped its sender
    if let Some(engine) = engine.upgrade() {
        engine.push_stream_ended(&game_id).await;
    }
}

async fn run_poll_ingest(
    engine: Weak<SyncEngine>,
    game_id: String,
    period: Duration,
    mut stop: StopSignal,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.requested() => break,
            _ = ticker.tick() => {}
        }
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.poll_source(&game_id).await;
    }
}

/// Restart push sources whose streams ended, one backoff schedule per source
async fn run_resubscriber(
    engine: Weak<SyncEngine>,
    mut ended: mpsc::UnboundedReceiver<String>,
    config: SyncConfig,
    mut stop: StopSignal,
) {
    let mut pending = FuturesUnordered::new();
    loop {
        tokio::select! {
            biased;
            _ = stop.requested() => break,
            game_id = ended.recv() => match game_id {
                Some(game_id) => pending.push(resubscribe(
                    engine.clone(),
                    game_id,
                    config.clone(),
                    stop.clone(),
                )),
                None => break,
            },
            Some(()) = pending.next(), if !pending.is_empty() => {}
        }
    }

    // Each one returns at its next wait, a start in progress completes
    while pending.next().await.is_some() {}
}

async fn resubscribe(
    engine: Weak<SyncEngine>,
    game_id: String,
    config: SyncConfig,
    mut stop: StopSignal,
) {
    for attempt in 0..config.max_resubscribe_attempts {
        let delay = config.resubscribe_backoff(attempt);
        info!(
            "Resubscribing {} in {}ms (attempt {})",
            game_id,
            delay.as_millis(),
            attempt + 1
        );
        tokio::select! {
            biased;
            _ = stop.requested() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(engine) = engine.upgrade() else {
            return;
        };
        // Restarted or stopped by someone else, or inactive or unhealthy and
        // left to registry events
        if !engine.is_running()
            || engine.source_state(&game_id) != Some(SourceState::Stopped)
            || !engine.should_ingest(&game_id).await
        {
            return;
        }

        match engine.start_source(&game_id).await {
            Ok(()) => return,
            Err(e) => warn!("Resubscribe of {} failed: {}", game_id, e),
        }
    }

    error!(
        "Giving up on {} after {} resubscribe attempts",
        game_id, config.max_resubscribe_attempts
    );
}
