mod common;

use common::*;
use serde_json::Value;
use std::time::Duration;
use sync_service::broker::{player_channel, player_channel_pattern, Broker};
use sync_service::{ProcessOutcome, SourceState, SyncError, SyncEvent};
use sync_types::{HealthStatus, UpdateSource, UpdateType};
use tokio::time::timeout;

#[tokio::test]
async fn test_batch_flush_on_size_and_timer() {
    let mut config = test_config();
    config.sync.batch_interval_ms = 400;
    let (core, _broker) = core_with(config);
    register(&core, StubAdapter::polled("game-a")).await;
    register(&core, StubAdapter::polled("game-b")).await;
    core.start().await;
    let mut events = core.engine().subscribe_events();

    for i in 1..=5 {
        let player = format!("p{}", i);
        let outcome = core
            .process_game_data_update(&player, "game-a", record(&player, "game-a"), UpdateSource::Manual)
            .await;
        assert!(outcome.is_accepted(), "{:?}", outcome);
    }

    // Third submission crossed the batch size
    assert_eq!(core.engine().queue_depth(), 2);
    assert_eq!(core.engine().metrics().batches_flushed, 1);
    assert!(core.get_cached_game_data("p1", "game-a").await.is_some());
    assert!(core.get_cached_game_data("p4", "game-a").await.is_none());

    let engine = core.engine().clone();
    assert!(eventually(|| engine.queue_depth() == 0).await);
    assert!(core.get_cached_game_data("p5", "game-a").await.is_some());

    let mut flushed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::BatchFlushed { size } = event {
            flushed.push(size);
        }
    }
    assert_eq!(flushed, vec![3, 2]);

    core.shutdown().await;
}

#[tokio::test]
async fn test_subscription_filters_by_game() {
    let (core, _broker) = core_with(test_config());
    register(&core, StubAdapter::polled("game-a")).await;
    register(&core, StubAdapter::polled("game-b")).await;
    core.start().await;

    let mut handle = core
        .subscribe_to_player("p1", Some(vec!["game-a".to_string()]))
        .await
        .unwrap();

    core.process_game_data_update("p1", "game-b", record("p1", "game-b"), UpdateSource::Manual)
        .await;
    core.process_game_data_update("p1", "game-a", record("p1", "game-a"), UpdateSource::Manual)
        .await;
    core.engine().flush_pending().await;

    let update = timeout(Duration::from_secs(2), handle.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.game_id, "game-a");
    assert_eq!(update.update_type, UpdateType::FullSync);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.try_recv().is_none());

    assert!(core.unsubscribe_from_player("p1").await);
    assert!(!core.unsubscribe_from_player("p1").await);
    core.shutdown().await;
}

#[tokio::test]
async fn test_missing_game_id_scores_zero() {
    let (core, _broker) = core_with(test_config());
    core.start().await;

    let outcome = core
        .process_game_data_update("p1", "", record("p1", ""), UpdateSource::Manual)
        .await;
    match outcome {
        ProcessOutcome::Rejected { validation } => {
            assert_eq!(validation.score, 0);
            assert!(validation.has_error("MISSING_GAME_ID"));
            assert!(validation.critical_count() >= 1);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(core.engine().queue_depth(), 0);
    core.shutdown().await;
}

#[tokio::test]
async fn test_future_achievement_is_rejected() {
    let (core, _broker) = core_with(test_config());
    core.start().await;
    let mut events = core.engine().subscribe_events();

    let mut future = achievement("p1", "game-a", "ach-1");
    future.earned_at = chrono::Utc::now() + chrono::Duration::days(1);
    let data = record("p1", "game-a").with_achievement(future);

    let outcome = core
        .process_game_data_update("p1", "game-a", data, UpdateSource::Manual)
        .await;
    let ProcessOutcome::Rejected { validation } = outcome else {
        panic!("expected rejection");
    };
    assert!(validation.has_error("FUTURE_ACHIEVEMENT"));

    match events.try_recv().unwrap() {
        SyncEvent::ValidationFailed { player_id, errors, .. } => {
            assert_eq!(player_id, "p1");
            assert!(errors.contains(&"FUTURE_ACHIEVEMENT".to_string()));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(core.engine().metrics().updates_rejected, 1);
    core.shutdown().await;
}

#[tokio::test]
async fn test_mismatched_request_fails() {
    let (core, _broker) = core_with(test_config());
    core.start().await;

    let outcome = core
        .process_game_data_update("p2", "game-a", record("p1", "game-a"), UpdateSource::Manual)
        .await;
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }));
    core.shutdown().await;
}

#[tokio::test]
async fn test_queue_full_drops_update() {
    let mut config = test_config();
    config.sync.batch_size = 10;
    config.sync.max_queue_size = 2;
    let (core, _broker) = core_with(config);
    core.start().await;
    let engine = core.engine();
    let mut events = engine.subscribe_events();

    engine.submit(record("p1", "game-a"), UpdateSource::Manual).await.unwrap();
    engine.submit(record("p2", "game-a"), UpdateSource::Manual).await.unwrap();
    let result = engine.submit(record("p3", "game-a"), UpdateSource::Manual).await;
    assert!(matches!(result, Err(SyncError::QueueFull { max: 2 })));
    assert_eq!(engine.queue_depth(), 2);
    assert_eq!(engine.metrics().queue_full_rejections, 1);

    let mut saw_full = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::QueueFull { player_id, depth, .. } = event {
            assert_eq!(player_id, "p3");
            assert_eq!(depth, 2);
            saw_full = true;
        }
    }
    assert!(saw_full);
    core.shutdown().await;
}

#[tokio::test]
async fn test_failed_flush_requeues_batch() {
    let mut config = test_config();
    config.sync.batch_size = 10;
    let (core, broker) = core_with(config);
    core.start().await;
    let engine = core.engine();
    let mut events = engine.subscribe_events();

    engine.submit(record("p1", "game-a"), UpdateSource::Manual).await.unwrap();
    engine.submit(record("p2", "game-a"), UpdateSource::Manual).await.unwrap();

    broker.close().await.unwrap();
    assert!(matches!(engine.flush().await, Err(SyncError::BrokerClosed)));
    assert_eq!(engine.queue_depth(), 2);
    assert_eq!(engine.metrics().flush_failures, 1);

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::FlushFailed { size, .. } = event {
            failed = Some(size);
        }
    }
    assert_eq!(failed, Some(2));
    core.shutdown().await;
}

#[tokio::test]
async fn test_sources_follow_registry_events() {
    let (core, _broker) = core_with(test_config());
    core.start().await;
    let engine = core.engine().clone();

    // Non-manual input needs a running source
    let result = engine.submit(record("p1", "game-a"), UpdateSource::Poll).await;
    assert!(matches!(result, Err(SyncError::SourceNotRunning { .. })));

    register(&core, StubAdapter::polled("game-a")).await;
    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Running)).await);

    core.registry().set_adapter_active("game-a", false).await.unwrap();
    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Stopped)).await);

    core.registry().set_adapter_active("game-a", true).await.unwrap();
    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Running)).await);

    core.registry().unregister_adapter("game-a").await.unwrap();
    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Stopped)).await);
    core.shutdown().await;
}

#[tokio::test]
async fn test_push_source_ingests_and_watches_players() {
    let mut config = test_config();
    config.sync.batch_size = 1;
    let (core, _broker) = core_with(config);
    let adapter = StubAdapter::live("game-a");
    register(&core, adapter.clone()).await;
    core.start().await;

    assert!(eventually(|| adapter.is_subscribed()).await);
    let _handle = core.subscribe_to_player("p7", None).await.unwrap();
    assert_eq!(adapter.watched.lock().clone(), vec!["p7".to_string()]);

    adapter.push(record("p7", "game-a")).await;

    let mut cached = None;
    for _ in 0..200 {
        cached = core.get_cached_game_data("p7", "game-a").await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cached.unwrap().player_id, "p7");

    core.unsubscribe_from_player("p7").await;
    assert!(adapter.watched.lock().is_empty());

    core.shutdown().await;
    assert!(!adapter.is_subscribed());
}

#[tokio::test]
async fn test_update_type_follows_cached_state() {
    let mut config = test_config();
    config.sync.batch_size = 1;
    let (core, _broker) = core_with(config);
    register(&core, StubAdapter::polled("game-a")).await;
    core.start().await;

    let first = core
        .process_game_data_update("p1", "game-a", record("p1", "game-a"), UpdateSource::Manual)
        .await;
    assert!(matches!(first, ProcessOutcome::Accepted { update_type: UpdateType::FullSync, .. }));

    let earned = record("p1", "game-a").with_achievement(achievement("p1", "game-a", "ach-1"));
    let second = core
        .process_game_data_update("p1", "game-a", earned, UpdateSource::Manual)
        .await;
    assert!(matches!(
        second,
        ProcessOutcome::Accepted { update_type: UpdateType::AchievementEarned, .. }
    ));

    let mut stats = record("p1", "game-a").with_achievement(achievement("p1", "game-a", "ach-1"));
    stats.statistics.level = 6;
    let third = core
        .process_game_data_update("p1", "game-a", stats, UpdateSource::Manual)
        .await;
    assert!(matches!(third, ProcessOutcome::Accepted { update_type: UpdateType::StatsUpdate, .. }));
    core.shutdown().await;
}

#[tokio::test]
async fn test_warm_up_cache_uses_adapter() {
    let (core, _broker) = core_with(test_config());
    register(&core, StubAdapter::polled("game-a")).await;
    core.start().await;

    let players = vec!["p1".to_string(), "p2".to_string()];
    let report = core.warm_up_cache("game-a", &players).await.unwrap();
    assert_eq!(report.loaded, 2);
    assert!(report.failed.is_empty());

    let cached = core.get_cached_game_data("p2", "game-a").await.unwrap();
    assert_eq!(cached.statistics.level, 3);

    assert!(core.warm_up_cache("game-z", &players).await.is_err());
    core.shutdown().await;
}

#[tokio::test]
async fn test_health_reflects_lifecycle() {
    let (core, _broker) = core_with(test_config());
    register(&core, StubAdapter::polled("game-a")).await;
    core.start().await;

    let report = core.get_health_status().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.engine_running);
    assert_eq!(report.adapters.total, 1);

    let metrics = core.get_metrics().await;
    assert_eq!(metrics.sources_running, 1);

    core.shutdown().await;
    let report = core.get_health_status().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.engine_running);
}

#[tokio::test]
async fn test_stopped_engine_refuses_updates() {
    let (core, _broker) = core_with(test_config());
    let outcome = core
        .process_game_data_update("p1", "game-a", record("p1", "game-a"), UpdateSource::Manual)
        .await;
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_shutdown_publishes_queued_updates() {
    let mut config = test_config();
    config.sync.batch_size = 10;
    let prefix = config.broker.channel_prefix.clone();
    let (core, broker) = core_with(config);
    core.start().await;
    let mut published = broker.psubscribe(&player_channel_pattern(&prefix)).await.unwrap();

    for player in ["p1", "p2"] {
        let outcome = core
            .process_game_data_update(player, "game-a", record(player, "game-a"), UpdateSource::Manual)
            .await;
        assert!(outcome.is_accepted(), "{:?}", outcome);
    }
    // Below the batch size with a one minute timer, nothing went out yet
    assert_eq!(core.engine().queue_depth(), 2);
    assert_eq!(core.engine().metrics().batches_flushed, 0);

    core.shutdown().await;

    assert_eq!(core.engine().queue_depth(), 0);
    assert_eq!(core.engine().metrics().updates_published, 2);
    let mut players = Vec::new();
    while let Some(message) = published.recv().await {
        let update: Value = serde_json::from_str(&message.payload).unwrap();
        players.push(update["playerId"].as_str().unwrap().to_string());
    }
    assert_eq!(players, vec!["p1", "p2"]);
    assert!(core.get_cached_game_data("p2", "game-a").await.is_some());
}

#[tokio::test]
async fn test_shutdown_waits_for_flush_in_progress() {
    let mut config = test_config();
    config.sync.batch_interval_ms = 20;
    let prefix = config.broker.channel_prefix.clone();
    let broker = SlowBroker::new(Duration::from_millis(300));
    let core = core_with_broker(config, broker.clone());
    core.start().await;
    let mut published = broker.inner.subscribe(&player_channel(&prefix, "p1")).await.unwrap();

    let outcome = core
        .process_game_data_update("p1", "game-a", record("p1", "game-a"), UpdateSource::Manual)
        .await;
    assert!(outcome.is_accepted(), "{:?}", outcome);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The timer took the batch and is still publishing it
    assert_eq!(core.engine().queue_depth(), 0);
    assert_eq!(core.engine().metrics().updates_published, 0);

    core.shutdown().await;

    assert_eq!(core.engine().metrics().updates_published, 1);
    assert_eq!(core.engine().queue_depth(), 0);
    let message = published.recv().await.expect("update was not published");
    assert_eq!(message.channel, player_channel(&prefix, "p1"));
}

#[tokio::test]
async fn test_cancelled_flush_requeues_batch() {
    let mut config = test_config();
    config.sync.batch_size = 10;
    let broker = SlowBroker::new(Duration::from_millis(200));
    let core = core_with_broker(config, broker);
    core.start().await;
    let engine = core.engine();

    engine.submit(record("p1", "game-a"), UpdateSource::Manual).await.unwrap();
    engine.submit(record("p2", "game-a"), UpdateSource::Manual).await.unwrap();

    assert!(timeout(Duration::from_millis(50), engine.flush()).await.is_err());
    assert_eq!(engine.queue_depth(), 2);
    assert_eq!(engine.metrics().batches_flushed, 0);

    core.shutdown().await;
    assert_eq!(engine.queue_depth(), 0);
    assert_eq!(engine.metrics().updates_published, 2);
}

#[tokio::test]
async fn test_stopping_source_mid_flush_keeps_update() {
    let mut config = test_config();
    config.sync.batch_size = 1;
    let broker = SlowBroker::new(Duration::from_millis(300));
    let core = core_with_broker(config, broker);
    let adapter = StubAdapter::live("game-a");
    register(&core, adapter.clone()).await;
    core.start().await;
    let engine = core.engine().clone();
    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Running)).await);

    adapter.push(record("p1", "game-a")).await;
    // Ingest is publishing the size-triggered batch when the adapter goes away
    tokio::time::sleep(Duration::from_millis(100)).await;
    core.registry().set_adapter_active("game-a", false).await.unwrap();

    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Stopped)).await);
    assert_eq!(engine.metrics().updates_published, 1);
    assert_eq!(engine.queue_depth(), 0);
    core.shutdown().await;
}

#[tokio::test]
async fn test_ended_push_stream_stops_then_resubscribes() {
    let mut config = test_config();
    config.sync.batch_size = 1;
    let (core, _broker) = core_with(config);
    let adapter = StubAdapter::live("game-a");
    register(&core, adapter.clone()).await;
    core.start().await;
    let engine = core.engine().clone();
    assert!(eventually(|| engine.source_state("game-a") == Some(SourceState::Running)).await);
    let mut events = engine.subscribe_events();

    adapter.end_stream();

    let stopped = timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::SourceStateChanged {
                    game_id,
                    previous: SourceState::Running,
                    current: SourceState::Stopped,
                }) if game_id == "game-a" => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {:?}", e),
            }
        }
    })
    .await;
    assert!(stopped.is_ok(), "source stayed RUNNING after its stream ended");

    assert!(
        eventually(|| adapter.is_subscribed()
            && engine.source_state("game-a") == Some(SourceState::Running))
        .await
    );

    adapter.push(record("p3", "game-a")).await;
    let mut cached = None;
    for _ in 0..200 {
        cached = core.get_cached_game_data("p3", "game-a").await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cached.unwrap().player_id, "p3");

    core.shutdown().await;
    assert!(!adapter.is_subscribed());
}
