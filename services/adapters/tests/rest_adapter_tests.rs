use adapter_service::{AdapterError, AdapterFeature, RestGameAdapter, SourceAdapter};
use futures_util::{SinkExt, StreamExt};
use mockito::Server;
use serde_json::{json, Value};
use std::time::Duration;
use sync_config::AdapterConfig;
use sync_types::{AssetType, GameAsset, Rarity};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

fn adapter(url: &str) -> RestGameAdapter {
    let mut config = AdapterConfig::new("game-a", "Game A", url);
    config.api_key = Some("secret".to_string());
    RestGameAdapter::new(&config).unwrap()
}

fn player_body() -> String {
    json!({
        "playerId": "p1",
        "level": 7,
        "experience": 1200,
        "playtimeSeconds": 3600,
        "gamesPlayed": 10,
        "wins": 4,
        "kills": 99,
        "updatedAt": "2024-03-01T12:00:00Z",
        "inventory": [{
            "id": "sword-1",
            "tokenId": "42",
            "contract": "0xABCDEF",
            "type": "weapon",
            "name": "Sword"
        }],
        "achievements": [{
            "id": "ach-1",
            "type": "BOSS_KILL",
            "title": "Dragon Slayer",
            "rarity": "legendary",
            "unlockedAt": "2024-02-01T00:00:00Z"
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_fetch_and_normalize_player() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/players/p1")
        .match_header("x-api-key", "secret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(player_body())
        .create_async()
        .await;

    let adapter = adapter(&server.url());
    let raw = adapter.fetch_raw_player_data("p1").await.unwrap();
    let data = adapter.normalize(&raw).unwrap();
    mock.assert_async().await;

    assert_eq!(data.player_id, "p1");
    assert_eq!(data.game_id, "game-a");
    assert_eq!(data.statistics.level, 7);
    assert_eq!(data.statistics.total_playtime_secs, 3600);
    assert_eq!(data.statistics.extra.get("kills"), Some(&json!(99)));

    let asset = &data.assets[0];
    assert_eq!(asset.asset_type, AssetType::Item);
    assert_eq!(asset.contract_address, "0xabcdef");
    assert_eq!(asset.owner, "p1");
    assert_eq!(asset.game_id, "game-a");
    assert!(asset.tradeable);

    let achievement = &data.achievements[0];
    assert_eq!(achievement.rarity, Rarity::Legendary);
    assert_eq!(achievement.player_id, "p1");
    assert_eq!(data.last_updated.to_rfc3339(), "2024-03-01T12:00:00+00:00");
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/players/locked")
        .with_status(401)
        .create_async()
        .await;
    server
        .mock("GET", "/players/down")
        .with_status(503)
        .create_async()
        .await;
    server
        .mock("GET", "/players/gone")
        .with_status(404)
        .create_async()
        .await;

    let adapter = adapter(&server.url());

    assert!(matches!(
        adapter.fetch_raw_player_data("locked").await,
        Err(AdapterError::Auth(_))
    ));
    assert!(matches!(
        adapter.fetch_raw_player_data("down").await,
        Err(AdapterError::Network(_))
    ));
    assert!(matches!(
        adapter.fetch_raw_player_data("gone").await,
        Err(AdapterError::ExternalService(_))
    ));
}

#[tokio::test]
async fn test_malformed_payloads_are_data_integrity_errors() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/players/p1")
        .with_status(200)
        .with_body("{not json")
        .create_async()
        .await;

    let adapter = adapter(&server.url());
    assert!(matches!(
        adapter.fetch_raw_player_data("p1").await,
        Err(AdapterError::DataIntegrity(_))
    ));
    assert!(matches!(
        adapter.normalize(&json!({ "level": 3 })),
        Err(AdapterError::DataIntegrity(_))
    ));
}

#[tokio::test]
async fn test_asset_ownership_is_confirmed_upstream() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/assets/42")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "owner": "p1", "contractAddress": "0xABCDEF" }).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/assets/7")
        .with_status(404)
        .create_async()
        .await;

    let adapter = adapter(&server.url());
    let owned = GameAsset::new("sword-1", "game-a", "42", "0xabcdef", AssetType::Item, "p1");
    let stolen = GameAsset::new("sword-1", "game-a", "42", "0xabcdef", AssetType::Item, "p2");
    let missing = GameAsset::new("shield", "game-a", "7", "0xabcdef", AssetType::Item, "p1");

    assert!(adapter.validate_asset(&owned).await.unwrap());
    assert!(!adapter.validate_asset(&stolen).await.unwrap());
    assert!(!adapter.validate_asset(&missing).await.unwrap());
}

#[tokio::test]
async fn test_health_check_reports_upstream() {
    let mut server = Server::new_async().await;
    let health = server
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let adapter = adapter(&server.url());
    assert!(adapter.is_healthy().await);
    health.assert_async().await;

    health.remove_async().await;
    server
        .mock("GET", "/health")
        .with_status(500)
        .create_async()
        .await;
    assert!(!adapter.is_healthy().await);
}

#[tokio::test]
async fn test_push_requires_ws_endpoint() {
    let adapter = adapter("http://localhost:9");
    assert!(!adapter.features().contains(AdapterFeature::RealTimeUpdates));

    let (tx, _rx) = tokio::sync::mpsc::channel(1);
    assert!(matches!(
        adapter.subscribe_to_updates(tx).await,
        Err(AdapterError::NotSupported(_))
    ));

    // Watching without a stream only records the player
    adapter.watch_player("p1").await.unwrap();
    adapter.unwatch_player("p1").await.unwrap();
}

/// Local push upstream; each accepted connection hands the test a sender for
/// outbound frames and forwards every inbound text frame
struct Upstream {
    url: String,
    connections: mpsc::UnboundedReceiver<mpsc::UnboundedSender<Message>>,
    received: mpsc::UnboundedReceiver<String>,
}

async fn upstream(handshake_delay: Duration) -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (conn_tx, connections) = mpsc::unbounded_channel();
    let (frame_tx, received) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let (conn_tx, frame_tx) = (conn_tx.clone(), frame_tx.clone());
            tokio::spawn(async move {
                tokio::time::sleep(handshake_delay).await;
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                let _ = conn_tx.send(out_tx);

                loop {
                    tokio::select! {
                        outbound = out_rx.recv() => match outbound {
                            Some(Message::Close(frame)) => {
                                let _ = write.send(Message::Close(frame)).await;
                                break;
                            }
                            Some(message) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        inbound = read.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                let _ = frame_tx.send(text);
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                    }
                }
            });
        }
    });

    Upstream {
        url,
        connections,
        received,
    }
}

fn push_adapter(ws_url: &str) -> RestGameAdapter {
    let mut config = AdapterConfig::new("game-a", "Game A", "http://localhost:9");
    config.ws_endpoint = Some(ws_url.to_string());
    RestGameAdapter::new(&config).unwrap()
}

async fn next_control(upstream: &mut Upstream) -> Value {
    let text = timeout(Duration::from_secs(2), upstream.received.recv())
        .await
        .expect("no control frame in time")
        .expect("upstream gone");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_push_stream_forwards_watched_players() {
    let mut upstream = upstream(Duration::ZERO).await;
    let adapter = push_adapter(&upstream.url);
    adapter.watch_player("p1").await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    adapter.subscribe_to_updates(tx).await.unwrap();
    let conn = upstream.connections.recv().await.unwrap();

    let watch = next_control(&mut upstream).await;
    assert_eq!(watch["type"], "watch");
    assert_eq!(watch["playerId"], "p1");

    let unwatched = json!({ "playerId": "p2", "level": 9 }).to_string();
    conn.send(Message::Text(unwatched)).unwrap();
    conn.send(Message::Text(player_body())).unwrap();

    let data = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.player_id, "p1");
    assert_eq!(data.game_id, "game-a");

    adapter.unsubscribe_from_updates().await.unwrap();
}

#[tokio::test]
async fn test_ended_push_stream_can_be_resubscribed() {
    let mut upstream = upstream(Duration::ZERO).await;
    let adapter = push_adapter(&upstream.url);

    let (tx, mut rx) = mpsc::channel(8);
    adapter.subscribe_to_updates(tx).await.unwrap();
    let conn = upstream.connections.recv().await.unwrap();

    conn.send(Message::Close(None)).unwrap();
    // The reader drops the sink once the upstream is gone
    let closed = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert!(closed.is_none());

    let (tx, _rx) = mpsc::channel(8);
    adapter.subscribe_to_updates(tx).await.unwrap();
    let second = timeout(Duration::from_secs(2), upstream.connections.recv()).await;
    assert!(matches!(second, Ok(Some(_))), "no reconnect after the stream ended");

    adapter.unsubscribe_from_updates().await.unwrap();
}

#[tokio::test]
async fn test_slow_handshake_does_not_block_watch_calls() {
    let mut upstream = upstream(Duration::from_millis(400)).await;
    let adapter = std::sync::Arc::new(push_adapter(&upstream.url));

    let subscribing = {
        let adapter = adapter.clone();
        tokio::spawn(async move {
            let (tx, _rx) = mpsc::channel(8);
            adapter.subscribe_to_updates(tx).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Both calls finish while the upstream is still in its handshake
    timeout(Duration::from_millis(150), adapter.watch_player("p9"))
        .await
        .expect("watch waited on the connect")
        .unwrap();
    timeout(Duration::from_millis(150), adapter.unsubscribe_from_updates())
        .await
        .expect("unsubscribe waited on the connect")
        .unwrap();

    subscribing.await.unwrap().unwrap();
    let watch = next_control(&mut upstream).await;
    assert_eq!(watch["playerId"], "p9");

    adapter.unsubscribe_from_updates().await.unwrap();
}
