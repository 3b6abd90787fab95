//! Live WebSocket server
//!
//! Serves `/ws` for live clients plus `/health` and `/metrics` for
//! operators. Each connection runs one select loop multiplexing outbound
//! frames from the hub with inbound subscribe/unsubscribe/ping frames.

use super::{Client, ClientMessage, ServerMessage};
use crate::api::SyncCore;
use crate::error::{Result, SyncError};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use sync_config::LiveConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

pub struct LiveServer {
    config: LiveConfig,
    core: Arc<SyncCore>,
}

impl LiveServer {
    pub fn new(core: Arc<SyncCore>) -> Self {
        Self {
            config: core.config().live.clone(),
            core,
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| SyncError::Configuration {
                message: format!("Invalid bind address: {}", e),
            })?;

        let (bound, server) = warp::serve(routes(self.core.clone()))
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|e| SyncError::Live {
                message: format!("failed to bind {}: {}", addr, e),
            })?;
        info!("Live server listening on {}", bound);

        let heartbeat = self.start_heartbeat_task();
        server.await;
        heartbeat.abort();

        info!("Live server stopped");
        Ok(())
    }

    fn start_heartbeat_task(&self) -> JoinHandle<()> {
        let core = self.core.clone();
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let hub = core.hub();
                let client_count = hub.client_count().await;
                if client_count == 0 {
                    continue;
                }
                hub.broadcast(&ServerMessage::Heartbeat {
                    timestamp: Utc::now().timestamp_millis(),
                    client_count,
                })
                .await;
                debug!("Sent heartbeat to {} clients", client_count);
            }
        })
    }
}

fn with_core(
    core: Arc<SyncCore>,
) -> impl Filter<Extract = (Arc<SyncCore>,), Error = Infallible> + Clone {
    warp::any().map(move || core.clone())
}

/// All HTTP and WebSocket routes, usable with `warp::test`
pub fn routes(
    core: Arc<SyncCore>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_core(core.clone()))
        .map(|ws: Ws, core: Arc<SyncCore>| {
            let max_payload = core.config().live.max_payload_bytes;
            ws.max_message_size(max_payload)
                .on_upgrade(move |socket| handle_connection(core, socket))
        });

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_core(core.clone()))
        .and_then(|core: Arc<SyncCore>| async move {
            let report = core.get_health_status().await;
            let status = if report.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok::<_, Rejection>(warp::reply::with_status(warp::reply::json(&report), status))
        });

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_core(core))
        .and_then(|core: Arc<SyncCore>| async move {
            let metrics = core.get_metrics().await;
            Ok::<_, Rejection>(warp::reply::json(&metrics))
        });

    ws_route.or(health_route).or(metrics_route)
}

async fn handle_connection(core: Arc<SyncCore>, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client = Client::new(tx);
    let client_id = client.id;

    if let Err(e) = core.hub().add_client(client).await {
        warn!("Refusing live connection: {}", e);
        if let Ok(text) = serde_json::to_string(&ServerMessage::Error {
            message: e.to_string(),
        }) {
            let _ = ws_sender.send(Message::text(text)).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if let Err(e) = ws_sender.send(Message::text(text)).await {
                            warn!("Failed to send to live client {}: {}", client_id, e);
                            break;
                        }
                    }
                    None => {
                        debug!("Outbound channel closed for client {}", client_id);
                        break;
                    }
                }
            }

            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        if message.is_close() {
                            debug!("Client {} closed the connection", client_id);
                            break;
                        }
                        if let Ok(text) = message.to_str() {
                            handle_frame(&core, client_id, text).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for client {}: {}", client_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    disconnect(&core, client_id).await;
}

async fn handle_frame(core: &SyncCore, client_id: Uuid, text: &str) {
    let hub = core.hub();
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { player_id }) if player_id.is_empty() => {
            hub.send_to_client(
                client_id,
                &ServerMessage::Error {
                    message: "playerId must not be empty".to_string(),
                },
            )
            .await
        }
        Ok(ClientMessage::Subscribe { player_id }) => match hub.subscribe(client_id, &player_id).await {
            Ok(first) => {
                if first {
                    core.engine().follow_player(&player_id).await;
                }
                debug!("Client {} follows {}", client_id, player_id);
                hub.send_to_client(client_id, &ServerMessage::Subscribed { player_id: &player_id })
                    .await
            }
            Err(e) => Err(e),
        },
        Ok(ClientMessage::Unsubscribe { player_id }) => {
            if hub.unsubscribe(client_id, &player_id).await {
                core.engine().unfollow_player(&player_id).await;
            }
            hub.send_to_client(
                client_id,
                &ServerMessage::Unsubscribed {
                    player_id: &player_id,
                },
            )
            .await
        }
        Ok(ClientMessage::Ping) => hub.send_to_client(client_id, &ServerMessage::Pong).await,
        Err(e) => {
            hub.send_to_client(
                client_id,
                &ServerMessage::Error {
                    message: format!("invalid message: {}", e),
                },
            )
            .await
        }
    };

    if let Err(e) = reply {
        debug!("Could not answer client {}: {}", client_id, e);
    }
}

/// Drop the client and release players nobody else follows
async fn disconnect(core: &SyncCore, client_id: Uuid) {
    let hub = core.hub();
    for player_id in hub.remove_client(client_id).await {
        if !hub.is_followed(&player_id).await {
            core.engine().unfollow_player(&player_id).await;
        }
    }
}
