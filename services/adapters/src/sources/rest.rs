//! HTTP game backend with an optional WebSocket push stream
//!
//! Expected upstream surface:
//!
//! - `GET {api}/players/{id}` returns a [`RawPlayer`] document
//! - `GET {api}/assets/{tokenId}` returns `{"owner": "...", "contractAddress": "..."}`
//! - `GET {api}/health` answers 2xx while the backend is serving
//! - `{ws}` streams [`RawPlayer`] documents as text frames; the adapter sends
//!   `{"type":"watch","playerId":"..."}` / `{"type":"unwatch",...}` to pick players

use crate::source::{AdapterFeature, FeatureSet, SourceAdapter};
use crate::{AdapterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_config::AdapterConfig;
use sync_types::{
    Achievement, AssetMetadata, AssetType, GameAsset, PlayerStatistics, Rarity,
    StandardizedGameData,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const API_KEY_HEADER: &str = "x-api-key";

/// Player document served by the upstream
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlayer {
    pub player_id: String,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default)]
    pub experience: i64,
    #[serde(default)]
    pub playtime_seconds: i64,
    #[serde(default)]
    pub games_played: i64,
    #[serde(default)]
    pub wins: i64,
    #[serde(default)]
    pub inventory: Vec<RawItem>,
    #[serde(default)]
    pub achievements: Vec<RawAchievement>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Anything else is kept as game-specific statistics
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_level() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub id: String,
    pub token_id: String,
    pub contract: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default = "default_tradeable")]
    pub tradeable: bool,
}

fn default_tradeable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAchievement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub rarity: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOwnership {
    owner: String,
    contract_address: Option<String>,
}

fn asset_type(kind: &str) -> AssetType {
    match kind.to_ascii_lowercase().as_str() {
        "character" | "hero" => AssetType::Character,
        "item" | "weapon" | "armor" => AssetType::Item,
        "currency" | "token" => AssetType::Currency,
        "land" | "plot" => AssetType::Land,
        "cosmetic" | "skin" => AssetType::Cosmetic,
        _ => AssetType::Other,
    }
}

fn rarity(name: &str) -> Rarity {
    match name.to_ascii_lowercase().as_str() {
        "rare" => Rarity::Rare,
        "epic" => Rarity::Epic,
        "legendary" => Rarity::Legendary,
        _ => Rarity::Common,
    }
}

struct PushStream {
    id: u64,
    writer: Arc<Mutex<SplitSink<WsStream, Message>>>,
    reader: JoinHandle<()>,
}

/// Installed push stream; the lock is never held across I/O
type PushSlot = Arc<SyncMutex<Option<PushStream>>>;

/// Reference adapter for backends exposing the REST surface above
pub struct RestGameAdapter {
    game_id: String,
    name: String,
    api_endpoint: String,
    ws_endpoint: Option<String>,
    api_key: Option<String>,
    features: FeatureSet,
    client: reqwest::Client,
    watched: Arc<RwLock<HashSet<String>>>,
    push: PushSlot,
    next_stream_id: AtomicU64,
}

impl RestGameAdapter {
    pub fn new(config: &AdapterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AdapterError::BusinessLogic(format!("HTTP client setup failed: {}", e)))?;

        let mut features = FeatureSet::new(&[
            AdapterFeature::AssetValidation,
            AdapterFeature::Achievements,
            AdapterFeature::Statistics,
        ]);
        if config.ws_endpoint.is_some() {
            features.insert(AdapterFeature::RealTimeUpdates);
        }

        Ok(Self {
            game_id: config.game_id.clone(),
            name: config.name.clone(),
            api_endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            ws_endpoint: config.ws_endpoint.clone(),
            api_key: config.api_key.clone(),
            features,
            client,
            watched: Arc::new(RwLock::new(HashSet::new())),
            push: Arc::new(SyncMutex::new(None)),
            next_stream_id: AtomicU64::new(1),
        })
    }

    async fn send(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.api_endpoint, path);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        request.send().await.map_err(transport_error)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let response = self.send(path).await?;
        check_status(response).await
    }

    /// Normalize an already-parsed upstream document
    pub fn normalize_player(&self, raw: RawPlayer) -> StandardizedGameData {
        normalize_with(&self.game_id, raw)
    }

    async fn send_control(&self, kind: &str, player_id: &str) -> Result<()> {
        let writer = match self.push.lock().as_ref() {
            Some(stream) => stream.writer.clone(),
            None => return Ok(()),
        };

        let frame = json!({ "type": kind, "playerId": player_id }).to_string();
        writer.lock().await.send(Message::Text(frame)).await?;
        Ok(())
    }
}

fn transport_error(error: reqwest::Error) -> AdapterError {
    if error.is_timeout() {
        AdapterError::Network(format!("request timed out: {}", error))
    } else if error.is_decode() {
        AdapterError::DataIntegrity(error.to_string())
    } else {
        AdapterError::Network(error.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("HTTP {}: {}", status, body.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterError::Auth(detail),
        s if s.is_server_error() => AdapterError::Network(detail),
        _ => AdapterError::ExternalService(detail),
    })
}

#[async_trait]
impl SourceAdapter for RestGameAdapter {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> &FeatureSet {
        &self.features
    }

    async fn fetch_raw_player_data(&self, player_id: &str) -> Result<Value> {
        let response = self.get(&format!("players/{}", player_id)).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AdapterError::DataIntegrity(format!("player {} payload is not JSON: {}", player_id, e))
        })
    }

    fn normalize(&self, raw: &Value) -> Result<StandardizedGameData> {
        let parsed: RawPlayer = serde_json::from_value(raw.clone())
            .map_err(|e| AdapterError::DataIntegrity(format!("unexpected player payload: {}", e)))?;
        Ok(self.normalize_player(parsed))
    }

    async fn subscribe_to_updates(&self, sink: mpsc::Sender<StandardizedGameData>) -> Result<()> {
        let Some(url) = self.ws_endpoint.clone() else {
            return Err(AdapterError::NotSupported(format!(
                "{} has no push endpoint",
                self.game_id
            )));
        };

        if self.push.lock().is_some() {
            return Ok(());
        }

        let (stream, _) = connect_async(url.as_str()).await?;
        let (writer, reader) = stream.split();
        let writer = Arc::new(Mutex::new(writer));
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);

        // The reader starts under the slot lock, so it cannot end before its
        // stream is installed
        let installed = {
            let mut push = self.push.lock();
            if push.is_some() {
                false
            } else {
                let reader = tokio::spawn(read_push_frames(
                    id,
                    self.game_id.clone(),
                    reader,
                    sink,
                    self.watched.clone(),
                    self.push.clone(),
                ));
                *push = Some(PushStream {
                    id,
                    writer: writer.clone(),
                    reader,
                });
                true
            }
        };
        if !installed {
            debug!("Dropping duplicate push connection for {}", self.game_id);
            let _ = writer.lock().await.close().await;
            return Ok(());
        }

        // Replayed after install, so a concurrent watch is never missed
        let pending: Vec<String> = self.watched.read().iter().cloned().collect();
        for player_id in pending {
            let frame = json!({ "type": "watch", "playerId": player_id }).to_string();
            writer.lock().await.send(Message::Text(frame)).await?;
        }

        info!("Subscribed to push updates for {}", self.game_id);
        Ok(())
    }

    async fn unsubscribe_from_updates(&self) -> Result<()> {
        let Some(stream) = self.push.lock().take() else {
            return Ok(());
        };

        stream.reader.abort();
        let result = stream.writer.lock().await.close().await;
        info!("Unsubscribed from push updates for {}", self.game_id);
        result.map_err(AdapterError::from)
    }

    async fn watch_player(&self, player_id: &str) -> Result<()> {
        self.watched.write().insert(player_id.to_string());
        self.send_control("watch", player_id).await
    }

    async fn unwatch_player(&self, player_id: &str) -> Result<()> {
        self.watched.write().remove(player_id);
        self.send_control("unwatch", player_id).await
    }

    async fn validate_asset(&self, asset: &GameAsset) -> Result<bool> {
        let response = self.send(&format!("assets/{}", asset.token_id)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let response = check_status(response).await?;

        let ownership: RawOwnership = response
            .json()
            .await
            .map_err(|e| AdapterError::DataIntegrity(format!("bad ownership payload: {}", e)))?;

        let contract_matches = ownership
            .contract_address
            .map(|address| address.eq_ignore_ascii_case(&asset.contract_address))
            .unwrap_or(true);
        Ok(ownership.owner == asset.owner && contract_matches)
    }

    async fn is_healthy(&self) -> bool {
        match self.get("health").await {
            Ok(_) => true,
            Err(e) => {
                debug!("Health check for {} failed: {}", self.game_id, e);
                false
            }
        }
    }
}

/// Forward watched players' frames until the upstream or the sink goes away,
/// then release stream `id` from the slot
async fn read_push_frames(
    id: u64,
    game_id: String,
    mut reader: SplitStream<WsStream>,
    sink: mpsc::Sender<StandardizedGameData>,
    watched: Arc<RwLock<HashSet<String>>>,
    slot: PushSlot,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Push stream for {} failed: {}", game_id, e);
                break;
            }
        };

        let raw: RawPlayer = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Dropping malformed push frame from {}: {}", game_id, e);
                continue;
            }
        };

        if !watched.read().contains(&raw.player_id) {
            continue;
        }

        if sink.send(normalize_with(&game_id, raw)).await.is_err() {
            debug!("Push sink for {} closed", game_id);
            break;
        }
    }

    let ended = {
        let mut slot = slot.lock();
        match slot.as_ref() {
            Some(stream) if stream.id == id => slot.take(),
            _ => None,
        }
    };
    // Dropping our own handle only detaches this task
    drop(ended);
    info!("Push stream for {} ended", game_id);
}

fn normalize_with(game_id: &str, raw: RawPlayer) -> StandardizedGameData {
    let player_id = raw.player_id;

    StandardizedGameData {
        assets: raw
            .inventory
            .into_iter()
            .map(|item| GameAsset {
                id: item.id,
                game_id: game_id.to_string(),
                token_id: item.token_id,
                contract_address: item.contract.to_ascii_lowercase(),
                asset_type: asset_type(&item.kind),
                metadata: AssetMetadata {
                    name: item.name,
                    description: item.description,
                    image_url: item.image,
                    attributes: item.attributes,
                },
                owner: player_id.clone(),
                tradeable: item.tradeable,
            })
            .collect(),
        achievements: raw
            .achievements
            .into_iter()
            .map(|raw| Achievement {
                id: raw.id,
                game_id: game_id.to_string(),
                player_id: player_id.clone(),
                achievement_type: raw.kind,
                title: raw.title,
                description: raw.description,
                rarity: rarity(&raw.rarity),
                earned_at: raw.unlocked_at,
            })
            .collect(),
        statistics: PlayerStatistics {
            level: raw.level,
            experience: raw.experience,
            total_playtime_secs: raw.playtime_seconds,
            games_played: raw.games_played,
            wins: raw.wins,
            extra: raw.extra,
        },
        last_updated: raw.updated_at.unwrap_or_else(Utc::now),
        game_id: game_id.to_string(),
        player_id,
    }
}
