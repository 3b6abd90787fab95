//! Update envelope carried from ingestion to subscribers

use crate::StandardizedGameData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What changed in the player's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    AssetChange,
    AchievementEarned,
    StatsUpdate,
    FullSync,
}

impl UpdateType {
    /// Name used as a cache invalidation trigger
    pub fn as_trigger(&self) -> &'static str {
        match self {
            UpdateType::AssetChange => "ASSET_CHANGE",
            UpdateType::AchievementEarned => "ACHIEVEMENT_EARNED",
            UpdateType::StatsUpdate => "STATS_UPDATE",
            UpdateType::FullSync => "FULL_SYNC",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_trigger())
    }
}

/// How the update entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateSource {
    /// Pushed by an adapter's upstream connection
    Live,
    /// Fetched by the engine's polling loop
    Poll,
    /// Submitted by an external caller
    Manual,
}

/// Envelope published to broker channels and live connections
///
/// Delivery is at-least-once; consumers deduplicate on [`GameDataUpdate::idempotency_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDataUpdate {
    pub player_id: String,
    pub game_id: String,
    pub data: StandardizedGameData,
    pub update_type: UpdateType,
    pub timestamp: DateTime<Utc>,
    pub source: UpdateSource,
}

impl GameDataUpdate {
    pub fn new(data: StandardizedGameData, update_type: UpdateType, source: UpdateSource) -> Self {
        Self {
            player_id: data.player_id.clone(),
            game_id: data.game_id.clone(),
            data,
            update_type,
            timestamp: Utc::now(),
            source,
        }
    }

    /// `(player, game, timestamp)` identity used for duplicate suppression
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.player_id,
            self.game_id,
            self.timestamp.timestamp_nanos_opt().unwrap_or_default()
        )
    }
}
