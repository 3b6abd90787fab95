//! Normalized game records produced by source adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Achievement rarity tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rarity::Common => "COMMON",
            Rarity::Rare => "RARE",
            Rarity::Epic => "EPIC",
            Rarity::Legendary => "LEGENDARY",
        };
        f.write_str(name)
    }
}

/// Broad category of an on-chain game asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    Character,
    Item,
    Currency,
    Land,
    Cosmetic,
    /// Anything a backend reports that has no dedicated category
    #[serde(other)]
    Other,
}

/// Descriptive metadata attached to an asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

/// A single asset owned by a player in one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameAsset {
    pub id: String,
    /// Must match the parent record's game id
    pub game_id: String,
    pub token_id: String,
    pub contract_address: String,
    pub asset_type: AssetType,
    #[serde(default)]
    pub metadata: AssetMetadata,
    pub owner: String,
    pub tradeable: bool,
}

impl GameAsset {
    /// Create an asset with empty metadata
    pub fn new(
        id: impl Into<String>,
        game_id: impl Into<String>,
        token_id: impl Into<String>,
        contract_address: impl Into<String>,
        asset_type: AssetType,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            game_id: game_id.into(),
            token_id: token_id.into(),
            contract_address: contract_address.into(),
            asset_type,
            metadata: AssetMetadata::default(),
            owner: owner.into(),
            tradeable: true,
        }
    }
}

/// An achievement earned by a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub game_id: String,
    pub player_id: String,
    pub achievement_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rarity: Rarity,
    /// Never later than the time the record is validated
    pub earned_at: DateTime<Utc>,
}

impl Achievement {
    pub fn new(
        id: impl Into<String>,
        game_id: impl Into<String>,
        player_id: impl Into<String>,
        achievement_type: impl Into<String>,
        title: impl Into<String>,
        rarity: Rarity,
        earned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            game_id: game_id.into(),
            player_id: player_id.into(),
            achievement_type: achievement_type.into(),
            title: title.into(),
            description: None,
            rarity,
            earned_at,
        }
    }
}

/// Aggregate player statistics
///
/// Counters are signed so that bad upstream values survive normalization and
/// can be rejected by validation instead of silently wrapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatistics {
    pub level: i64,
    #[serde(default)]
    pub experience: i64,
    #[serde(default)]
    pub total_playtime_secs: i64,
    #[serde(default)]
    pub games_played: i64,
    #[serde(default)]
    pub wins: i64,
    /// Game-specific counters the engine does not interpret
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for PlayerStatistics {
    fn default() -> Self {
        Self {
            level: 1,
            experience: 0,
            total_playtime_secs: 0,
            games_played: 0,
            wins: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// Normalized view of one player's state in one game
///
/// Identified by `(player_id, game_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardizedGameData {
    pub player_id: String,
    pub game_id: String,
    #[serde(default)]
    pub assets: Vec<GameAsset>,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
    #[serde(default)]
    pub statistics: PlayerStatistics,
    pub last_updated: DateTime<Utc>,
}

impl StandardizedGameData {
    /// Empty record stamped with the current time
    pub fn new(player_id: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            game_id: game_id.into(),
            assets: Vec::new(),
            achievements: Vec::new(),
            statistics: PlayerStatistics::default(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_asset(mut self, asset: GameAsset) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn with_achievement(mut self, achievement: Achievement) -> Self {
        self.achievements.push(achievement);
        self
    }

    pub fn with_statistics(mut self, statistics: PlayerStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = last_updated;
        self
    }

    /// Identity of the record as `(player_id, game_id)`
    pub fn key(&self) -> (&str, &str) {
        (&self.player_id, &self.game_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serializes_camel_case_and_screaming_enums() {
        let earned = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let data = StandardizedGameData::new("p1", "game-a").with_achievement(Achievement::new(
            "a1",
            "game-a",
            "p1",
            "BOSS_KILL",
            "Dragon Slayer",
            Rarity::Legendary,
            earned,
        ));

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["playerId"], "p1");
        assert_eq!(json["achievements"][0]["rarity"], "LEGENDARY");
        assert_eq!(json["achievements"][0]["earnedAt"], "2024-01-01T00:00:00Z");
        assert_eq!(json["statistics"]["level"], 1);
    }

    #[test]
    fn test_unknown_asset_type_maps_to_other() {
        let asset: GameAsset = serde_json::from_value(serde_json::json!({
            "id": "x",
            "gameId": "g",
            "tokenId": "1",
            "contractAddress": "0x0",
            "assetType": "VEHICLE",
            "owner": "p1",
            "tradeable": false
        }))
        .unwrap();

        assert_eq!(asset.asset_type, AssetType::Other);
        assert_eq!(asset.metadata, AssetMetadata::default());
    }

    #[test]
    fn test_statistics_keep_game_specific_counters() {
        let stats: PlayerStatistics = serde_json::from_value(serde_json::json!({
            "level": 12,
            "kills": 340
        }))
        .unwrap();

        assert_eq!(stats.level, 12);
        assert_eq!(stats.extra.get("kills"), Some(&serde_json::json!(340)));
    }
}
