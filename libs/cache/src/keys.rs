//! Composite cache key construction
//!
//! Keys are `{prefix}:{entryType}:{gameId}[:{playerId}][:{assetId}][:{achievementId}][:{params}]`
//! where `params` is `k=v` pairs joined by `&` in key order. Extra parameters are
//! kept in a `BTreeMap`, so the same logical key always renders to the same
//! string no matter the order callers supplied them in.
//!
//! Segment values are percent-escaped (see [`escape_segment`]) so an id that
//! contains a separator can never render to another key's string.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Escape the characters that carry structure in a rendered key
///
/// `%`, `:`, `&` and `=` become `%25`, `%3A`, `%26` and `%3D`. Values without
/// them are returned unchanged.
pub fn escape_segment(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', ':', '&', '=']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Kind of data stored under a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEntryType {
    /// Full normalized record for a player in a game
    PlayerData,
    PlayerAssets,
    PlayerAchievements,
    PlayerStats,
    Leaderboard,
    Asset,
    GameConfig,
}

impl CacheEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEntryType::PlayerData => "player_data",
            CacheEntryType::PlayerAssets => "player_assets",
            CacheEntryType::PlayerAchievements => "player_achievements",
            CacheEntryType::PlayerStats => "player_stats",
            CacheEntryType::Leaderboard => "leaderboard",
            CacheEntryType::Asset => "asset",
            CacheEntryType::GameConfig => "game_config",
        }
    }
}

impl fmt::Display for CacheEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical description of a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    entry_type: CacheEntryType,
    game_id: String,
    player_id: Option<String>,
    asset_id: Option<String>,
    achievement_id: Option<String>,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(entry_type: CacheEntryType, game_id: impl Into<String>) -> Self {
        Self {
            entry_type,
            game_id: game_id.into(),
            player_id: None,
            asset_id: None,
            achievement_id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn player(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn achievement(mut self, achievement_id: impl Into<String>) -> Self {
        self.achievement_id = Some(achievement_id.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Render under the given prefix
    pub fn render(&self, prefix: &str) -> String {
        let mut parts: Vec<Cow<'_, str>> = vec![
            Cow::Borrowed(prefix),
            Cow::Borrowed(self.entry_type.as_str()),
            escape_segment(&self.game_id),
        ];
        parts.extend(self.player_id.as_deref().map(escape_segment));
        parts.extend(self.asset_id.as_deref().map(escape_segment));
        parts.extend(self.achievement_id.as_deref().map(escape_segment));

        let mut key = parts.join(":");
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(name, value)| format!("{}={}", escape_segment(name), escape_segment(value)))
                .collect();
            key.push(':');
            key.push_str(&params.join("&"));
        }
        key
    }
}

/// Renders keys under one configured prefix
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn build(&self, key: &CacheKey) -> String {
        key.render(&self.prefix)
    }

    /// Key of the full normalized record for a player
    pub fn player_data(&self, game_id: &str, player_id: &str) -> String {
        self.build(&CacheKey::new(CacheEntryType::PlayerData, game_id).player(player_id))
    }

    pub fn player_assets(&self, game_id: &str, player_id: &str) -> String {
        self.build(&CacheKey::new(CacheEntryType::PlayerAssets, game_id).player(player_id))
    }

    pub fn player_achievements(&self, game_id: &str, player_id: &str) -> String {
        self.build(&CacheKey::new(CacheEntryType::PlayerAchievements, game_id).player(player_id))
    }

    pub fn player_stats(&self, game_id: &str, player_id: &str) -> String {
        self.build(&CacheKey::new(CacheEntryType::PlayerStats, game_id).player(player_id))
    }

    pub fn leaderboard(&self, game_id: &str, params: &[(&str, &str)]) -> String {
        let key = params
            .iter()
            .fold(CacheKey::new(CacheEntryType::Leaderboard, game_id), |key, (k, v)| {
                key.param(*k, *v)
            });
        self.build(&key)
    }

    /// Pattern covering every key of a game
    pub fn game_pattern(&self, game_id: &str) -> String {
        format!(
            "{}:*:{}*",
            self.prefix,
            glob::Pattern::escape(&escape_segment(game_id))
        )
    }
}
