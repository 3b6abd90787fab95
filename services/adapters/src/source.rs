//! # Source Adapter Contract
//!
//! Every game backend is wrapped in a [`SourceAdapter`]. The engine never talks
//! to a backend directly; it goes through the registry, which hands out
//! [`crate::ResilientAdapter`] wrappers around these trait objects.
//!
//! Optional capabilities are declared up front in a [`FeatureSet`] and checked
//! by callers before invoking the matching operation, rather than probing an
//! adapter at runtime.

use crate::{AdapterError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use sync_types::{GameAsset, StandardizedGameData};
use tokio::sync::mpsc;

/// Optional capability an adapter may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterFeature {
    /// Pushes updates through [`SourceAdapter::subscribe_to_updates`]
    RealTimeUpdates,
    /// Confirms assets through [`SourceAdapter::validate_asset`]
    AssetValidation,
    Achievements,
    Statistics,
    Leaderboards,
}

impl fmt::Display for AdapterFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterFeature::RealTimeUpdates => "REAL_TIME_UPDATES",
            AdapterFeature::AssetValidation => "ASSET_VALIDATION",
            AdapterFeature::Achievements => "ACHIEVEMENTS",
            AdapterFeature::Statistics => "STATISTICS",
            AdapterFeature::Leaderboards => "LEADERBOARDS",
        };
        f.write_str(name)
    }
}

/// Declared capabilities of one adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<AdapterFeature>);

impl FeatureSet {
    pub fn new(features: &[AdapterFeature]) -> Self {
        Self(features.iter().copied().collect())
    }

    pub fn contains(&self, feature: AdapterFeature) -> bool {
        self.0.contains(&feature)
    }

    pub fn insert(&mut self, feature: AdapterFeature) {
        self.0.insert(feature);
    }

    pub fn iter(&self) -> impl Iterator<Item = AdapterFeature> + '_ {
        self.0.iter().copied()
    }
}

/// Plugin contract for one external game backend
///
/// Implementations must be cheap to share: the registry keeps them behind an
/// `Arc` and calls them concurrently from health checks, polling and
/// subscription handling.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key for this adapter
    fn game_id(&self) -> &str;

    /// Human readable name
    fn name(&self) -> &str;

    fn features(&self) -> &FeatureSet;

    /// Fetch the backend's native representation of a player
    ///
    /// Fails with [`AdapterError::Network`] when the backend is unreachable and
    /// [`AdapterError::DataIntegrity`] when the response is unusable.
    async fn fetch_raw_player_data(&self, player_id: &str) -> Result<Value>;

    /// Convert a raw payload into the common schema
    fn normalize(&self, raw: &Value) -> Result<StandardizedGameData>;

    /// Start pushing normalized updates into `sink`
    ///
    /// Only called when [`AdapterFeature::RealTimeUpdates`] is declared. The
    /// adapter keeps its upstream connection open until
    /// [`SourceAdapter::unsubscribe_from_updates`].
    async fn subscribe_to_updates(&self, _sink: mpsc::Sender<StandardizedGameData>) -> Result<()> {
        Err(AdapterError::NotSupported(format!(
            "{} does not push updates",
            self.game_id()
        )))
    }

    async fn unsubscribe_from_updates(&self) -> Result<()> {
        Ok(())
    }

    /// Ask the upstream to include `player_id` in pushed updates
    async fn watch_player(&self, _player_id: &str) -> Result<()> {
        Ok(())
    }

    async fn unwatch_player(&self, _player_id: &str) -> Result<()> {
        Ok(())
    }

    /// Check an asset against the backend's authoritative state
    async fn validate_asset(&self, asset: &GameAsset) -> Result<bool>;

    async fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_set_serializes_as_names() {
        let features = FeatureSet::new(&[
            AdapterFeature::Statistics,
            AdapterFeature::RealTimeUpdates,
        ]);

        assert!(features.contains(AdapterFeature::RealTimeUpdates));
        assert!(!features.contains(AdapterFeature::Leaderboards));
        assert_eq!(
            serde_json::to_string(&features).unwrap(),
            r#"["REAL_TIME_UPDATES","STATISTICS"]"#
        );
    }
}
