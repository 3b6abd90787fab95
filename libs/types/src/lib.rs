//! # Game Sync Types
//!
//! Normalized data model shared by every game sync service.
//!
//! ## Design Philosophy
//!
//! - **One Schema**: Every game backend is normalized into [`StandardizedGameData`]
//!   before anything else in the system touches it
//! - **Immutable Records**: Normalized records and [`GameDataUpdate`] envelopes are
//!   built once and then only cloned or shared
//! - **Wire Compatible**: Field names serialize as camelCase and enums as
//!   SCREAMING_SNAKE_CASE so broker and live-connection payloads stay stable
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use sync_types::{Achievement, Rarity, StandardizedGameData};
//!
//! let data = StandardizedGameData::new("player-1", "game-a")
//!     .with_achievement(Achievement::new(
//!         "ach-1",
//!         "game-a",
//!         "player-1",
//!         "FIRST_WIN",
//!         "First Blood",
//!         Rarity::Common,
//!         Utc::now(),
//!     ));
//!
//! assert_eq!(data.achievements.len(), 1);
//! ```

pub mod game;
pub mod health;
pub mod update;

pub use game::{
    Achievement, AssetMetadata, AssetType, GameAsset, PlayerStatistics, Rarity,
    StandardizedGameData,
};
pub use health::HealthStatus;
pub use update::{GameDataUpdate, UpdateSource, UpdateType};
