//! Signals emitted by the sync engine

use serde::{Deserialize, Serialize};
use std::fmt;
use sync_types::UpdateType;

/// Ingestion lifecycle of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceState::Stopped => "STOPPED",
            SourceState::Starting => "STARTING",
            SourceState::Running => "RUNNING",
            SourceState::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    ValidationFailed {
        player_id: String,
        game_id: String,
        score: u32,
        errors: Vec<String>,
    },
    /// Backpressure rejection, the update was not queued
    QueueFull {
        player_id: String,
        game_id: String,
        depth: usize,
    },
    UpdateQueued {
        player_id: String,
        game_id: String,
        update_type: UpdateType,
    },
    BatchFlushed {
        size: usize,
    },
    /// The batch went back to the front of the queue
    FlushFailed {
        size: usize,
        error: String,
    },
    SourceStateChanged {
        game_id: String,
        previous: SourceState,
        current: SourceState,
    },
}
