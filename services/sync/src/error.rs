//! Error types for the sync service

use adapter_service::AdapterError;
use sync_cache::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Broker error: {message}")]
    Broker { message: String },

    #[error("Broker is closed")]
    BrokerClosed,

    #[error("Update queue is full ({max} pending)")]
    QueueFull { max: usize },

    #[error("Sync engine is not running")]
    NotRunning,

    #[error("Source {game_id} is not running")]
    SourceNotRunning { game_id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Live connection error: {message}")]
    Live { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
