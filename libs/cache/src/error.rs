//! Error types for the cache layer

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing store rejected or failed the operation
    #[error("Cache store error: {0}")]
    Store(String),

    /// Value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compressed payload was corrupt
    #[error("Cache decompression error: {0}")]
    Decompression(String),

    /// Glob pattern could not be compiled
    #[error("Invalid cache key pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },
}
