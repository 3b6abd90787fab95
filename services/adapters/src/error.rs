//! Error types for the adapters module

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Coarse error class used for retry decisions and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Upstream unreachable or slow, retried
    Network,
    /// Upstream sent something we could not interpret, never retried
    DataIntegrity,
    /// Upstream rejected our credentials, never retried
    Auth,
    /// Caller broke a registry or configuration rule, fails fast
    BusinessLogic,
    /// Upstream failed for a reason we do not recognise, retried once
    ExternalService,
    /// Nothing in the error identifies its origin, retried once
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::DataIntegrity => "data integrity",
            ErrorKind::Auth => "auth",
            ErrorKind::BusinessLogic => "business logic",
            ErrorKind::ExternalService => "external service",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Main error type for adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Upstream could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream did not answer in time
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Raw payload failed to parse or normalize
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Upstream rejected the configured credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Duplicate registration, unknown adapter and similar caller mistakes
    #[error("Business logic error: {0}")]
    BusinessLogic(String),

    /// Upstream reported a failure with no better classification
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Call rejected without reaching the adapter
    #[error("Circuit breaker open for {name}")]
    CircuitOpen {
        /// Breaker that rejected the call
        name: String,
    },

    /// Adapter error after it left the retry wrapper
    #[error("{kind} error from {game_id} after {attempts} attempt(s): {cause}")]
    Upstream {
        /// Adapter the call was made through
        game_id: String,
        /// Classification of `cause`
        kind: ErrorKind,
        /// Calls made, including the first
        attempts: u32,
        /// Error from the final attempt
        #[source]
        cause: Box<AdapterError>,
    },

    /// Operation the adapter does not declare a feature for
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// JSON parsing error from upstream response
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Push stream failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Errors from adapter implementations without their own variant
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    /// Classify this error
    ///
    /// Errors without a dedicated variant are classified from their message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Network(_)
            | AdapterError::Timeout { .. }
            | AdapterError::WebSocket(_)
            | AdapterError::CircuitOpen { .. } => ErrorKind::Network,
            AdapterError::DataIntegrity(_) | AdapterError::JsonParse(_) => ErrorKind::DataIntegrity,
            AdapterError::Auth(_) => ErrorKind::Auth,
            AdapterError::BusinessLogic(_) | AdapterError::NotSupported(_) => {
                ErrorKind::BusinessLogic
            }
            AdapterError::ExternalService(_) => ErrorKind::ExternalService,
            AdapterError::Upstream { kind, .. } => *kind,
            AdapterError::Other(e) => classify_message(&e.to_string()),
        }
    }

    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            // An open breaker would reject the retry as well
            AdapterError::CircuitOpen { .. } => false,
            AdapterError::Upstream { .. } => false,
            _ => matches!(
                self.kind(),
                ErrorKind::Network | ErrorKind::ExternalService | ErrorKind::Unknown
            ),
        }
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind(), ErrorKind::Auth | ErrorKind::BusinessLogic)
    }

    /// Game id attached by the retry wrapper, if any
    pub fn game_id(&self) -> Option<&str> {
        match self {
            AdapterError::Upstream { game_id, .. } => Some(game_id),
            _ => None,
        }
    }
}

/// Classify an uncategorized error from its message
pub fn classify_message(message: &str) -> ErrorKind {
    let message = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

    if has(&["unauthorized", "forbidden", "401", "403", "credential"]) {
        ErrorKind::Auth
    } else if has(&["timeout", "timed out", "connection", "econnrefused", "unreachable"]) {
        ErrorKind::Network
    } else if has(&["invalid", "malformed", "parse", "unexpected token"]) {
        ErrorKind::DataIntegrity
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_of_typed_variants() {
        assert_eq!(AdapterError::Network("down".into()).kind(), ErrorKind::Network);
        assert_eq!(AdapterError::Timeout { timeout_ms: 10 }.kind(), ErrorKind::Network);
        assert_eq!(AdapterError::Auth("bad key".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            AdapterError::DataIntegrity("bad".into()).kind(),
            ErrorKind::DataIntegrity
        );
    }

    #[test]
    fn test_message_heuristics() {
        let err = AdapterError::Other(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());

        let err = AdapterError::Other(anyhow::anyhow!("HTTP 403 Forbidden"));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.is_permanent());

        let err = AdapterError::Other(anyhow::anyhow!("malformed payload"));
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
        assert!(!err.is_retryable());

        assert_eq!(classify_message("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn test_upstream_keeps_cause_kind() {
        let err = AdapterError::Upstream {
            game_id: "game-a".into(),
            kind: ErrorKind::Auth,
            attempts: 1,
            cause: Box::new(AdapterError::Auth("denied".into())),
        };

        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(err.game_id(), Some("game-a"));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("game-a"));
    }

    #[test]
    fn test_circuit_open_is_not_retryable() {
        let err = AdapterError::CircuitOpen { name: "game-a:fetch".into() };
        assert!(!err.is_retryable());
    }
}
