//! Stored cache entry envelope and payload compression

use crate::error::{CacheError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Encoded value held by an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Json(Value),
    /// Base64 of an LZ4 block with the uncompressed size prepended
    Lz4(String),
}

/// Envelope written to the store for every key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub payload: Payload,
    /// Lifetime re-applied on every hit, `None` for no expiry
    pub ttl_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// As stored these reflect the write; [`crate::CacheLayer::entry`] fills in reads
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub compressed: bool,
    /// Size of the serialized value before compression
    pub size: usize,
}

impl CacheEntry {
    /// Build an entry, compressing the value when it exceeds `compress_above`
    pub fn encode(
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        compress_above: Option<usize>,
    ) -> Result<Self> {
        let raw = serde_json::to_vec(&value)?;
        let size = raw.len();
        let now = Utc::now();

        let (payload, compressed) = match compress_above {
            Some(threshold) if size > threshold => {
                let packed = lz4_flex::compress_prepend_size(&raw);
                (Payload::Lz4(BASE64.encode(packed)), true)
            }
            _ => (Payload::Json(value), false),
        };

        Ok(Self {
            key: key.to_string(),
            payload,
            ttl_ms: ttl.map(|ttl| ttl.as_millis() as u64),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            compressed,
            size,
        })
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    /// Recover the stored value
    pub fn value(&self) -> Result<Value> {
        match &self.payload {
            Payload::Json(value) => Ok(value.clone()),
            Payload::Lz4(encoded) => {
                let packed = BASE64
                    .decode(encoded)
                    .map_err(|e| CacheError::Decompression(e.to_string()))?;
                let raw = lz4_flex::decompress_size_prepended(&packed)
                    .map_err(|e| CacheError::Decompression(e.to_string()))?;
                Ok(serde_json::from_slice(&raw)?)
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
