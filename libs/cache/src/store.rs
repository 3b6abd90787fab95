//! Key/value stores backing the cache layer
//!
//! [`CacheStore`] mirrors the subset of an external key/value server the cache
//! layer relies on: per-key TTL and TTL refresh, glob key listing and bulk
//! deletion. The
//! in-process [`InMemoryStore`] implements it over a `DashMap`.

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use glob::Pattern;
use std::time::{Duration, Instant};

/// Remaining lifetime of a key as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key exists but its lifetime has elapsed
    Expired,
    /// Key expires after the given duration
    Remaining(Duration),
}

impl KeyTtl {
    /// True when the key should be swept by cleanup
    pub fn is_sweepable(&self) -> bool {
        matches!(self, KeyTtl::Persistent | KeyTtl::Expired)
    }
}

/// Storage backend used by [`crate::CacheLayer`]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous value and TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// List keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Report a key's remaining lifetime
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Reset a live key's lifetime without touching its value
    ///
    /// Returns false when the key is missing or already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

struct StoredItem {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredItem {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Thread-safe in-process store
///
/// Expired entries stay physically present until they are deleted, so
/// [`CacheStore::keys`] still lists them and [`CacheStore::ttl`] reports
/// [`KeyTtl::Expired`]; reads never return them.
#[derive(Default)]
pub struct InMemoryStore {
    items: DashMap<String, StoredItem>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically present keys, expired ones included
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .items
            .get(key)
            .filter(|item| !item.is_expired(now))
            .map(|item| item.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.items
            .insert(key.to_string(), StoredItem { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        Ok(keys
            .iter()
            .filter(|key| self.items.remove(key.as_str()).is_some())
            .count())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = compile_pattern(pattern)?;
        let mut keys: Vec<String> = self
            .items
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = Instant::now();
        Ok(match self.items.get(key) {
            None => KeyTtl::Missing,
            Some(item) => match item.expires_at {
                None => KeyTtl::Persistent,
                Some(at) if at <= now => KeyTtl::Expired,
                Some(at) => KeyTtl::Remaining(at - now),
            },
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.items.get_mut(key) {
            Some(mut item) if !item.is_expired(now) => {
                item.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
