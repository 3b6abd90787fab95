//! # Pub/Sub Broker
//!
//! Channel-oriented publish/subscribe used to fan updates out of the engine.
//! Channel names follow `{prefix}:player:{playerId}:updates`; pattern
//! subscriptions use glob syntax, so `{prefix}:player:*:updates` sees every
//! player.
//!
//! [`InMemoryBroker`] keeps one broadcast channel per exact channel name plus a
//! list of pattern subscribers, the same topic map shape the relay routing
//! uses. Delivery is at-least-once per live subscriber; a subscriber that
//! falls more than `channel_capacity` messages behind skips ahead.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// `{prefix}:player:{playerId}:updates`
pub fn player_channel(prefix: &str, player_id: &str) -> String {
    format!("{}:player:{}:updates", prefix, player_id)
}

/// Pattern matching every player channel under `prefix`
pub fn player_channel_pattern(prefix: &str) -> String {
    format!("{}:player:*:updates", glob::Pattern::escape(prefix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// Receiving end of a channel or pattern subscription
pub struct BrokerSubscription {
    receiver: broadcast::Receiver<BrokerMessage>,
    topic: String,
}

impl BrokerSubscription {
    /// Next message, or `None` once the broker is closed
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, skipped {} messages", self.topic, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Returns the number of subscribers the message was handed to
    async fn publish(&self, channel: &str, payload: String) -> Result<usize>;

    async fn subscribe(&self, channel: &str) -> Result<BrokerSubscription>;

    /// Glob pattern subscription
    async fn psubscribe(&self, pattern: &str) -> Result<BrokerSubscription>;

    /// Release every subscription; later calls fail with [`SyncError::BrokerClosed`]
    async fn close(&self) -> Result<()>;
}

struct PatternSubscription {
    pattern: glob::Pattern,
    source: String,
    sender: broadcast::Sender<BrokerMessage>,
}

/// Process-local broker
pub struct InMemoryBroker {
    channels: DashMap<String, broadcast::Sender<BrokerMessage>>,
    patterns: RwLock<Vec<PatternSubscription>>,
    capacity: usize,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            patterns: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::BrokerClosed);
        }
        Ok(())
    }

    /// Exact channels with at least one live subscriber
    pub fn active_channels(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .count()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        self.ensure_open()?;
        let message = BrokerMessage {
            channel: channel.to_string(),
            payload,
        };

        let mut delivered = 0;
        let mut idle = false;
        if let Some(sender) = self.channels.get(channel) {
            match sender.send(message.clone()) {
                Ok(count) => delivered += count,
                Err(_) => idle = true,
            }
        }
        if idle {
            self.channels
                .remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }

        {
            let mut patterns = self.patterns.write();
            patterns.retain(|p| p.sender.receiver_count() > 0);
            for subscription in patterns.iter().filter(|p| p.pattern.matches(channel)) {
                if let Ok(count) = subscription.sender.send(message.clone()) {
                    delivered += count;
                }
            }
        }

        debug!("Published to {} ({} receivers)", channel, delivered);
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<BrokerSubscription> {
        self.ensure_open()?;
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Ok(BrokerSubscription {
            receiver,
            topic: channel.to_string(),
        })
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BrokerSubscription> {
        self.ensure_open()?;
        let compiled = glob::Pattern::new(pattern).map_err(|e| SyncError::Broker {
            message: format!("invalid pattern '{}': {}", pattern, e),
        })?;

        let mut patterns = self.patterns.write();
        if let Some(existing) = patterns.iter().find(|p| p.source == pattern) {
            return Ok(BrokerSubscription {
                receiver: existing.sender.subscribe(),
                topic: pattern.to_string(),
            });
        }

        let (sender, receiver) = broadcast::channel(self.capacity);
        patterns.push(PatternSubscription {
            pattern: compiled,
            source: pattern.to_string(),
            sender,
        });
        Ok(BrokerSubscription {
            receiver,
            topic: pattern.to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the senders ends every subscription
        self.channels.clear();
        self.patterns.write().clear();
        info!("Broker closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exact_and_pattern_delivery() {
        let broker = InMemoryBroker::new(16);
        let mut exact = broker.subscribe(&player_channel("gs", "p1")).await.unwrap();
        let mut all = broker.psubscribe(&player_channel_pattern("gs")).await.unwrap();

        let delivered = broker
            .publish(&player_channel("gs", "p1"), "one".into())
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        broker
            .publish(&player_channel("gs", "p2"), "two".into())
            .await
            .unwrap();

        assert_eq!(exact.recv().await.unwrap().payload, "one");
        assert_eq!(all.recv().await.unwrap().payload, "one");
        let second = all.recv().await.unwrap();
        assert_eq!(second.channel, "gs:player:p2:updates");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = InMemoryBroker::new(16);
        assert_eq!(broker.publish("gs:player:p1:updates", "x".into()).await.unwrap(), 0);

        let subscription = broker.subscribe("gs:player:p1:updates").await.unwrap();
        assert_eq!(broker.active_channels(), 1);
        drop(subscription);
        broker.publish("gs:player:p1:updates", "x".into()).await.unwrap();
        assert_eq!(broker.active_channels(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let broker = InMemoryBroker::new(16);
        let mut subscription = broker.subscribe("gs:player:p1:updates").await.unwrap();

        broker.close().await.unwrap();
        assert!(subscription.recv().await.is_none());
        assert!(matches!(
            broker.publish("gs:player:p1:updates", "x".into()).await,
            Err(SyncError::BrokerClosed)
        ));
    }
}
