//! Per-player subscriptions held by local consumers

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use sync_types::GameDataUpdate;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Registry-side record of a player subscription
///
/// The forwarding task reads the player's broker channel and hands matching
/// updates to the consumer's channel. Dropping the record stops it.
pub(crate) struct PlayerSubscription {
    pub player_id: String,
    pub game_ids: Option<BTreeSet<String>>,
    pub subscribed_at: DateTime<Utc>,
    pub forwarder: JoinHandle<()>,
}

impl PlayerSubscription {
    pub fn covers(&self, game_id: &str) -> bool {
        covers(self.game_ids.as_ref(), game_id)
    }
}

impl Drop for PlayerSubscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// `None` means every game
pub(crate) fn covers(game_ids: Option<&BTreeSet<String>>, game_id: &str) -> bool {
    game_ids.map_or(true, |ids| ids.contains(game_id))
}

/// Consumer end of a player subscription
///
/// Yields the player's updates for the requested games. `recv` returns `None`
/// once the subscription is removed or the engine shuts down.
pub struct SubscriptionHandle {
    player_id: String,
    receiver: mpsc::Receiver<GameDataUpdate>,
}

impl SubscriptionHandle {
    pub(crate) fn new(player_id: String, receiver: mpsc::Receiver<GameDataUpdate>) -> Self {
        Self {
            player_id,
            receiver,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub async fn recv(&mut self) -> Option<GameDataUpdate> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GameDataUpdate> {
        self.receiver.try_recv().ok()
    }
}

/// Snapshot entry for health and metrics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub player_id: String,
    pub game_ids: Option<BTreeSet<String>>,
    pub subscribed_at: DateTime<Utc>,
}

impl From<&PlayerSubscription> for SubscriptionInfo {
    fn from(subscription: &PlayerSubscription) -> Self {
        Self {
            player_id: subscription.player_id.clone(),
            game_ids: subscription.game_ids.clone(),
            subscribed_at: subscription.subscribed_at,
        }
    }
}
