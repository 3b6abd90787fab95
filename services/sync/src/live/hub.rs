//! Live connection management

use crate::error::{Result, SyncError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One connected live client
pub struct Client {
    pub id: Uuid,
    pub sender: mpsc::UnboundedSender<String>,
    players: HashSet<String>,
}

impl Client {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            players: HashSet::new(),
        }
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.sender.send(text).map_err(|_| SyncError::Live {
            message: format!("client {} is gone", self.id),
        })
    }
}

/// Tracks live clients and the players each one follows
pub struct ClientManager {
    clients: Arc<RwLock<HashMap<Uuid, Client>>>,
    max_connections: usize,
    max_payload_bytes: usize,
}

impl ClientManager {
    pub fn new(max_connections: usize, max_payload_bytes: usize) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            max_connections,
            max_payload_bytes,
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    pub async fn add_client(&self, client: Client) -> Result<()> {
        let mut clients = self.clients.write().await;

        if clients.len() >= self.max_connections {
            return Err(SyncError::Live {
                message: "Maximum connections reached".to_string(),
            });
        }

        let client_id = client.id;
        clients.insert(client_id, client);

        info!(
            "Added live client {}, total connections: {}",
            client_id,
            clients.len()
        );
        Ok(())
    }

    /// Remove a client, returning the players it was following
    pub async fn remove_client(&self, client_id: Uuid) -> Vec<String> {
        let mut clients = self.clients.write().await;
        match clients.remove(&client_id) {
            Some(client) => {
                info!(
                    "Removed live client {}, total connections: {}",
                    client_id,
                    clients.len()
                );
                client.players.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Follow `player_id`; true when this client is the player's first follower
    pub async fn subscribe(&self, client_id: Uuid, player_id: &str) -> Result<bool> {
        let mut clients = self.clients.write().await;
        let first = !clients.values().any(|c| c.players.contains(player_id));
        let client = clients.get_mut(&client_id).ok_or_else(|| SyncError::Live {
            message: format!("unknown client {}", client_id),
        })?;
        client.players.insert(player_id.to_string());
        Ok(first)
    }

    /// Stop following `player_id`; true when no client follows it any more
    pub async fn unsubscribe(&self, client_id: Uuid, player_id: &str) -> bool {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(&client_id) {
            client.players.remove(player_id);
        }
        !clients.values().any(|c| c.players.contains(player_id))
    }

    pub async fn is_followed(&self, player_id: &str) -> bool {
        self.clients
            .read()
            .await
            .values()
            .any(|c| c.players.contains(player_id))
    }

    /// Every player followed by at least one client
    pub async fn followed_players(&self) -> HashSet<String> {
        self.clients
            .read()
            .await
            .values()
            .flat_map(|c| c.players.iter().cloned())
            .collect()
    }

    /// Push a message to the clients following `player_id`
    ///
    /// Messages larger than the payload cap are dropped. Returns the number of
    /// clients reached.
    pub async fn send_to_player<T: Serialize>(&self, player_id: &str, message: &T) -> usize {
        let Some(text) = self.encode(message) else {
            return 0;
        };

        let clients = self.clients.read().await;
        let mut failed_clients = Vec::new();
        let mut delivered = 0;

        for client in clients.values().filter(|c| c.players.contains(player_id)) {
            match client.send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed_clients.push(client.id),
            }
        }

        drop(clients);
        self.prune(failed_clients).await;
        delivered
    }

    /// Send a message to one client
    pub async fn send_to_client<T: Serialize>(&self, client_id: Uuid, message: &T) -> Result<()> {
        let text = self.encode(message).ok_or_else(|| SyncError::Live {
            message: "message exceeds payload cap".to_string(),
        })?;
        let clients = self.clients.read().await;
        let client = clients.get(&client_id).ok_or_else(|| SyncError::Live {
            message: format!("unknown client {}", client_id),
        })?;
        client.send_text(text)
    }

    /// Broadcast a message to all connected clients
    pub async fn broadcast<T: Serialize>(&self, message: &T) {
        let Some(text) = self.encode(message) else {
            return;
        };

        let clients = self.clients.read().await;
        let mut failed_clients = Vec::new();

        for (client_id, client) in clients.iter() {
            if client.send_text(text.clone()).is_err() {
                failed_clients.push(*client_id);
            }
        }

        drop(clients);
        self.prune(failed_clients).await;
    }

    /// Drop every client; their outbound channels close
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();
        if count > 0 {
            info!("Closed {} live clients", count);
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    fn encode<T: Serialize>(&self, message: &T) -> Option<String> {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize live message: {}", e);
                return None;
            }
        };
        if text.len() > self.max_payload_bytes {
            warn!(
                "Dropping live message of {} bytes (cap {})",
                text.len(),
                self.max_payload_bytes
            );
            return None;
        }
        Some(text)
    }

    async fn prune(&self, failed_clients: Vec<Uuid>) {
        if failed_clients.is_empty() {
            return;
        }
        let mut clients = self.clients.write().await;
        for client_id in failed_clients {
            clients.remove(&client_id);
            debug!("Removed disconnected client {}", client_id);
        }
    }
}
