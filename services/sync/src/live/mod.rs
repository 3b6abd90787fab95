//! Live connections: WebSocket clients following individual players

pub mod hub;
pub mod server;

pub use hub::{Client, ClientManager};
pub use server::LiveServer;

use serde::{Deserialize, Serialize};
use sync_types::GameDataUpdate;

/// Frames accepted from clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "playerId")]
        player_id: String,
    },
    Unsubscribe {
        #[serde(rename = "playerId")]
        player_id: String,
    },
    Ping,
}

/// Frames sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage<'a> {
    Update {
        data: &'a GameDataUpdate,
    },
    Subscribed {
        #[serde(rename = "playerId")]
        player_id: &'a str,
    },
    Unsubscribed {
        #[serde(rename = "playerId")]
        player_id: &'a str,
    },
    Pong,
    Heartbeat {
        timestamp: i64,
        #[serde(rename = "clientCount")]
        client_count: usize,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frames() {
        let subscribe: ClientMessage =
            serde_json::from_value(json!({"type": "subscribe", "playerId": "p1"})).unwrap();
        assert_eq!(
            subscribe,
            ClientMessage::Subscribe {
                player_id: "p1".into()
            }
        );

        let ping: ClientMessage = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn test_server_frames() {
        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let subscribed = serde_json::to_value(ServerMessage::Subscribed { player_id: "p1" }).unwrap();
        assert_eq!(subscribed, json!({"type": "subscribed", "playerId": "p1"}));
    }
}
