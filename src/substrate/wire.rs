//! Messages exchanged with the relay server over a websocket

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::presence::PresenceState;

/// Messages from client to relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A local update to merge and fan out
    Update { update: Vec<u8> },
    /// The sender's presence state
    Presence { state: PresenceState },
}

/// Messages from relay to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full room state, sent once right after connecting
    Sync {
        state: Vec<u8>,
        presence: Vec<PresenceEntry>,
    },
    /// An update produced by another client
    Update { update: Vec<u8> },
    /// Another client's presence changed
    Presence { client_id: Uuid, state: PresenceState },
    /// Another client disconnected
    PresenceLeft { client_id: Uuid },
    /// Error occurred
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub client_id: Uuid,
    pub state: PresenceState,
}
