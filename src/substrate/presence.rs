//! Presence channel for per-client transient state
//!
//! Tracks who is looking at a room, where their cursor is and which
//! synchronized block they are editing. Never persisted.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::TextPoint;

/// Predefined colors for remote cursors
const PRESENCE_COLORS: [&str; 8] = [
    "#FF6B6B", // Red
    "#4ECDC4", // Teal
    "#45B7D1", // Blue
    "#96CEB4", // Green
    "#FFEAA7", // Yellow
    "#DDA0DD", // Plum
    "#98D8C8", // Mint
    "#F7DC6F", // Gold
];

/// Pick a color based on the client id (deterministic but distributed)
pub fn color_for(client_id: Uuid) -> &'static str {
    PRESENCE_COLORS[(client_id.as_bytes()[0] as usize) % PRESENCE_COLORS.len()]
}

/// Transient state one client publishes about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<TextPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_block: Option<String>,
}

impl PresenceState {
    pub fn new(client_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color_for(client_id).to_string(),
            cursor: None,
            active_block: None,
        }
    }
}

/// Change notification for the presence table
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Updated { client_id: Uuid, state: PresenceState },
    Left { client_id: Uuid },
}

/// Presence table of one room replica
pub struct Presence {
    client_id: Uuid,
    states: RwLock<HashMap<Uuid, PresenceState>>,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl Presence {
    pub fn new(client_id: Uuid) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            client_id,
            states: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Subscribe to presence changes (local and remote)
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_tx.subscribe()
    }

    /// Publish this client's state
    pub fn set_local_state(&self, state: PresenceState) {
        self.apply_remote(self.client_id, Some(state));
    }

    pub fn local_state(&self) -> Option<PresenceState> {
        self.states.read().get(&self.client_id).cloned()
    }

    /// Update the local cursor, keeping the rest of the state
    pub fn set_cursor(&self, cursor: Option<TextPoint>, active_block: Option<String>) -> Option<PresenceState> {
        let mut state = self.local_state()?;
        state.cursor = cursor;
        state.active_block = active_block;
        self.set_local_state(state.clone());
        Some(state)
    }

    /// All known states keyed by client id, including the local one
    pub fn get_states(&self) -> HashMap<Uuid, PresenceState> {
        self.states.read().clone()
    }

    /// Record a state received for a client; `None` means the client left
    pub fn apply_remote(&self, client_id: Uuid, state: Option<PresenceState>) {
        let event = {
            let mut states = self.states.write();
            match state {
                Some(state) => {
                    if states.get(&client_id) == Some(&state) {
                        return;
                    }
                    states.insert(client_id, state.clone());
                    PresenceEvent::Updated { client_id, state }
                }
                None => {
                    if states.remove(&client_id).is_none() {
                        return;
                    }
                    PresenceEvent::Left { client_id }
                }
            }
        };
        let _ = self.event_tx.send(event);
    }

    /// Drop every remote state (after a disconnect)
    pub fn clear_remote(&self) {
        let departed: Vec<Uuid> = self
            .states
            .read()
            .keys()
            .filter(|id| **id != self.client_id)
            .copied()
            .collect();
        for client_id in departed {
            self.apply_remote(client_id, None);
        }
    }
}
