#![forbid(unsafe_code)]

// Point-to-point relay of negotiation payloads and room-wide ancillary broadcasts.
// Relay targets are looked up in the connection directory, not in a room.

use super::{deliver, encode, Outbound, RoomCoordinator};
use crate::signaling::protocol::{RelayKind, ServerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use tracing::debug;

/// Every live connection's outbound channel, keyed by connection id.
#[derive(Default)]
pub struct ConnectionDirectory {
    senders: StdRwLock<HashMap<String, Outbound>>,
}

impl ConnectionDirectory {
    pub fn register(&self, conn_id: &str, sender: Outbound) {
        let mut senders = self.senders.write().unwrap_or_else(|e| e.into_inner());
        senders.insert(conn_id.to_string(), sender);
    }

    pub fn unregister(&self, conn_id: &str) -> bool {
        let mut senders = self.senders.write().unwrap_or_else(|e| e.into_inner());
        senders.remove(conn_id).is_some()
    }

    pub fn get(&self, conn_id: &str) -> Option<Outbound> {
        let senders = self.senders.read().unwrap_or_else(|e| e.into_inner());
        senders.get(conn_id).cloned()
    }
}

/// Room-wide events a participant sends about itself
#[derive(Debug, Clone, PartialEq)]
pub enum Ancillary {
    Chat(Value),
    Reaction(String),
    RaiseHand(bool),
    Audio(bool),
    Video(bool),
    ScreenShare(bool),
}

impl Ancillary {
    fn into_message(self, conn_id: &str, stable_id: &str) -> ServerMessage {
        let conn_id = conn_id.to_string();
        let stable_id = stable_id.to_string();
        match self {
            Ancillary::Chat(message) => ServerMessage::Chat { conn_id, stable_id, message },
            Ancillary::Reaction(emoji) => ServerMessage::Reaction { conn_id, stable_id, emoji },
            Ancillary::RaiseHand(raised) => ServerMessage::HandRaised { conn_id, stable_id, raised },
            Ancillary::Audio(muted) => ServerMessage::AudioState { conn_id, muted },
            Ancillary::Video(off) => ServerMessage::VideoState { conn_id, off },
            Ancillary::ScreenShare(sharing) => ServerMessage::ScreenShareState { conn_id, stable_id, sharing },
        }
    }
}

impl RoomCoordinator {
    pub fn register_connection(&self, conn_id: &str, sender: Outbound) {
        self.connections.register(conn_id, sender);
    }

    pub fn unregister_connection(&self, conn_id: &str) -> bool {
        self.connections.unregister(conn_id)
    }

    /// Forwards `payload` untouched to `to`, tagged with the sender. Unknown targets drop it.
    pub fn relay(&self, from: &str, to: &str, kind: RelayKind, payload: Value) -> bool {
        let Some(sender) = self.connections.get(to) else {
            debug!("Dropping {:?} from {}: target {} not connected", kind, from, to);
            self.metrics.inc_relays_dropped();
            return false;
        };

        let Some(json) = encode(&kind.into_message(from.to_string(), payload)) else {
            return false;
        };
        if deliver(&sender, to, &json) {
            self.metrics.inc_relays_forwarded();
            true
        } else {
            self.metrics.inc_relays_dropped();
            false
        }
    }

    /// Broadcasts an ancillary event to the sender's room, excluding the sender.
    /// Ignored unless `conn_id` is a participant of `room_key`.
    pub async fn broadcast_from(&self, room_key: &str, conn_id: &str, event: Ancillary) -> bool {
        let Some(room) = self.registry.read(room_key).await else {
            debug!("Ancillary event from {} for unknown room {}", conn_id, room_key);
            return false;
        };
        let Some(stable_id) = room.participant(conn_id).map(|p| p.stable_id.clone()) else {
            debug!("Ancillary event from {} ignored: not in room {}", conn_id, room_key);
            return false;
        };

        room.broadcast_except(conn_id, &event.into_message(conn_id, &stable_id));
        true
    }
}
