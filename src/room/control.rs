#![forbid(unsafe_code)]

// Host-only control commands. A caller that is not the room's current host connection
// gets no reply at all; the denial is only logged and counted.

use super::registry::RoomGuard;
use super::{send_message, RoomCoordinator};
use crate::signaling::protocol::ServerMessage;
use tracing::{debug, info};

impl RoomCoordinator {
    async fn lock_as_host(&self, room_key: &str, caller: &str, command: &str) -> Option<RoomGuard> {
        let Some(room) = self.registry.lock(room_key).await else {
            debug!("{} from {} denied: unknown room {}", command, caller, room_key);
            self.metrics.inc_control_denied();
            return None;
        };
        if !room.is_host(caller) {
            debug!("{} from {} denied: not host of room {}", command, caller, room_key);
            self.metrics.inc_control_denied();
            return None;
        }
        Some(room)
    }

    /// Removes `target` from the room. The host cannot remove itself.
    pub async fn remove_participant(&self, room_key: &str, caller: &str, target: &str) -> bool {
        let Some(mut room) = self.lock_as_host(room_key, caller, "remove").await else {
            return false;
        };
        if target == caller {
            debug!("Host {} tried to remove itself from room {}", caller, room_key);
            return false;
        }
        let Some(removed) = room.remove_participant(target) else {
            debug!("remove: unknown target {} in room {}", target, room_key);
            return false;
        };

        room.cancel_departure(target);
        room.presence.forget(&removed.stable_id, target);
        room.muted.remove(&removed.stable_id);

        send_message(&removed.sender, target, &ServerMessage::Removed);
        room.broadcast_all(&ServerMessage::ParticipantLeft {
            conn_id: target.to_string(),
            stable_id: Some(removed.stable_id.clone()),
        });
        room.release_spotlight(target);
        info!("Host {} removed {} ({}) from room {}", caller, removed.stable_id, target, room_key);
        true
    }

    pub async fn mute(&self, room_key: &str, caller: &str, target: &str) -> bool {
        self.set_muted(room_key, caller, target, true).await
    }

    pub async fn unmute(&self, room_key: &str, caller: &str, target: &str) -> bool {
        self.set_muted(room_key, caller, target, false).await
    }

    async fn set_muted(&self, room_key: &str, caller: &str, target: &str, muted: bool) -> bool {
        let command = if muted { "mute" } else { "unmute" };
        let Some(mut room) = self.lock_as_host(room_key, caller, command).await else {
            return false;
        };
        let Some(stable_id) = room.participant(target).map(|p| p.stable_id.clone()) else {
            debug!("{}: unknown target {} in room {}", command, target, room_key);
            return false;
        };

        let directive = if muted {
            room.muted.insert(stable_id.clone());
            ServerMessage::ForcedMute
        } else {
            room.muted.remove(&stable_id);
            ServerMessage::ForcedUnmute
        };
        room.send_to(target, &directive);
        room.broadcast_all(&ServerMessage::AudioState { conn_id: target.to_string(), muted });
        info!("Host {} {}d {} in room {}", caller, command, stable_id, room_key);
        true
    }

    pub async fn mute_all(&self, room_key: &str, caller: &str) -> bool {
        let Some(mut room) = self.lock_as_host(room_key, caller, "mute-all").await else {
            return false;
        };

        let targets: Vec<(String, String)> = room
            .participants()
            .iter()
            .filter(|p| p.conn_id != caller)
            .map(|p| (p.conn_id.clone(), p.stable_id.clone()))
            .collect();
        for (conn_id, stable_id) in &targets {
            room.muted.insert(stable_id.clone());
            room.send_to(conn_id, &ServerMessage::ForcedMute);
        }
        room.broadcast_except(caller, &ServerMessage::AllMuted);
        info!("Host {} muted {} participants in room {}", caller, targets.len(), room_key);
        true
    }

    pub async fn unmute_all(&self, room_key: &str, caller: &str) -> bool {
        let Some(mut room) = self.lock_as_host(room_key, caller, "unmute-all").await else {
            return false;
        };

        room.muted.clear();
        for participant in room.participants().iter().filter(|p| p.conn_id != caller) {
            send_message(&participant.sender, &participant.conn_id, &ServerMessage::ForcedUnmute);
        }
        info!("Host {} unmuted everyone in room {}", caller, room_key);
        true
    }

    pub async fn set_lock(&self, room_key: &str, caller: &str, locked: bool) -> bool {
        let Some(mut room) = self.lock_as_host(room_key, caller, "lock").await else {
            return false;
        };

        room.locked = locked;
        room.broadcast_except(caller, &ServerMessage::LockState { locked });
        info!("Room {} {} by {}", room_key, if locked { "locked" } else { "unlocked" }, caller);
        true
    }

    /// Highlights one connection for everyone, or clears the highlight with `None`.
    pub async fn spotlight(&self, room_key: &str, caller: &str, target: Option<&str>) -> bool {
        let Some(mut room) = self.lock_as_host(room_key, caller, "spotlight").await else {
            return false;
        };
        if let Some(target) = target {
            if room.participant(target).is_none() {
                debug!("spotlight: unknown target {} in room {}", target, room_key);
                return false;
            }
        }

        room.spotlight = target.map(str::to_string);
        room.broadcast_all(&ServerMessage::SpotlightState { conn_id: room.spotlight.clone() });
        true
    }

    /// Ends the meeting for everyone and deletes the room.
    pub async fn end_for_all(&self, room_key: &str, caller: &str) -> bool {
        let Some(mut room) = self.lock_as_host(room_key, caller, "end-for-all").await else {
            return false;
        };

        room.broadcast_all(&ServerMessage::MeetingEnded);
        let ended = room.tear_down();
        self.registry.remove(&mut room);
        info!("Host {} ended room {} for {} participants", caller, room_key, ended.len());
        true
    }
}
