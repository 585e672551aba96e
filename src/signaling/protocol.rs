#![forbid(unsafe_code)]

// Signaling protocol - JSON frames exchanged over the WebSocket.
// Negotiation payloads (SDP, ICE candidates) and chat bodies stay opaque `Value`s.

use crate::turn::IceServer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_ROOM_KEY_LEN: usize = 128;
pub const MAX_STABLE_ID_LEN: usize = 128;
pub const MAX_DISPLAY_NAME_LEN: usize = 64;
pub const MAX_CONN_ID_LEN: usize = 64;
pub const MAX_CHAT_BYTES: usize = 4096;
pub const MAX_EMOJI_LEN: usize = 32;

/// Client-to-server events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join {
        room_key: String,
        stable_id: String,
        display_name: String,
    },
    RelayOffer {
        target: String,
        sdp: Value,
    },
    RelayAnswer {
        target: String,
        sdp: Value,
    },
    RelayCandidate {
        target: String,
        candidate: Value,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        room_key: String,
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        room_key: String,
        emoji: String,
    },
    #[serde(rename_all = "camelCase")]
    RaiseHand {
        room_key: String,
        raised: bool,
    },
    #[serde(rename_all = "camelCase")]
    AudioToggle {
        room_key: String,
        muted: bool,
    },
    #[serde(rename_all = "camelCase")]
    VideoToggle {
        room_key: String,
        off: bool,
    },
    #[serde(rename_all = "camelCase")]
    ScreenShare {
        room_key: String,
        sharing: bool,
    },
    #[serde(rename_all = "camelCase")]
    Remove {
        room_key: String,
        target: String,
    },
    #[serde(rename_all = "camelCase")]
    Mute {
        room_key: String,
        target: String,
    },
    #[serde(rename_all = "camelCase")]
    Unmute {
        room_key: String,
        target: String,
    },
    #[serde(rename_all = "camelCase")]
    MuteAll {
        room_key: String,
    },
    #[serde(rename_all = "camelCase")]
    UnmuteAll {
        room_key: String,
    },
    #[serde(rename_all = "camelCase")]
    Lock {
        room_key: String,
        locked: bool,
    },
    /// `target: null` (or absent) clears the spotlight
    #[serde(rename_all = "camelCase")]
    Spotlight {
        room_key: String,
        #[serde(default)]
        target: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    EndForAll {
        room_key: String,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        room_key: String,
    },
}

/// Server-to-client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection
    #[serde(rename_all = "camelCase")]
    Connected {
        conn_id: String,
        #[serde(default)]
        ice_servers: Vec<IceServer>,
    },
    /// Gateway-level rejection (malformed frame, rate limit)
    Error {
        message: String,
    },
    LockedRejection,
    #[serde(rename_all = "camelCase")]
    ParticipantJoined {
        stable_id: String,
        display_name: String,
        conn_id: String,
        is_host: bool,
    },
    /// Delivered to a joiner only
    #[serde(rename_all = "camelCase")]
    RoomSnapshot {
        participants: Vec<ParticipantInfo>,
        is_host: bool,
        host_conn_id: String,
        was_muted: bool,
        locked: bool,
        #[serde(default)]
        spotlight: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        conn_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stable_id: Option<String>,
    },
    RelayOffer {
        from: String,
        sdp: Value,
    },
    RelayAnswer {
        from: String,
        sdp: Value,
    },
    RelayCandidate {
        from: String,
        candidate: Value,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        conn_id: String,
        stable_id: String,
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        conn_id: String,
        stable_id: String,
        emoji: String,
    },
    #[serde(rename_all = "camelCase")]
    HandRaised {
        conn_id: String,
        stable_id: String,
        raised: bool,
    },
    #[serde(rename_all = "camelCase")]
    AudioState {
        conn_id: String,
        muted: bool,
    },
    #[serde(rename_all = "camelCase")]
    VideoState {
        conn_id: String,
        off: bool,
    },
    #[serde(rename_all = "camelCase")]
    ScreenShareState {
        conn_id: String,
        stable_id: String,
        sharing: bool,
    },
    #[serde(rename_all = "camelCase")]
    NewHost {
        host_conn_id: String,
    },
    ForcedMute,
    ForcedUnmute,
    AllMuted,
    Removed,
    MeetingEnded,
    LockState {
        locked: bool,
    },
    #[serde(rename_all = "camelCase")]
    SpotlightState {
        conn_id: Option<String>,
    },
}

/// Another participant as seen by a joiner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub conn_id: String,
    pub stable_id: String,
    pub display_name: String,
    pub is_host: bool,
}

/// The three negotiation message kinds the relay forwards point-to-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    pub fn into_message(self, from: String, payload: Value) -> ServerMessage {
        match self {
            RelayKind::Offer => ServerMessage::RelayOffer { from, sdp: payload },
            RelayKind::Answer => ServerMessage::RelayAnswer { from, sdp: payload },
            RelayKind::Candidate => ServerMessage::RelayCandidate { from, candidate: payload },
        }
    }
}

/// Frames that fail validation at the gateway and never reach the coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid {field}: must be 1-{max} characters")]
    InvalidField { field: &'static str, max: usize },
    #[error("{field} too large: limit is {max} bytes")]
    PayloadTooLarge { field: &'static str, max: usize },
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ProtocolError> {
    if value.trim().is_empty() || value.chars().count() > max {
        return Err(ProtocolError::InvalidField { field, max });
    }
    Ok(())
}

impl ClientMessage {
    /// Boundary validation: required fields present and within limits.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(room_key) = self.room_key() {
            check_len("roomKey", room_key, MAX_ROOM_KEY_LEN)?;
        }

        match self {
            ClientMessage::Join { stable_id, display_name, .. } => {
                check_len("stableId", stable_id, MAX_STABLE_ID_LEN)?;
                check_len("displayName", display_name, MAX_DISPLAY_NAME_LEN)?;
            }
            ClientMessage::RelayOffer { target, .. }
            | ClientMessage::RelayAnswer { target, .. }
            | ClientMessage::RelayCandidate { target, .. }
            | ClientMessage::Remove { target, .. }
            | ClientMessage::Mute { target, .. }
            | ClientMessage::Unmute { target, .. } => {
                check_len("target", target, MAX_CONN_ID_LEN)?;
            }
            ClientMessage::Spotlight { target: Some(target), .. } => {
                check_len("target", target, MAX_CONN_ID_LEN)?;
            }
            ClientMessage::Chat { message, .. } => {
                if message.is_null() {
                    return Err(ProtocolError::InvalidField { field: "message", max: MAX_CHAT_BYTES });
                }
                let size = serde_json::to_string(message).map(|s| s.len()).unwrap_or(usize::MAX);
                if size > MAX_CHAT_BYTES {
                    return Err(ProtocolError::PayloadTooLarge { field: "message", max: MAX_CHAT_BYTES });
                }
            }
            ClientMessage::Reaction { emoji, .. } => {
                check_len("emoji", emoji, MAX_EMOJI_LEN)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Room the event is scoped to; relay events are addressed to a connection instead.
    pub fn room_key(&self) -> Option<&str> {
        match self {
            ClientMessage::RelayOffer { .. }
            | ClientMessage::RelayAnswer { .. }
            | ClientMessage::RelayCandidate { .. } => None,
            ClientMessage::Join { room_key, .. }
            | ClientMessage::Chat { room_key, .. }
            | ClientMessage::Reaction { room_key, .. }
            | ClientMessage::RaiseHand { room_key, .. }
            | ClientMessage::AudioToggle { room_key, .. }
            | ClientMessage::VideoToggle { room_key, .. }
            | ClientMessage::ScreenShare { room_key, .. }
            | ClientMessage::Remove { room_key, .. }
            | ClientMessage::Mute { room_key, .. }
            | ClientMessage::Unmute { room_key, .. }
            | ClientMessage::MuteAll { room_key }
            | ClientMessage::UnmuteAll { room_key }
            | ClientMessage::Lock { room_key, .. }
            | ClientMessage::Spotlight { room_key, .. }
            | ClientMessage::EndForAll { room_key }
            | ClientMessage::Leave { room_key } => Some(room_key),
        }
    }
}
