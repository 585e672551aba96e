#![forbid(unsafe_code)]

// Room module - room state, participant tracking, and the coordinator that serializes
// every join, departure, relay, and host command per room.
pub mod control;
pub mod departure;
pub mod host;
pub mod presence;
pub mod registry;
pub mod relay;

use crate::metrics::ServerMetrics;
use crate::signaling::protocol::{ParticipantInfo, ServerMessage};
use departure::PendingDeparture;
use presence::PresenceIndex;
use registry::RoomRegistry;
use relay::ConnectionDirectory;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound channel of one connection, carrying pre-serialized JSON frames.
pub type Outbound = mpsc::Sender<Arc<String>>;

/// One live connection in a room
#[derive(Clone)]
pub struct Participant {
    pub conn_id: String,
    pub stable_id: String,
    pub display_name: String,
    pub sender: Outbound,
}

/// Room state. Only reachable through a `RoomRegistry` lock.
pub struct Room {
    pub key: String,
    host_conn_id: String,
    host_stable_id: String,
    /// Arrival order; host failover promotes the first entry
    participants: Vec<Participant>,
    locked: bool,
    /// Stable identities muted by the host; outlives their connections
    muted: HashSet<String>,
    presence: PresenceIndex,
    spotlight: Option<String>,
    pending_departures: HashMap<String, PendingDeparture>,
    closed: bool,
}

/// Read-only copy of a room's coordination state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    pub key: String,
    pub host_conn_id: String,
    pub host_stable_id: String,
    /// (connection id, stable id) in arrival order
    pub participants: Vec<(String, String)>,
    pub locked: bool,
    /// Sorted
    pub muted: Vec<String>,
    pub spotlight: Option<String>,
    pub pending_departures: usize,
}

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined {
        is_host: bool,
        created: bool,
        /// Older connection of the same identity that this join replaced
        replaced: Option<String>,
    },
    /// Room is locked and the caller is not its host
    Locked,
}

fn encode(message: &ServerMessage) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!("Failed to serialize message: {}", e);
            None
        }
    }
}

/// Queues a pre-serialized frame. Full or closed channels drop it for this recipient only.
fn deliver(sender: &Outbound, conn_id: &str, json: &Arc<String>) -> bool {
    match sender.try_send(json.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Channel full for connection {}, dropping message", conn_id);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Channel closed for connection {} (disconnected)", conn_id);
            false
        }
    }
}

/// Sends one message straight to a connection's channel.
pub fn send_message(sender: &Outbound, conn_id: &str, message: &ServerMessage) -> bool {
    encode(message).is_some_and(|json| deliver(sender, conn_id, &json))
}

impl Room {
    fn new(key: String, host_stable_id: String, host_conn_id: String) -> Self {
        Self {
            key,
            host_conn_id,
            host_stable_id,
            participants: Vec::new(),
            locked: false,
            muted: HashSet::new(),
            presence: PresenceIndex::default(),
            spotlight: None,
            pending_departures: HashMap::new(),
            closed: false,
        }
    }

    pub fn host_conn_id(&self) -> &str {
        &self.host_conn_id
    }

    pub fn host_stable_id(&self) -> &str {
        &self.host_stable_id
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, conn_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.conn_id == conn_id)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_muted(&self, stable_id: &str) -> bool {
        self.muted.contains(stable_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Replaces the entry for the same connection in place, otherwise appends.
    fn insert_participant(&mut self, participant: Participant) {
        match self.participants.iter_mut().find(|p| p.conn_id == participant.conn_id) {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
    }

    fn remove_participant(&mut self, conn_id: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.conn_id == conn_id)?;
        Some(self.participants.remove(index))
    }

    /// Moves the spotlight along with a refreshed connection.
    fn retarget_spotlight(&mut self, stale_conn_id: &str, new_conn_id: &str) -> bool {
        if self.spotlight.as_deref() != Some(stale_conn_id) {
            return false;
        }
        self.spotlight = Some(new_conn_id.to_string());
        true
    }

    /// Clears the spotlight if it names `conn_id` and tells the rest of the room.
    fn release_spotlight(&mut self, conn_id: &str) {
        if self.spotlight.as_deref() == Some(conn_id) {
            self.spotlight = None;
            self.broadcast_all(&ServerMessage::SpotlightState { conn_id: None });
        }
    }

    /// Empties the room: participants, presence, mutes, and pending departure timers.
    fn tear_down(&mut self) -> Vec<Participant> {
        self.cancel_all_departures();
        self.presence.clear();
        self.muted.clear();
        self.spotlight = None;
        std::mem::take(&mut self.participants)
    }

    /// Broadcast a message to all participants except one connection
    fn broadcast_except(&self, except_conn_id: &str, message: &ServerMessage) {
        let Some(json) = encode(message) else { return };
        for participant in self.participants.iter().filter(|p| p.conn_id != except_conn_id) {
            deliver(&participant.sender, &participant.conn_id, &json);
        }
    }

    /// Broadcast a message to all participants
    fn broadcast_all(&self, message: &ServerMessage) {
        self.broadcast_except("", message);
    }

    /// Send a message to a specific participant
    fn send_to(&self, conn_id: &str, message: &ServerMessage) -> bool {
        match self.participant(conn_id) {
            Some(participant) => send_message(&participant.sender, conn_id, message),
            None => false,
        }
    }

    /// What a joiner learns about the room: everyone else, the host, and its own mute state.
    fn snapshot_for(&self, conn_id: &str, stable_id: &str) -> ServerMessage {
        let participants = self
            .participants
            .iter()
            .filter(|p| p.conn_id != conn_id)
            .map(|p| ParticipantInfo {
                conn_id: p.conn_id.clone(),
                stable_id: p.stable_id.clone(),
                display_name: p.display_name.clone(),
                is_host: self.is_host(&p.conn_id),
            })
            .collect();

        ServerMessage::RoomSnapshot {
            participants,
            is_host: self.is_host(conn_id),
            host_conn_id: self.host_conn_id.clone(),
            was_muted: self.is_muted(stable_id),
            locked: self.locked,
            spotlight: self.spotlight.clone(),
        }
    }

    pub fn view(&self) -> RoomView {
        let mut muted: Vec<String> = self.muted.iter().cloned().collect();
        muted.sort();
        RoomView {
            key: self.key.clone(),
            host_conn_id: self.host_conn_id.clone(),
            host_stable_id: self.host_stable_id.clone(),
            participants: self
                .participants
                .iter()
                .map(|p| (p.conn_id.clone(), p.stable_id.clone()))
                .collect(),
            locked: self.locked,
            muted,
            spotlight: self.spotlight.clone(),
            pending_departures: self.pending_departures.len(),
        }
    }
}

/// Entry point for every inbound room event.
///
/// Each operation takes the target room's write lock for its whole duration, so events
/// for one room apply one at a time while different rooms proceed in parallel.
pub struct RoomCoordinator {
    registry: RoomRegistry,
    connections: ConnectionDirectory,
    departure_grace: Duration,
    metrics: ServerMetrics,
}

impl RoomCoordinator {
    pub fn new(departure_grace: Duration, metrics: ServerMetrics) -> Self {
        Self {
            registry: RoomRegistry::new(),
            connections: ConnectionDirectory::default(),
            departure_grace,
            metrics,
        }
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    #[cfg(test)]
    pub(crate) fn departure_grace(&self) -> Duration {
        self.departure_grace
    }

    /// Joins `conn_id` to a room, creating the room with the caller as host if needed.
    ///
    /// A join from an identity already on record under another connection is a refresh:
    /// the stale entry is dropped (and its pending departure cancelled) instead of
    /// producing a duplicate. A connection already seated under a different identity
    /// gives up that identity first. The joiner receives exactly one `room-snapshot`;
    /// everyone else receives one `participant-joined`.
    pub async fn join(
        &self,
        room_key: &str,
        stable_id: &str,
        display_name: &str,
        conn_id: &str,
        sender: Outbound,
    ) -> JoinOutcome {
        let (mut room, created) = self.registry.get_or_create(room_key, stable_id, conn_id).await;
        if created {
            self.metrics.inc_rooms_created();
        }

        // A room is never created locked, so a rejection cannot strand an empty room.
        if room.locked && !room.is_host_identity(stable_id) {
            send_message(&sender, conn_id, &ServerMessage::LockedRejection);
            self.metrics.inc_join_rejections();
            info!("Rejected {} ({}) from locked room {}", display_name, stable_id, room_key);
            return JoinOutcome::Locked;
        }

        let previous_identity = room
            .participant(conn_id)
            .map(|p| p.stable_id.clone())
            .filter(|previous| previous != stable_id);
        if let Some(previous) = &previous_identity {
            info!("Connection {} in room {} switched identity {} -> {}", conn_id, room_key, previous, stable_id);
            room.remove_participant(conn_id);
            room.presence.forget(previous, conn_id);
            room.muted.remove(previous);
            room.broadcast_except(conn_id, &ServerMessage::ParticipantLeft {
                conn_id: conn_id.to_string(),
                stable_id: Some(previous.clone()),
            });
            room.rebind_host_identity(conn_id, stable_id);
        }

        let mut spotlight_moved = false;
        let replaced = room.presence.record(stable_id, conn_id);
        if let Some(stale) = &replaced {
            info!("Refresh detected in room {}: {} {} -> {}", room_key, stable_id, stale, conn_id);
            room.cancel_departure(stale);
            room.remove_participant(stale);
            room.broadcast_except(conn_id, &ServerMessage::ParticipantLeft {
                conn_id: stale.clone(),
                stable_id: Some(stable_id.to_string()),
            });
            room.retarget_host(stale, conn_id);
            spotlight_moved = room.retarget_spotlight(stale, conn_id);
            self.metrics.inc_refreshes();
        }

        if room.restore_host(stable_id, conn_id) {
            info!("Restored host status to {} ({}) in room {}", display_name, stable_id, room_key);
        }

        room.insert_participant(Participant {
            conn_id: conn_id.to_string(),
            stable_id: stable_id.to_string(),
            display_name: display_name.to_string(),
            sender,
        });

        let is_host = room.is_host(conn_id);

        room.broadcast_except(conn_id, &ServerMessage::ParticipantJoined {
            stable_id: stable_id.to_string(),
            display_name: display_name.to_string(),
            conn_id: conn_id.to_string(),
            is_host,
        });
        if spotlight_moved {
            room.broadcast_except(conn_id, &ServerMessage::SpotlightState { conn_id: Some(conn_id.to_string()) });
        }

        let snapshot = room.snapshot_for(conn_id, stable_id);
        room.send_to(conn_id, &snapshot);

        self.metrics.inc_joins();
        info!(
            "{} ({}) joined room {} as {} (host: {}, muted: {}, participants: {})",
            display_name,
            stable_id,
            room_key,
            conn_id,
            is_host,
            room.is_muted(stable_id),
            room.len()
        );

        JoinOutcome::Joined { is_host, created, replaced }
    }

    /// Copy of a room's state, if the room exists.
    pub async fn inspect(&self, room_key: &str) -> Option<RoomView> {
        self.registry.read(room_key).await.map(|room| room.view())
    }

    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    /// Participants across all rooms. Rooms locked at the time of sampling are skipped.
    pub fn total_participant_count(&self) -> usize {
        self.registry
            .handles()
            .iter()
            .filter_map(|handle| handle.try_read().ok().map(|room| room.len()))
            .sum()
    }

    /// Ends every room: pending departures are cancelled and everyone gets `meeting-ended`.
    pub async fn shutdown(&self) {
        info!("Shutting down all rooms...");
        let handles = self.registry.handles();
        let mut ended = 0;

        for handle in handles {
            let mut room = handle.write_owned().await;
            if room.closed {
                continue;
            }
            room.broadcast_all(&ServerMessage::MeetingEnded);
            let participants = room.tear_down();
            self.registry.remove(&mut room);
            info!("Shut down room {} ({} participants)", room.key, participants.len());
            ended += 1;
        }

        info!("All rooms shut down ({} total)", ended);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::mpsc;

    pub(crate) fn client() -> (Outbound, mpsc::Receiver<Arc<String>>) {
        mpsc::channel(64)
    }

    pub(crate) fn participant(conn_id: &str, stable_id: &str, sender: Outbound) -> Participant {
        Participant {
            conn_id: conn_id.to_string(),
            stable_id: stable_id.to_string(),
            display_name: format!("user {stable_id}"),
            sender,
        }
    }

    /// Everything queued for a client so far, decoded.
    pub(crate) fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(json) = rx.try_recv() {
            messages.push(serde_json::from_str(&json).expect("server frames decode"));
        }
        messages
    }

    pub(crate) fn coordinator() -> Arc<RoomCoordinator> {
        Arc::new(RoomCoordinator::new(Duration::from_millis(1500), ServerMetrics::new()))
    }

    /// Joins and returns the receiving end for the new connection.
    pub(crate) async fn join(
        coordinator: &RoomCoordinator,
        room_key: &str,
        stable_id: &str,
        conn_id: &str,
    ) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = client();
        coordinator.register_connection(conn_id, tx.clone());
        coordinator.join(room_key, stable_id, &format!("user {stable_id}"), conn_id, tx).await;
        rx
    }

    #[tokio::test]
    async fn test_first_joiner_creates_room_and_is_host() {
        let coordinator = coordinator();
        let (tx, mut rx) = client();

        let outcome = coordinator.join("r1", "A", "Alice", "c1", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: true, created: true, replaced: None });

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::RoomSnapshot {
                participants: vec![],
                is_host: true,
                host_conn_id: "c1".into(),
                was_muted: false,
                locked: false,
                spotlight: None,
            }]
        );
        assert_eq!(coordinator.room_count(), 1);
    }

    #[tokio::test]
    async fn test_second_joiner_sees_host_and_is_announced() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        drain(&mut rx_a);

        let (tx_b, mut rx_b) = client();
        let outcome = coordinator.join("r1", "B", "Bob", "c2", tx_b).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: false, created: false, replaced: None });

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::RoomSnapshot {
                participants: vec![ParticipantInfo {
                    conn_id: "c1".into(),
                    stable_id: "A".into(),
                    display_name: "user A".into(),
                    is_host: true,
                }],
                is_host: false,
                host_conn_id: "c1".into(),
                was_muted: false,
                locked: false,
                spotlight: None,
            }]
        );
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ParticipantJoined {
                stable_id: "B".into(),
                display_name: "Bob".into(),
                conn_id: "c2".into(),
                is_host: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces_entry_without_duplicate() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;
        drain(&mut rx_a);

        let (tx, mut rx_b2) = client();
        let outcome = coordinator.join("r1", "B", "Bob", "c3", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: false, created: false, replaced: Some("c2".into()) });

        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.participants, vec![("c1".to_string(), "A".to_string()), ("c3".to_string(), "B".to_string())]);

        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::ParticipantLeft { conn_id: "c2".into(), stable_id: Some("B".into()) },
                ServerMessage::ParticipantJoined {
                    stable_id: "B".into(),
                    display_name: "Bob".into(),
                    conn_id: "c3".into(),
                    is_host: false,
                },
            ]
        );
        let snapshot = drain(&mut rx_b2);
        assert!(matches!(&snapshot[..], [ServerMessage::RoomSnapshot { participants, .. }] if participants.len() == 1));
    }

    #[tokio::test]
    async fn test_host_refresh_keeps_host_identity() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let mut rx_b = join(&coordinator, "r1", "B", "c2").await;
        drain(&mut rx_b);

        let (tx, mut rx_a2) = client();
        let outcome = coordinator.join("r1", "A", "Alice", "c9", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: true, created: false, replaced: Some("c1".into()) });

        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.host_conn_id, "c9");
        assert_eq!(view.host_stable_id, "A");

        assert!(matches!(
            &drain(&mut rx_a2)[..],
            [ServerMessage::RoomSnapshot { is_host: true, host_conn_id, .. }] if host_conn_id == "c9"
        ));
        assert_eq!(
            drain(&mut rx_b)[1],
            ServerMessage::ParticipantJoined {
                stable_id: "A".into(),
                display_name: "Alice".into(),
                conn_id: "c9".into(),
                is_host: true,
            }
        );
    }

    #[tokio::test]
    async fn test_identity_switch_on_seated_connection_releases_old_identity() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let (tx, mut rx_c2) = client();
        coordinator.join("r1", "B", "Bob", "c2", tx.clone()).await;
        drain(&mut rx_a);

        let outcome = coordinator.join("r1", "X", "Xena", "c2", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: false, created: false, replaced: None });
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::ParticipantLeft { conn_id: "c2".into(), stable_id: Some("B".into()) },
                ServerMessage::ParticipantJoined {
                    stable_id: "X".into(),
                    display_name: "Xena".into(),
                    conn_id: "c2".into(),
                    is_host: false,
                },
            ]
        );

        let (tx, _rx_c9) = client();
        let outcome = coordinator.join("r1", "B", "Bob", "c9", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: false, created: false, replaced: None });

        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(
            view.participants,
            vec![
                ("c1".to_string(), "A".to_string()),
                ("c2".to_string(), "X".to_string()),
                ("c9".to_string(), "B".to_string()),
            ]
        );
        assert!(!drain(&mut rx_c2).iter().any(|m| matches!(
            m,
            ServerMessage::Removed | ServerMessage::ParticipantLeft { .. }
        )));
    }

    #[tokio::test]
    async fn test_host_connection_keeps_seat_across_identity_switch() {
        let coordinator = coordinator();
        let (tx, _rx) = client();
        coordinator.join("r1", "A", "Alice", "c1", tx.clone()).await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;

        let outcome = coordinator.join("r1", "Z", "Zed", "c1", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: true, created: false, replaced: None });
        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.host_conn_id, "c1");
        assert_eq!(view.host_stable_id, "Z");
    }

    #[tokio::test]
    async fn test_spotlight_follows_refresh_and_clears_on_departure() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;
        coordinator.spotlight("r1", "c1", Some("c2")).await;
        drain(&mut rx_a);

        let _rx_b2 = join(&coordinator, "r1", "B", "c3").await;
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::ParticipantLeft { conn_id: "c2".into(), stable_id: Some("B".into()) },
                ServerMessage::ParticipantJoined {
                    stable_id: "B".into(),
                    display_name: "user B".into(),
                    conn_id: "c3".into(),
                    is_host: false,
                },
                ServerMessage::SpotlightState { conn_id: Some("c3".into()) },
            ]
        );
        assert_eq!(coordinator.inspect("r1").await.unwrap().spotlight.as_deref(), Some("c3"));

        coordinator.leave("r1", "c3").await;
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::ParticipantLeft { conn_id: "c3".into(), stable_id: Some("B".into()) },
                ServerMessage::SpotlightState { conn_id: None },
            ]
        );
        assert_eq!(coordinator.inspect("r1").await.unwrap().spotlight, None);
    }

    #[tokio::test]
    async fn test_locked_room_rejects_non_host() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r2", "A", "c1").await;
        coordinator.set_lock("r2", "c1", true).await;

        let (tx, mut rx_d) = client();
        let outcome = coordinator.join("r2", "D", "Dana", "c4", tx).await;
        assert_eq!(outcome, JoinOutcome::Locked);
        assert_eq!(drain(&mut rx_d), vec![ServerMessage::LockedRejection]);

        let view = coordinator.inspect("r2").await.unwrap();
        assert_eq!(view.participants.len(), 1);
        assert!(view.locked);
    }

    #[tokio::test]
    async fn test_locked_room_admits_its_host_identity() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r2", "A", "c1").await;
        coordinator.set_lock("r2", "c1", true).await;

        let (tx, mut rx) = client();
        let outcome = coordinator.join("r2", "A", "Alice", "c5", tx).await;
        assert_eq!(outcome, JoinOutcome::Joined { is_host: true, created: false, replaced: Some("c1".into()) });
        assert!(matches!(&drain(&mut rx)[..], [ServerMessage::RoomSnapshot { locked: true, .. }]));
    }

    #[tokio::test]
    async fn test_participant_count_tracks_distinct_identities() {
        let coordinator = coordinator();
        let _a = join(&coordinator, "r1", "A", "c1").await;
        let _b = join(&coordinator, "r1", "B", "c2").await;
        let _b2 = join(&coordinator, "r1", "B", "c3").await;
        let _b3 = join(&coordinator, "r1", "B", "c4").await;
        let _c = join(&coordinator, "r1", "C", "c5").await;

        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.participants.len(), 3);
        assert_eq!(coordinator.total_participant_count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_ends_every_room() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let mut rx_b = join(&coordinator, "r2", "B", "c2").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        coordinator.shutdown().await;

        assert_eq!(drain(&mut rx_a), vec![ServerMessage::MeetingEnded]);
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::MeetingEnded]);
        assert_eq!(coordinator.room_count(), 0);
    }
}
