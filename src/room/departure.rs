#![forbid(unsafe_code)]

// Departures. An explicit leave finalizes at once; an abrupt disconnect parks the
// connection in a grace window so a page refresh can reclaim its seat first.

use super::{Room, RoomCoordinator};
use crate::signaling::protocol::ServerMessage;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A disconnect waiting out its grace window
pub struct PendingDeparture {
    pub stable_id: String,
    timer: JoinHandle<()>,
}

impl Room {
    /// Aborts the grace timer for `conn_id`. Returns whether one was pending.
    pub(super) fn cancel_departure(&mut self, conn_id: &str) -> bool {
        match self.pending_departures.remove(conn_id) {
            Some(pending) => {
                pending.timer.abort();
                debug!("Cancelled pending departure of {} ({}) in room {}", conn_id, pending.stable_id, self.key);
                true
            }
            None => false,
        }
    }

    pub(super) fn cancel_all_departures(&mut self) {
        for (_, pending) in self.pending_departures.drain() {
            pending.timer.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_departing(&self, conn_id: &str) -> bool {
        self.pending_departures.contains_key(conn_id)
    }
}

impl RoomCoordinator {
    /// Explicit leave: no grace window. Ignored unless `conn_id` is in the room.
    pub async fn leave(&self, room_key: &str, conn_id: &str) -> bool {
        let Some(mut room) = self.registry.lock(room_key).await else {
            debug!("Leave from {} for unknown room {}", conn_id, room_key);
            return false;
        };
        if room.participant(conn_id).is_none() {
            debug!("Leave from {} ignored: not in room {}", conn_id, room_key);
            return false;
        }

        room.cancel_departure(conn_id);
        self.metrics.inc_leaves();
        self.finalize_departure(&mut room, conn_id)
    }

    /// Abrupt disconnect: the departure is finalized after the grace window unless a
    /// refresh of the same identity cancels it first.
    pub async fn disconnect(self: &Arc<Self>, room_key: &str, conn_id: &str) {
        let Some(mut room) = self.registry.lock(room_key).await else {
            return;
        };
        let Some(stable_id) = room.participant(conn_id).map(|p| p.stable_id.clone()) else {
            debug!("Disconnect of {} in room {}: already superseded", conn_id, room_key);
            return;
        };

        let coordinator = Arc::clone(self);
        let key = room_key.to_string();
        let conn = conn_id.to_string();
        let grace = self.departure_grace;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            coordinator.expire_departure(&key, &conn).await;
        });

        room.cancel_departure(conn_id);
        debug!(
            "Connection {} ({}) dropped from room {}, departing in {:?}",
            conn_id, stable_id, room_key, grace
        );
        room.pending_departures
            .insert(conn_id.to_string(), PendingDeparture { stable_id, timer });
    }

    async fn expire_departure(&self, room_key: &str, conn_id: &str) {
        let Some(mut room) = self.registry.lock(room_key).await else {
            return;
        };
        // Cancelled after the timer fired but before it got the lock.
        if room.pending_departures.remove(conn_id).is_none() {
            debug!("Departure of {} in room {} was cancelled", conn_id, room_key);
            return;
        }
        self.finalize_departure(&mut room, conn_id);
    }

    /// Removes `conn_id` for good, or drops it silently when a newer connection of the
    /// same identity has taken over. Deletes the room once empty, otherwise fails the host
    /// over if the departing connection held it. Returns whether a departure was announced.
    pub(super) fn finalize_departure(&self, room: &mut Room, conn_id: &str) -> bool {
        let Some(participant) = room.remove_participant(conn_id) else {
            debug!("Departure of {} in room {} superseded", conn_id, room.key);
            return false;
        };
        let stable_id = participant.stable_id;

        let superseded = room.presence.superseded(&stable_id, conn_id)
            || (room.is_host_identity(&stable_id) && !room.is_host(conn_id));
        if superseded {
            debug!(
                "Departure of {} ({}) in room {} superseded by a newer connection",
                conn_id, stable_id, room.key
            );
            room.presence.forget(&stable_id, conn_id);
            room.release_spotlight(conn_id);
            return false;
        }

        let was_host = room.is_host(conn_id);
        room.presence.forget(&stable_id, conn_id);
        room.muted.remove(&stable_id);

        room.broadcast_all(&ServerMessage::ParticipantLeft {
            conn_id: conn_id.to_string(),
            stable_id: Some(stable_id.clone()),
        });
        room.release_spotlight(conn_id);
        self.metrics.inc_departures_finalized();
        info!(
            "{} ({}) left room {} ({} remaining)",
            stable_id,
            conn_id,
            room.key,
            room.len()
        );

        if room.is_empty() {
            room.cancel_all_departures();
            self.registry.remove(room);
        } else if was_host {
            if let Some(host_conn_id) = room.fail_over() {
                room.broadcast_all(&ServerMessage::NewHost { host_conn_id });
                self.metrics.inc_host_failovers();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::room::tests::{client, coordinator, drain, join};
    use crate::signaling::protocol::ServerMessage;
    use std::time::Duration;

    const PAST_GRACE: Duration = Duration::from_millis(1600);

    #[tokio::test(start_paused = true)]
    async fn test_leave_finalizes_immediately() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;
        drain(&mut rx_a);

        assert!(coordinator.leave("r1", "c2").await);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ParticipantLeft { conn_id: "c2".into(), stable_id: Some("B".into()) }]
        );
        assert_eq!(coordinator.inspect("r1").await.unwrap().participants.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_from_non_member_is_ignored() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        drain(&mut rx_a);

        assert!(!coordinator.leave("r1", "c9").await);
        assert!(!coordinator.leave("nope", "c1").await);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_leave_deletes_room() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        coordinator.leave("r1", "c1").await;
        assert_eq!(coordinator.room_count(), 0);
        assert!(coordinator.inspect("r1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_waits_for_grace_window() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;
        drain(&mut rx_a);

        coordinator.disconnect("r1", "c2").await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(coordinator.inspect("r1").await.unwrap().pending_departures, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ParticipantLeft { conn_id: "c2".into(), stable_id: Some("B".into()) }]
        );
        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.participants.len(), 1);
        assert_eq!(view.pending_departures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_departure_cancelled_after_timer_fired_is_not_announced() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let mut rx_b = join(&coordinator, "r1", "B", "c2").await;
        drain(&mut rx_b);

        coordinator.disconnect("r1", "c1").await;
        let mut room = coordinator.registry().lock("r1").await.unwrap();
        assert!(room.is_departing("c1"));

        // The timer fires while the room is held and queues behind this guard.
        tokio::time::sleep(coordinator.departure_grace() + Duration::from_millis(100)).await;
        // A refresh landing now drops the pending entry after abort can no longer help.
        let fired = room.pending_departures.remove("c1");
        assert!(fired.is_some());
        drop(room);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(drain(&mut rx_b).is_empty());
        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.participants.len(), 2);
        assert_eq!(view.host_conn_id, "c1");
        assert_eq!(coordinator.metrics().host_failovers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_refresh_within_grace_never_fails_over() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let mut rx_b = join(&coordinator, "r1", "B", "c2").await;
        drain(&mut rx_b);

        coordinator.disconnect("r1", "c1").await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _rx_a2 = join(&coordinator, "r1", "A", "c3").await;
        tokio::time::sleep(PAST_GRACE).await;

        let messages = drain(&mut rx_b);
        assert!(!messages.iter().any(|m| matches!(m, ServerMessage::NewHost { .. })));
        assert_eq!(
            messages,
            vec![
                ServerMessage::ParticipantLeft { conn_id: "c1".into(), stable_id: Some("A".into()) },
                ServerMessage::ParticipantJoined {
                    stable_id: "A".into(),
                    display_name: "user A".into(),
                    conn_id: "c3".into(),
                    is_host: true,
                },
            ]
        );

        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.host_stable_id, "A");
        assert_eq!(view.host_conn_id, "c3");
        assert_eq!(view.pending_departures, 0);
        assert_eq!(coordinator.metrics().host_failovers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_departure_elects_earliest_joiner_once() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let mut rx_b = join(&coordinator, "r1", "B", "c2").await;
        let mut rx_c = join(&coordinator, "r1", "C", "c3").await;
        drain(&mut rx_b);
        drain(&mut rx_c);

        coordinator.disconnect("r1", "c1").await;
        tokio::time::sleep(PAST_GRACE).await;

        let expected = vec![
            ServerMessage::ParticipantLeft { conn_id: "c1".into(), stable_id: Some("A".into()) },
            ServerMessage::NewHost { host_conn_id: "c2".into() },
        ];
        assert_eq!(drain(&mut rx_b), expected);
        assert_eq!(drain(&mut rx_c), expected);

        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.host_conn_id, "c2");
        assert_eq!(view.host_stable_id, "B");
        assert_eq!(coordinator.metrics().host_failovers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_over_host_keeps_seat_when_old_host_returns() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;

        coordinator.disconnect("r1", "c1").await;
        tokio::time::sleep(PAST_GRACE).await;

        let (tx, mut rx_a2) = client();
        coordinator.join("r1", "A", "Alice", "c4", tx).await;
        assert!(matches!(
            &drain(&mut rx_a2)[..],
            [ServerMessage::RoomSnapshot { is_host: false, host_conn_id, .. }] if host_conn_id == "c2"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_identity_survives_refresh_but_not_departure() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;
        coordinator.mute("r1", "c1", "c2").await;

        coordinator.disconnect("r1", "c2").await;
        let (tx, mut rx_b2) = client();
        coordinator.join("r1", "B", "Bob", "c3", tx).await;
        assert!(matches!(&drain(&mut rx_b2)[..], [ServerMessage::RoomSnapshot { was_muted: true, .. }]));
        tokio::time::sleep(PAST_GRACE).await;
        assert_eq!(coordinator.inspect("r1").await.unwrap().muted, vec!["B".to_string()]);

        coordinator.disconnect("r1", "c3").await;
        tokio::time::sleep(PAST_GRACE).await;
        assert!(coordinator.inspect("r1").await.unwrap().muted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_of_replaced_connection_is_noop() {
        let coordinator = coordinator();
        let mut rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;
        let _rx_b2 = join(&coordinator, "r1", "B", "c3").await;
        drain(&mut rx_a);

        coordinator.disconnect("r1", "c2").await;
        tokio::time::sleep(PAST_GRACE).await;

        assert!(drain(&mut rx_a).is_empty());
        let view = coordinator.inspect("r1").await.unwrap();
        assert_eq!(view.participants, vec![("c1".to_string(), "A".to_string()), ("c3".to_string(), "B".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_everyone_dropping_deletes_room() {
        let coordinator = coordinator();
        let _rx_a = join(&coordinator, "r1", "A", "c1").await;
        let _rx_b = join(&coordinator, "r1", "B", "c2").await;

        coordinator.disconnect("r1", "c1").await;
        coordinator.disconnect("r1", "c2").await;
        tokio::time::sleep(PAST_GRACE).await;

        assert_eq!(coordinator.room_count(), 0);
    }
}
