#![forbid(unsafe_code)]

// Host authority. A room tracks its host twice: the live connection (changes on refresh)
// and the stable identity (changes only when the host genuinely departs).

use super::Room;
use tracing::info;

impl Room {
    pub fn is_host(&self, conn_id: &str) -> bool {
        self.host_conn_id == conn_id
    }

    pub fn is_host_identity(&self, stable_id: &str) -> bool {
        self.host_stable_id == stable_id
    }

    /// Refresh of the host connection: the identity keeps host status on its new connection.
    pub(super) fn retarget_host(&mut self, stale_conn_id: &str, new_conn_id: &str) -> bool {
        if self.host_conn_id != stale_conn_id {
            return false;
        }
        info!("Room {}: host connection {} -> {}", self.key, stale_conn_id, new_conn_id);
        self.host_conn_id = new_conn_id.to_string();
        true
    }

    /// The persistent host identity always takes the host seat back on (re)join.
    pub(super) fn restore_host(&mut self, stable_id: &str, conn_id: &str) -> bool {
        if !self.is_host_identity(stable_id) || self.host_conn_id == conn_id {
            return false;
        }
        self.host_conn_id = conn_id.to_string();
        true
    }

    /// A host connection that rejoins under another identity keeps the seat.
    pub(super) fn rebind_host_identity(&mut self, conn_id: &str, stable_id: &str) -> bool {
        if !self.is_host(conn_id) || self.is_host_identity(stable_id) {
            return false;
        }
        self.host_stable_id = stable_id.to_string();
        true
    }

    /// Promotes the earliest remaining joiner by arrival order. Returns the new host connection.
    pub(super) fn fail_over(&mut self) -> Option<String> {
        let next = self.participants.first()?;
        self.host_conn_id = next.conn_id.clone();
        self.host_stable_id = next.stable_id.clone();
        info!("Room {}: host failed over to {} ({})", self.key, next.stable_id, next.conn_id);
        Some(self.host_conn_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::room::tests::{client, participant};
    use crate::room::Room;

    fn room_with(members: &[(&str, &str)]) -> Room {
        let (host_conn, host_stable) = members[0];
        let mut room = Room::new("r1".into(), host_stable.into(), host_conn.into());
        for (conn, stable) in members {
            let (tx, _rx) = client();
            room.insert_participant(participant(conn, stable, tx));
        }
        room
    }

    #[test]
    fn test_retarget_only_moves_host_connection() {
        let mut room = room_with(&[("c1", "A"), ("c2", "B")]);
        assert!(!room.retarget_host("c2", "c3"));
        assert!(room.retarget_host("c1", "c3"));
        assert_eq!(room.host_conn_id(), "c3");
        assert_eq!(room.host_stable_id(), "A");
    }

    #[test]
    fn test_restore_host_for_persistent_identity() {
        let mut room = room_with(&[("c1", "A"), ("c2", "B")]);
        assert!(!room.restore_host("B", "c9"));
        assert!(room.restore_host("A", "c9"));
        assert!(room.is_host("c9"));
        assert!(!room.restore_host("A", "c9"));
    }

    #[test]
    fn test_rebind_host_identity_only_for_host_connection() {
        let mut room = room_with(&[("c1", "A"), ("c2", "B")]);
        assert!(!room.rebind_host_identity("c2", "X"));
        assert!(room.rebind_host_identity("c1", "Z"));
        assert_eq!(room.host_stable_id(), "Z");
        assert_eq!(room.host_conn_id(), "c1");
        assert!(!room.rebind_host_identity("c1", "Z"));
    }

    #[test]
    fn test_fail_over_picks_earliest_remaining_joiner() {
        let mut room = room_with(&[("c1", "A"), ("c2", "B"), ("c3", "C")]);
        room.remove_participant("c1");
        assert_eq!(room.fail_over().as_deref(), Some("c2"));
        assert_eq!(room.host_stable_id(), "B");

        room.remove_participant("c2");
        room.remove_participant("c3");
        assert_eq!(room.fail_over(), None);
    }
}
