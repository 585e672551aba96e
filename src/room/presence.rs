#![forbid(unsafe_code)]

// Presence index - the latest connection seen for each stable identity in a room.
// A join whose identity already points at another connection is a refresh, not a new joiner.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct PresenceIndex {
    by_identity: HashMap<String, String>,
}

impl PresenceIndex {
    pub fn current(&self, stable_id: &str) -> Option<&str> {
        self.by_identity.get(stable_id).map(String::as_str)
    }

    /// Points `stable_id` at `conn_id`. Returns the connection it displaced, if different.
    pub fn record(&mut self, stable_id: &str, conn_id: &str) -> Option<String> {
        self.by_identity
            .insert(stable_id.to_string(), conn_id.to_string())
            .filter(|previous| previous != conn_id)
    }

    /// True when a connection other than `conn_id` is on record for `stable_id`.
    pub fn superseded(&self, stable_id: &str, conn_id: &str) -> bool {
        self.current(stable_id).is_some_and(|current| current != conn_id)
    }

    /// Drops the entry only if it still names `conn_id`; a newer connection's entry is kept.
    pub fn forget(&mut self, stable_id: &str, conn_id: &str) -> bool {
        if self.current(stable_id) == Some(conn_id) {
            self.by_identity.remove(stable_id);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.by_identity.clear();
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}
