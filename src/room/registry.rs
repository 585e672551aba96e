#![forbid(unsafe_code)]

// Room registry - owns the room key -> room state mapping.
//
// The outer map is behind a std RwLock held only for lookups and inserts, never across
// an await. Each room has its own tokio RwLock, so work on one room never waits on another.

use super::Room;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as TokioRwLock};
use tracing::info;

pub type RoomHandle = Arc<TokioRwLock<Room>>;
pub type RoomGuard = OwnedRwLockWriteGuard<Room>;
pub type RoomReadGuard = OwnedRwLockReadGuard<Room>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: StdRwLock<HashMap<String, RoomHandle>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write-locks the room for `room_key`, creating it with the creator as host when absent.
    ///
    /// Returns the guard and whether the room was created by this call. A freshly created
    /// room is locked before it becomes visible, so no other caller observes it without
    /// its creator.
    pub async fn get_or_create(
        &self,
        room_key: &str,
        creator_stable_id: &str,
        creator_conn_id: &str,
    ) -> (RoomGuard, bool) {
        loop {
            let (handle, created) = {
                let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
                match rooms.get(room_key) {
                    Some(existing) => (existing.clone(), false),
                    None => {
                        let handle = Arc::new(TokioRwLock::new(Room::new(
                            room_key.to_string(),
                            creator_stable_id.to_string(),
                            creator_conn_id.to_string(),
                        )));
                        rooms.insert(room_key.to_string(), handle.clone());
                        info!("Created room {}, host {} ({})", room_key, creator_stable_id, creator_conn_id);
                        match handle.clone().try_write_owned() {
                            Ok(guard) => return (guard, true),
                            Err(_) => (handle, true),
                        }
                    }
                }
            };

            let guard = handle.write_owned().await;
            if !guard.closed {
                return (guard, created);
            }
            // Torn down while we waited; its key is free again.
        }
    }

    pub fn get(&self, room_key: &str) -> Option<RoomHandle> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.get(room_key).cloned()
    }

    /// Write-locks an existing room. `None` if the key is unknown.
    pub async fn lock(&self, room_key: &str) -> Option<RoomGuard> {
        loop {
            let guard = self.get(room_key)?.write_owned().await;
            if !guard.closed {
                return Some(guard);
            }
        }
    }

    /// Read-locks an existing room. `None` if the key is unknown.
    pub async fn read(&self, room_key: &str) -> Option<RoomReadGuard> {
        loop {
            let guard = self.get(room_key)?.read_owned().await;
            if !guard.closed {
                return Some(guard);
            }
        }
    }

    /// Deletes a room the caller holds the write lock for. Refuses while participants remain.
    ///
    /// Holding an open room's write lock means the map entry for its key is that room,
    /// since rooms only leave the map through this call.
    pub fn remove(&self, room: &mut Room) -> bool {
        if !room.is_empty() {
            return false;
        }
        room.closed = true;
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        rooms.remove(&room.key);
        info!("Room {} deleted", room.key);
        true
    }

    pub fn len(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handles(&self) -> Vec<RoomHandle> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.values().cloned().collect()
    }
}
