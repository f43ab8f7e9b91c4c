use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use floe_core::model::{PresenceMember, Room};

/// Read-mostly room list, refreshed by wholesale reload. The sync core
/// never mutates rooms incrementally; only presence pushes update the
/// online membership.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: RwLock<Vec<Room>>,
    members: RwLock<HashMap<String, Vec<PresenceMember>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the room list wholesale, re-applying the online counts known
    /// from presence.
    pub fn refresh(&self, mut rooms: Vec<Room>) {
        let members = self.members.read().unwrap();
        for room in &mut rooms {
            if let Some(online) = members.get(&room.id) {
                room.online_count = online.len() as u32;
            }
        }
        drop(members);

        debug!(count = rooms.len(), "room list refreshed");
        *self.rooms.write().unwrap() = rooms;
    }

    /// Replace a room's connected-member roster from a presence push.
    pub fn set_members(&self, room_id: &str, members: Vec<PresenceMember>) {
        let online = members.len() as u32;
        self.members
            .write()
            .unwrap()
            .insert(room_id.to_string(), members);

        let mut rooms = self.rooms.write().unwrap();
        if let Some(room) = rooms.iter_mut().find(|r| r.id == room_id) {
            room.online_count = online;
        }
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.read().unwrap().clone()
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms
            .read()
            .unwrap()
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
    }

    pub fn members(&self, room_id: &str) -> Vec<PresenceMember> {
        self.members
            .read()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn forget_members(&self, room_id: &str) {
        self.members.write().unwrap().remove(room_id);
    }
}
