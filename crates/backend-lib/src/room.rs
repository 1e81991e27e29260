//! Rooms and the room store.
//!
//! A room refers to its members by private token rather than by reference;
//! every projection resolves the roster through the session store, so tearing
//! a client down can never leave a dangling host pointer.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::messages::{RoomRecord, RoomSettings, VideoDetails};
use crate::session::{PrivateToken, SessionStore};

/// Upper bound on the viewer list; the host does not count against it.
pub const ROOM_CAPACITY: usize = 10;

/// Short opaque room identifier, unique among live rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: RoomId,
    pub host: PrivateToken,
    pub viewers: Vec<PrivateToken>,
    pub video_details: VideoDetails,
    pub settings: RoomSettings,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl Room {
    pub fn new(room_id: RoomId, host: PrivateToken, settings: RoomSettings, created_at: i64) -> Self {
        Self {
            room_id,
            host,
            viewers: Vec::with_capacity(ROOM_CAPACITY),
            video_details: VideoDetails::default(),
            settings,
            created_at,
        }
    }

    pub fn add_viewer(&mut self, viewer: PrivateToken) {
        self.viewers.push(viewer);
    }

    pub fn remove_viewer(&mut self, viewer: &PrivateToken) {
        self.viewers.retain(|token| token != viewer);
    }

    pub fn has_viewer(&self, viewer: &PrivateToken) -> bool {
        self.viewers.contains(viewer)
    }

    pub fn is_full(&self) -> bool {
        self.viewers.len() >= ROOM_CAPACITY
    }

    /// The peer-visible projection of this room. Members missing from the
    /// session store are skipped; the roster is best-effort over what is
    /// still registered.
    pub fn record(&self, sessions: &SessionStore) -> RoomRecord {
        let host = match sessions.get(&self.host) {
            Some(client) => client.record(),
            None => {
                warn!(room = %self.room_id, host = %self.host, "room host missing from session store");
                Default::default()
            }
        };

        let viewers = self
            .viewers
            .iter()
            .filter_map(|token| match sessions.get(token) {
                Some(client) => Some(client.record()),
                None => {
                    warn!(room = %self.room_id, viewer = %token, "room viewer missing from session store");
                    None
                }
            })
            .collect();

        RoomRecord {
            room_id: self.room_id.clone(),
            host,
            viewers,
            settings: self.settings.clone(),
            created_at: self.created_at,
        }
    }
}

/// Live rooms by id.
#[derive(Debug, Default)]
pub struct RoomStore {
    by_id: HashMap<RoomId, Room>,
}

impl RoomStore {
    pub fn register(&mut self, room: Room) {
        self.by_id.insert(room.room_id.clone(), room);
    }

    pub fn unregister(&mut self, room_id: &RoomId) -> Option<Room> {
        self.by_id.remove(room_id)
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.by_id.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.by_id.get_mut(room_id)
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.by_id.contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Mints a candidate id from the head of a fresh random identifier,
    /// re-rolling until it misses every live room.
    pub fn mint_id(&self) -> RoomId {
        loop {
            let candidate = Uuid::new_v4().simple().to_string();
            let candidate = RoomId::new(&candidate[..8]);
            if !self.by_id.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Client, PublicToken};

    fn store_with(clients: &[(&str, &str, &str)]) -> SessionStore {
        let mut sessions = SessionStore::default();
        for (private, public, name) in clients {
            let mut client = Client::new(PrivateToken::new(*private));
            client.public_token = PublicToken::new(*public);
            client.name = (*name).to_string();
            sessions.register(client).unwrap();
        }
        sessions
    }

    fn room() -> Room {
        Room::new(
            RoomId::new("abcd1234"),
            PrivateToken::new("host"),
            RoomSettings {
                name: "Movie night".into(),
            },
            1_700_000_000_000,
        )
    }

    #[test]
    fn minted_ids_are_short_and_unique() {
        let mut rooms = RoomStore::default();
        let first = rooms.mint_id();
        assert_eq!(first.as_str().len(), 8);

        rooms.register(Room::new(
            first.clone(),
            PrivateToken::new("host"),
            RoomSettings::default(),
            0,
        ));
        let second = rooms.mint_id();
        assert_ne!(first, second);
    }

    #[test]
    fn viewer_list_add_and_remove() {
        let mut room = room();
        room.add_viewer(PrivateToken::new("v1"));
        room.add_viewer(PrivateToken::new("v2"));
        assert!(room.has_viewer(&PrivateToken::new("v1")));

        room.remove_viewer(&PrivateToken::new("v1"));
        assert!(!room.has_viewer(&PrivateToken::new("v1")));
        assert_eq!(room.viewers.len(), 1);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut room = room();
        for index in 0..ROOM_CAPACITY {
            room.add_viewer(PrivateToken::new(format!("v{index}")));
        }
        assert!(room.is_full());
    }

    #[test]
    fn record_projects_public_fields_in_order() {
        let sessions = store_with(&[
            ("host", "q-host", "Host"),
            ("v1", "q-v1", "First"),
            ("v2", "q-v2", "Second"),
        ]);
        let mut room = room();
        room.add_viewer(PrivateToken::new("v1"));
        room.add_viewer(PrivateToken::new("v2"));

        let record = room.record(&sessions);
        assert_eq!(record.room_id, RoomId::new("abcd1234"));
        assert_eq!(record.host.name, "Host");
        assert_eq!(record.host.public_token, PublicToken::new("q-host"));
        assert_eq!(record.settings.name, "Movie night");
        let names: Vec<_> = record.viewers.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["First", "Second"]);
    }

    #[test]
    fn record_skips_unregistered_viewers() {
        let sessions = store_with(&[("host", "q-host", "Host")]);
        let mut room = room();
        room.add_viewer(PrivateToken::new("ghost"));

        let record = room.record(&sessions);
        assert!(record.viewers.is_empty());
    }
}
