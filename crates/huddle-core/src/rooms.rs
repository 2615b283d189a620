//! Room directory.
//!
//! Rooms are created on demand and live for the rest of the process. The
//! default room always exists once [`RoomDirectory::ensure_default_room`]
//! has run.

use crate::error::BrokerError;
use huddle_protocol::{ConnectionId, Room, RoomId};
use std::collections::HashMap;
use tracing::debug;

/// ID (and name) of the default room.
pub const DEFAULT_ROOM: &str = "general";

/// Default maximum room name length, in characters.
pub const DEFAULT_MAX_ROOM_NAME_LENGTH: usize = 64;

/// Validate a room name and return it trimmed.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, or contains control
/// characters.
pub fn validate_room_name(name: &str, max_length: usize) -> Result<&str, BrokerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BrokerError::InvalidRoomName("Room name cannot be empty"));
    }
    if name.chars().count() > max_length {
        return Err(BrokerError::InvalidRoomName("Room name too long"));
    }
    if name.chars().any(char::is_control) {
        return Err(BrokerError::InvalidRoomName(
            "Room name contains invalid characters",
        ));
    }
    Ok(name)
}

/// Directory of rooms and their members.
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
    /// Creation order.
    order: Vec<RoomId>,
    default_room: RoomId,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM)
    }
}

impl RoomDirectory {
    /// Create a directory whose default room has the given ID.
    ///
    /// The default room itself is created by [`Self::ensure_default_room`].
    #[must_use]
    pub fn new(default_room: impl Into<RoomId>) -> Self {
        Self {
            rooms: HashMap::new(),
            order: Vec::new(),
            default_room: default_room.into(),
        }
    }

    /// ID of the default room.
    #[must_use]
    pub fn default_room_id(&self) -> &str {
        &self.default_room
    }

    /// Create the default room if it does not exist yet.
    pub fn ensure_default_room(&mut self) {
        if self.rooms.contains_key(&self.default_room) {
            return;
        }
        let room = Room::new(self.default_room.clone(), self.default_room.clone());
        debug!(room = %room.id, "Created default room");
        self.insert(room);
    }

    /// Create a room with a fresh unique ID and no members.
    pub fn create_room(&mut self, name: impl Into<String>) -> Room {
        let id = uuid::Uuid::now_v7().to_string();
        let room = Room::new(id, name);
        debug!(room = %room.id, name = %room.name, "Created room");
        self.insert(room.clone());
        room
    }

    fn insert(&mut self, room: Room) {
        self.order.push(room.id.clone());
        self.rooms.insert(room.id.clone(), room);
    }

    /// Add a member to a room. Adding an existing member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::RoomNotFound`] if the room does not exist.
    pub fn add_member(
        &mut self,
        room_id: &str,
        connection_id: &ConnectionId,
    ) -> Result<&Room, BrokerError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| BrokerError::RoomNotFound(room_id.to_string()))?;
        if room.members.insert(connection_id.clone()) {
            debug!(room = %room_id, connection = %connection_id, "Member added");
        }
        Ok(room)
    }

    /// Remove a member from a room. Returns `true` if it was a member.
    pub fn remove_member(&mut self, room_id: &str, connection_id: &ConnectionId) -> bool {
        let removed = self
            .rooms
            .get_mut(room_id)
            .is_some_and(|room| room.members.remove(connection_id));
        if removed {
            debug!(room = %room_id, connection = %connection_id, "Member removed");
        }
        removed
    }

    /// Remove a connection from every room. Returns the number of rooms it left.
    pub fn remove_member_from_all_rooms(&mut self, connection_id: &ConnectionId) -> usize {
        let left = self
            .rooms
            .values_mut()
            .map(|room| room.members.remove(connection_id))
            .filter(|removed| *removed)
            .count();
        debug!(connection = %connection_id, rooms = left, "Removed from all rooms");
        left
    }

    /// Get a room by ID.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Point-in-time copy of all rooms, in creation order.
    #[must_use]
    pub fn list_rooms(&self) -> Vec<Room> {
        self.order
            .iter()
            .filter_map(|id| self.rooms.get(id))
            .cloned()
            .collect()
    }

    /// IDs of the rooms a connection belongs to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.order
            .iter()
            .filter(|id| {
                self.rooms
                    .get(id.as_str())
                    .is_some_and(|room| room.has_member(connection_id))
            })
            .cloned()
            .collect()
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if there are no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
