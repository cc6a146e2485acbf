//! Room registry.
//!
//! The registry maps room names to their live member sets. Rooms are created
//! on first join and removed as soon as the last member leaves, so churn never
//! leaves empty entries behind. All state is in memory and starts empty on
//! every process start.

use crate::connection::ConnectionId;
use crate::room::{validate_room_name, Room, MAX_ROOM_NAME_LENGTH};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum room name length in bytes.
    pub max_room_name_length: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_room_name_length: MAX_ROOM_NAME_LENGTH,
        }
    }
}

/// Live room membership.
///
/// Each room entry sits behind a DashMap shard lock, which makes
/// `add_member`, `remove_member` and `members_of` linearizable per room.
/// Locks are only held for the set mutation or copy; nothing in here
/// performs I/O.
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if the connection was newly added, `false` if it was
    /// already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid.
    pub fn add_member(
        &self,
        room: &str,
        connection_id: &ConnectionId,
    ) -> Result<bool, RegistryError> {
        let room = validate_room_name(room, self.config.max_room_name_length)
            .map_err(RegistryError::InvalidRoom)?;

        let mut entry = self.rooms.entry(room.to_string()).or_insert_with(|| {
            debug!(room = %room, "Creating new room");
            Room::new(room)
        });

        let added = entry.insert(connection_id.clone());
        debug!(
            room = %room,
            connection = %connection_id,
            members = entry.member_count(),
            "Joined"
        );

        Ok(added)
    }

    /// Remove a connection from a room.
    ///
    /// Returns `true` if the connection was a member. Removing a non-member or
    /// touching an unknown room is a no-op. A room left empty is deleted.
    pub fn remove_member(&self, room: &str, connection_id: &ConnectionId) -> bool {
        let (removed, now_empty) = match self.rooms.get_mut(room) {
            Some(mut entry) => {
                let removed = entry.remove(connection_id);
                (removed, entry.is_empty())
            }
            None => return false,
        };

        // Re-check under the shard lock: someone may have joined since.
        if now_empty && self.rooms.remove_if(room, |_, r| r.is_empty()).is_some() {
            debug!(room = %room, "Deleted empty room");
        }

        removed
    }

    /// Current members of a room.
    ///
    /// The returned set is a copy taken under the room lock; callers use it
    /// for one delivery pass and never keep it.
    #[must_use]
    pub fn members_of(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|entry| entry.members())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_member(&self, room: &str, connection_id: &ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|entry| entry.is_member(connection_id))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|entry| entry.member_count())
            .unwrap_or(0)
    }

    /// Names of all live rooms.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Registry statistics.
    ///
    /// Visits every room; prefer [`room_count`](Self::room_count) on hot paths.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            total_memberships: self.rooms.iter().map(|e| e.member_count()).sum(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Sum of member counts over all rooms.
    pub total_memberships: usize,
}
