//! Rooms and room-name validation.
//!
//! A room is a named broadcast domain holding the set of connections that
//! currently receive its events.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Default maximum room name length, in bytes.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Normalize and validate a client-supplied room name.
///
/// Surrounding whitespace is trimmed; the trimmed name is returned.
///
/// # Errors
///
/// Returns an error message if the name is empty, too long, or contains
/// control characters.
pub fn validate_room_name(name: &str, max_length: usize) -> Result<&str, &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > max_length {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(name)
}

/// A room and its live member set.
#[derive(Debug)]
pub struct Room {
    name: String,
    members: HashSet<ConnectionId>,
}

impl Room {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    /// Add a member. Returns `true` if the connection was not already present.
    pub fn insert(&mut self, connection_id: ConnectionId) -> bool {
        let added = self.members.insert(connection_id.clone());
        if added {
            debug!(room = %self.name, connection = %connection_id, "Member added");
        }
        added
    }

    /// Remove a member. Returns `true` if the connection was present.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id);
        if removed {
            debug!(room = %self.name, connection = %connection_id, "Member removed");
        }
        removed
    }

    /// Copy of the current member set.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.iter().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_insert_remove() {
        let mut room = Room::new("lobby");
        let conn = ConnectionId::new("conn-1");

        assert!(room.insert(conn.clone()));
        assert!(!room.insert(conn.clone()));
        assert_eq!(room.member_count(), 1);
        assert!(room.is_member(&conn));

        assert!(room.remove(&conn));
        assert!(!room.remove(&conn));
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_name_validation() {
        assert_eq!(validate_room_name("  lobby ", MAX_ROOM_NAME_LENGTH), Ok("lobby"));
        assert_eq!(
            validate_room_name("Café & friends", MAX_ROOM_NAME_LENGTH),
            Ok("Café & friends")
        );
        assert!(validate_room_name("", MAX_ROOM_NAME_LENGTH).is_err());
        assert!(validate_room_name(" \t ", MAX_ROOM_NAME_LENGTH).is_err());
        assert!(validate_room_name("lob\u{7}by", MAX_ROOM_NAME_LENGTH).is_err());

        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(validate_room_name(&long_name, MAX_ROOM_NAME_LENGTH).is_err());
    }
}
