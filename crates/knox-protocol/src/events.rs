//! Event types for the Knox wire protocol.
//!
//! Every event travels as an adjacently tagged envelope:
//!
//! ```json
//! {"event": "chat_message", "data": {"nickname": "alice", "message": "hi", "timestamp": "10:02"}}
//! ```

use serde::{Deserialize, Serialize};

/// Protocol version announced in the `connected` event.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Enter a room.
    #[serde(rename = "join")]
    Join(RoomRequest),

    /// Leave a room.
    #[serde(rename = "leave")]
    Leave(RoomRequest),

    /// Post a chat message to a room.
    #[serde(rename = "message")]
    Message(MessageRequest),
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::Leave(_) => "leave",
            ClientEvent::Message(_) => "message",
        }
    }

    /// Create a `join` event.
    #[must_use]
    pub fn join(room: impl Into<String>) -> Self {
        ClientEvent::Join(RoomRequest {
            nickname: None,
            room: room.into(),
        })
    }

    /// Create a `leave` event.
    #[must_use]
    pub fn leave(room: impl Into<String>) -> Self {
        ClientEvent::Leave(RoomRequest {
            nickname: None,
            room: room.into(),
        })
    }

    /// Create a `message` event.
    #[must_use]
    pub fn message(
        room: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        ClientEvent::Message(MessageRequest {
            nickname: None,
            message: message.into(),
            room: room.into(),
            timestamp: timestamp.into(),
        })
    }
}

/// Payload of `join` and `leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    /// Nickname claimed by the client. Informational only; the server uses
    /// the identity bound to the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Target room.
    pub room: String,
}

/// Payload of `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    /// Nickname claimed by the client. Never trusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Message body, forwarded verbatim (may be empty).
    #[serde(default)]
    pub message: String,
    /// Target room.
    pub room: String,
    /// Client-side timestamp, opaque to the server.
    #[serde(default)]
    pub timestamp: String,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Handshake sent once after the upgrade.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Identity bound to the connection.
        nickname: String,
        /// Protocol version.
        version: String,
    },

    /// Recent room history, oldest first. Sent only to the joining connection.
    #[serde(rename = "load_history")]
    LoadHistory(Vec<ChatEntry>),

    /// Join/leave announcement.
    #[serde(rename = "status")]
    Status(StatusNotice),

    /// A chat message posted to the room.
    #[serde(rename = "chat_message")]
    ChatMessage(ChatEntry),
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::LoadHistory(_) => "load_history",
            ServerEvent::Status(_) => "status",
            ServerEvent::ChatMessage(_) => "chat_message",
        }
    }

    /// Create a `connected` event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            nickname: nickname.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Create an informational `status` event.
    #[must_use]
    pub fn info(msg: impl Into<String>) -> Self {
        ServerEvent::Status(StatusNotice {
            msg: msg.into(),
            kind: StatusKind::Info,
        })
    }

    /// Create a warning `status` event.
    #[must_use]
    pub fn warning(msg: impl Into<String>) -> Self {
        ServerEvent::Status(StatusNotice {
            msg: msg.into(),
            kind: StatusKind::Warning,
        })
    }
}

/// A chat line as shown to clients, both live and in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub nickname: String,
    pub message: String,
    pub timestamp: String,
}

/// Body of a `status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: StatusKind,
}

/// Severity of a status notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_shape() {
        let raw = json!({
            "event": "message",
            "data": {"nickname": "mallory", "message": "hi", "room": "lobby", "timestamp": "T1"}
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();

        assert_eq!(event.name(), "message");
        match event {
            ClientEvent::Message(req) => {
                assert_eq!(req.nickname.as_deref(), Some("mallory"));
                assert_eq!(req.room, "lobby");
                assert_eq!(req.timestamp, "T1");
            }
            other => panic!("Expected message event, got {:?}", other),
        }
    }

    #[test]
    fn test_join_without_nickname() {
        let raw = json!({"event": "join", "data": {"room": "lobby"}});
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event, ClientEvent::join("lobby"));
    }

    #[test]
    fn test_message_body_defaults_to_empty() {
        let raw = json!({"event": "message", "data": {"room": "lobby"}});
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event, ClientEvent::message("lobby", "", ""));
    }

    #[test]
    fn test_status_wire_shape() {
        let value = serde_json::to_value(ServerEvent::warning("bob has left the room. Bye bye!"))
            .unwrap();
        assert_eq!(
            value,
            json!({
                "event": "status",
                "data": {"msg": "bob has left the room. Bye bye!", "type": "warning"}
            })
        );
    }

    #[test]
    fn test_history_is_a_sequence() {
        let history = ServerEvent::LoadHistory(vec![ChatEntry {
            nickname: "alice".into(),
            message: "hi".into(),
            timestamp: "T1".into(),
        }]);
        let value = serde_json::to_value(&history).unwrap();

        assert_eq!(value["event"], "load_history");
        assert!(value["data"].is_array());
        assert_eq!(value["data"][0]["nickname"], "alice");
        assert_eq!(history.name(), "load_history");
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = json!({"event": "typing", "data": {"room": "lobby"}});
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }
}
