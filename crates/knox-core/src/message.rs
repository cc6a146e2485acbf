//! Persisted chat messages.

use knox_protocol::ChatEntry;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A chat message as written to the message store.
///
/// Created once per accepted `message` event and never mutated afterwards.
/// `client_timestamp` is kept exactly as the client sent it and is what
/// history replay shows; `received_at` records server receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Room the message was posted to.
    pub room: String,
    /// Server-bound identity of the sender.
    pub nickname: String,
    /// Message body, verbatim.
    pub body: String,
    /// Client-supplied timestamp, verbatim.
    pub client_timestamp: String,
    /// Server receipt time in milliseconds since the Unix epoch.
    pub received_at: u64,
}

impl ChatMessage {
    /// Create a message stamped with the current server time.
    #[must_use]
    pub fn new(
        room: impl Into<String>,
        nickname: impl Into<String>,
        body: impl Into<String>,
        client_timestamp: impl Into<String>,
    ) -> Self {
        Self {
            room: room.into(),
            nickname: nickname.into(),
            body: body.into(),
            client_timestamp: client_timestamp.into(),
            received_at: now_millis(),
        }
    }

    /// Override the receipt time.
    #[must_use]
    pub fn with_received_at(mut self, received_at: u64) -> Self {
        self.received_at = received_at;
        self
    }

    /// The client-facing form used by `chat_message` and `load_history`.
    #[must_use]
    pub fn to_entry(&self) -> ChatEntry {
        ChatEntry {
            nickname: self.nickname.clone(),
            message: self.body.clone(),
            timestamp: self.client_timestamp.clone(),
        }
    }
}
