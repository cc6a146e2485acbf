//! Message persistence seam.
//!
//! The store is an append-only log of chat messages, queryable by room.
//! Implementations provide their own internal consistency; callers never
//! lock around them.

use crate::message::ChatMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Durable chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to its room's log.
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// The most recent `limit` messages of a room, newest first.
    async fn recent_by_room(&self, room: &str, limit: usize)
        -> Result<Vec<ChatMessage>, StoreError>;
}

/// In-process message store.
///
/// History lives as long as the process; useful for tests and for running
/// the server without a database.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    rooms: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for a room.
    #[must_use]
    pub fn len(&self, room: &str) -> usize {
        self.rooms.get(room).map(|log| log.len()).unwrap_or(0)
    }

    /// Whether a room has no stored messages.
    #[must_use]
    pub fn is_empty(&self, room: &str) -> bool {
        self.len(room) == 0
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.rooms
            .entry(message.room.clone())
            .or_default()
            .push(message.clone());
        trace!(room = %message.room, "Stored message");
        Ok(())
    }

    async fn recent_by_room(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .rooms
            .get(room)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
