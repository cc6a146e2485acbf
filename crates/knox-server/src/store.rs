//! SQLite-backed message store.

use async_trait::async_trait;
use knox_core::{ChatMessage, InMemoryMessageStore, MessageStore, StoreError};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::info;

const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    room             TEXT    NOT NULL,
    nickname         TEXT    NOT NULL,
    body             TEXT    NOT NULL,
    client_timestamp TEXT    NOT NULL,
    received_at      INTEGER NOT NULL
)"#;

const CREATE_ROOM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_room_id ON messages (room, id)";

#[derive(Debug, FromRow)]
struct MessageRow {
    room: String,
    nickname: String,
    body: String,
    client_timestamp: String,
    received_at: i64,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        ChatMessage {
            room: row.room,
            nickname: row.nickname,
            body: row.body,
            client_timestamp: row.client_timestamp,
            received_at: row.received_at.max(0) as u64,
        }
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// Message store persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Connect and create the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url = %url, "Message store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_MESSAGES).execute(&self.pool).await?;
        sqlx::query(CREATE_ROOM_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (room, nickname, body, client_timestamp, received_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.room)
        .bind(&message.nickname)
        .bind(&message.body)
        .bind(&message.client_timestamp)
        .bind(message.received_at as i64)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn recent_by_room(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT room, nickname, body, client_timestamp, received_at \
             FROM messages WHERE room = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(room)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }
}

/// Open the store named by `url`: `memory` or an SQLite URL.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened.
pub async fn open_store(url: &str, max_connections: u32) -> anyhow::Result<Arc<dyn MessageStore>> {
    if url == "memory" {
        info!("Using in-memory message store");
        return Ok(Arc::new(InMemoryMessageStore::new()));
    }

    let store = SqliteMessageStore::connect(url, max_connections)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open message store {}: {}", url, e))?;
    Ok(Arc::new(store))
}
