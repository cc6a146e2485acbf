//! Connection hub.
//!
//! The hub owns per-connection session state (bound identity and current
//! room) and turns inbound client events into registry, store and broadcast
//! operations. Handlers are plain async methods, so they can be driven
//! without a live transport.

use crate::broadcast::{BroadcastEngine, Outbox};
use crate::connection::{ConnectionId, Identity};
use crate::message::ChatMessage;
use crate::registry::{RegistryError, RoomRegistry};
use crate::room::validate_room_name;
use crate::store::{MessageStore, StoreError};
use dashmap::DashMap;
use knox_protocol::{ClientEvent, ServerEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Number of messages replayed to a joining connection.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The connection has no authenticated session.
    #[error("Connection is not authenticated")]
    Unauthenticated,

    /// The room was rejected by the registry.
    #[error(transparent)]
    Room(#[from] RegistryError),

    /// The connection posted to a room it has not joined.
    #[error("Not a member of room: {0}")]
    NotInRoom(String),

    /// The message could not be persisted and was not broadcast.
    #[error("Failed to persist message: {0}")]
    Store(#[from] StoreError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages replayed on join.
    pub history_limit: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug)]
struct Session {
    identity: Identity,
    room: Option<String>,
}

/// Mediates between connections, the room registry and the message store.
pub struct ConnectionHub {
    registry: Arc<RoomRegistry>,
    engine: BroadcastEngine,
    store: Arc<dyn MessageStore>,
    sessions: DashMap<ConnectionId, Session>,
    config: HubConfig,
}

impl ConnectionHub {
    /// Create a hub over a registry and a message store.
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        store: Arc<dyn MessageStore>,
        config: HubConfig,
    ) -> Self {
        info!("Creating connection hub with config: {:?}", config);
        Self {
            engine: BroadcastEngine::new(Arc::clone(&registry)),
            registry,
            store,
            sessions: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    #[must_use]
    pub fn engine(&self) -> &BroadcastEngine {
        &self.engine
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// The room a connection is currently in, if any.
    #[must_use]
    pub fn current_room(&self, connection_id: &ConnectionId) -> Option<String> {
        self.sessions
            .get(connection_id)
            .and_then(|session| session.room.clone())
    }

    /// The identity bound to a connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unauthenticated`] if the connection has no session.
    pub fn identity(&self, connection_id: &ConnectionId) -> Result<Identity, HubError> {
        self.sessions
            .get(connection_id)
            .map(|session| session.identity.clone())
            .ok_or(HubError::Unauthenticated)
    }

    /// Register a new connection bound to `identity`.
    ///
    /// The connection is greeted with a `connected` event carrying the
    /// identity the server will use for it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unauthenticated`] for a blank identity.
    pub fn on_connect(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        outbox: Outbox,
    ) -> Result<(), HubError> {
        if identity.is_blank() {
            warn!(connection = %connection_id, "Rejecting connection without identity");
            return Err(HubError::Unauthenticated);
        }

        self.engine.register(connection_id.clone(), outbox);
        self.sessions.insert(
            connection_id.clone(),
            Session {
                identity: identity.clone(),
                room: None,
            },
        );
        info!(connection = %connection_id, nickname = %identity, "Connection registered");

        let _ = self.engine.send_to_one(
            &connection_id,
            ServerEvent::connected(connection_id.as_str(), identity.as_str()),
        );
        Ok(())
    }

    /// Route an inbound event to its handler.
    ///
    /// # Errors
    ///
    /// Returns the handler's error; the caller logs it, nothing is sent to
    /// other room members.
    pub async fn dispatch(
        &self,
        connection_id: &ConnectionId,
        event: ClientEvent,
    ) -> Result<(), HubError> {
        match event {
            ClientEvent::Join(req) => {
                self.check_claimed_nickname(connection_id, req.nickname.as_deref());
                self.on_join(connection_id, &req.room).await
            }
            ClientEvent::Leave(req) => {
                self.check_claimed_nickname(connection_id, req.nickname.as_deref());
                self.on_leave(connection_id, &req.room)
            }
            ClientEvent::Message(req) => {
                self.check_claimed_nickname(connection_id, req.nickname.as_deref());
                self.on_message(connection_id, &req.room, req.message, req.timestamp)
                    .await
            }
        }
    }

    /// Join a room.
    ///
    /// The joiner receives the room's recent history (oldest first), then the
    /// whole room, joiner included, receives an entry announcement. A
    /// connection already in another room leaves it once the new membership
    /// is in place; a failed join leaves the connection where it was.
    ///
    /// # Errors
    ///
    /// Fails for unauthenticated connections and invalid room names.
    pub async fn on_join(&self, connection_id: &ConnectionId, room: &str) -> Result<(), HubError> {
        let identity = self.identity(connection_id)?;
        let room = self.normalize_room(connection_id, room)?;

        self.registry.add_member(room, connection_id)?;
        let previous = match self.sessions.get_mut(connection_id) {
            Some(mut session) => session.room.replace(room.to_string()),
            None => {
                // Disconnected while joining
                self.registry.remove_member(room, connection_id);
                return Err(HubError::Unauthenticated);
            }
        };

        if let Some(previous) = previous.filter(|previous| previous != room) {
            self.leave_room(connection_id, &identity, &previous);
        }

        let history = self.load_history(room).await;
        let _ = self
            .engine
            .send_to_one(connection_id, ServerEvent::LoadHistory(history));

        self.engine.send_to_room(
            room,
            ServerEvent::info(format!("{} has entered the room. Say Hello!", identity)),
        );

        info!(connection = %connection_id, nickname = %identity, room = %room, "Joined room");
        Ok(())
    }

    /// Leave a room. Leaving a room the connection is not in is a no-op.
    ///
    /// # Errors
    ///
    /// Fails for unauthenticated connections and invalid room names.
    pub fn on_leave(&self, connection_id: &ConnectionId, room: &str) -> Result<(), HubError> {
        let identity = self.identity(connection_id)?;
        let room = self.normalize_room(connection_id, room)?;

        if !self.leave_room(connection_id, &identity, room) {
            debug!(connection = %connection_id, room = %room, "Leave for a room not joined");
        }
        Ok(())
    }

    /// Persist a message and broadcast it to the room.
    ///
    /// The broadcast nickname is the connection's bound identity. Nothing is
    /// broadcast unless the store accepted the message.
    ///
    /// # Errors
    ///
    /// Fails for unauthenticated connections, rooms the connection is not in,
    /// and store failures.
    pub async fn on_message(
        &self,
        connection_id: &ConnectionId,
        room: &str,
        body: String,
        client_timestamp: String,
    ) -> Result<(), HubError> {
        let identity = self.identity(connection_id)?;
        let room = self.normalize_room(connection_id, room)?;

        if !self.registry.is_member(room, connection_id) {
            debug!(connection = %connection_id, room = %room, "Message for a room not joined");
            return Err(HubError::NotInRoom(room.to_string()));
        }

        let message = ChatMessage::new(room, identity.as_str(), body, client_timestamp);
        if let Err(e) = self.store.append(&message).await {
            error!(
                connection = %connection_id,
                room = %room,
                error = %e,
                "Failed to store message"
            );
            return Err(e.into());
        }

        let report = self
            .engine
            .send_to_room(room, ServerEvent::ChatMessage(message.to_entry()));
        debug!(
            connection = %connection_id,
            room = %room,
            recipients = report.delivered,
            "Message broadcast"
        );
        Ok(())
    }

    /// Tear down a connection, leaving its room as if it had sent `leave`.
    pub fn on_disconnect(&self, connection_id: &ConnectionId) {
        if let Some((_, session)) = self.sessions.remove(connection_id) {
            if let Some(room) = session.room {
                self.leave_room(connection_id, &session.identity, &room);
            }
            info!(connection = %connection_id, nickname = %session.identity, "Connection closed");
        }
        self.engine.unregister(connection_id);
    }

    /// Remove the member and announce the departure to whoever remains.
    fn leave_room(&self, connection_id: &ConnectionId, identity: &Identity, room: &str) -> bool {
        if !self.registry.remove_member(room, connection_id) {
            return false;
        }

        if let Some(mut session) = self.sessions.get_mut(connection_id) {
            if session.room.as_deref() == Some(room) {
                session.room = None;
            }
        }

        self.engine.send_to_room(
            room,
            ServerEvent::warning(format!("{} has left the room. Bye bye!", identity)),
        );
        info!(connection = %connection_id, nickname = %identity, room = %room, "Left room");
        true
    }

    async fn load_history(&self, room: &str) -> Vec<knox_protocol::ChatEntry> {
        let limit = self.config.history_limit;
        match self.store.recent_by_room(room, limit).await {
            Ok(mut messages) => {
                messages.truncate(limit);
                messages.reverse();
                messages.iter().map(ChatMessage::to_entry).collect()
            }
            Err(e) => {
                error!(room = %room, error = %e, "Failed to load history");
                Vec::new()
            }
        }
    }

    fn normalize_room<'a>(
        &self,
        connection_id: &ConnectionId,
        room: &'a str,
    ) -> Result<&'a str, HubError> {
        validate_room_name(room, self.registry.config().max_room_name_length).map_err(|reason| {
            debug!(connection = %connection_id, reason, "Rejected room name");
            HubError::Room(RegistryError::InvalidRoom(reason))
        })
    }

    fn check_claimed_nickname(&self, connection_id: &ConnectionId, claimed: Option<&str>) {
        let Some(claimed) = claimed else { return };
        if let Some(session) = self.sessions.get(connection_id) {
            if session.identity.as_str() != claimed {
                warn!(
                    connection = %connection_id,
                    nickname = %session.identity,
                    claimed = %claimed,
                    "Ignoring client-supplied nickname"
                );
            }
        }
    }
}
