//! Event delivery.
//!
//! Every connection owns a bounded outbound queue (its [`Outbox`]); a writer
//! task on the transport side drains it onto the socket. Delivery here is a
//! non-blocking enqueue, so a slow or dead peer costs one failed `try_send`
//! and never holds up the rest of a fan-out.

use crate::connection::ConnectionId;
use crate::registry::RoomRegistry;
use dashmap::DashMap;
use knox_protocol::ServerEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Arc<ServerEvent>>;

/// Per-connection delivery failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No outbox is registered for the connection.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's queue is full.
    #[error("Outbox full for connection: {0}")]
    OutboxFull(ConnectionId),

    /// The connection's writer has gone away.
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Outcome of a room fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Members the event was queued for.
    pub delivered: usize,
    /// Members whose delivery was dropped.
    pub dropped: usize,
}

/// Running delivery counters since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTotals {
    pub delivered: u64,
    pub dropped: u64,
}

/// Delivers server events to rooms and single connections.
pub struct BroadcastEngine {
    registry: Arc<RoomRegistry>,
    outboxes: DashMap<ConnectionId, Outbox>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastEngine {
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            outboxes: DashMap::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a connection's outbox.
    pub fn register(&self, connection_id: ConnectionId, outbox: Outbox) {
        debug!(connection = %connection_id, "Outbox registered");
        self.outboxes.insert(connection_id, outbox);
    }

    /// Forget a connection's outbox. Returns `true` if one was registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.outboxes.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Outbox unregistered");
        }
        removed
    }

    /// Number of registered outboxes.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Delivery counters across all sends.
    #[must_use]
    pub fn totals(&self) -> DeliveryTotals {
        DeliveryTotals {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Deliver an event to a single connection.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if the event could not be queued.
    pub fn send_to_one(
        &self,
        connection_id: &ConnectionId,
        event: ServerEvent,
    ) -> Result<(), DeliveryError> {
        let event_name = event.name();
        self.deliver(connection_id, Arc::new(event)).map_err(|e| {
            warn!(connection = %connection_id, event = event_name, error = %e, "Delivery dropped");
            e
        })
    }

    /// Deliver an event to every current member of a room.
    ///
    /// Membership is read once at call time. Failures are logged per member
    /// and never abort delivery to the others.
    pub fn send_to_room(&self, room: &str, event: ServerEvent) -> DeliveryReport {
        let members = self.registry.members_of(room);
        let event_name = event.name();
        let event = Arc::new(event);
        let mut report = DeliveryReport::default();

        for member in &members {
            match self.deliver(member, Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(room = %room, event = event_name, error = %e, "Delivery dropped");
                    report.dropped += 1;
                }
            }
        }

        trace!(
            room = %room,
            event = event_name,
            delivered = report.delivered,
            dropped = report.dropped,
            "Room broadcast"
        );
        report
    }

    fn deliver(
        &self,
        connection_id: &ConnectionId,
        event: Arc<ServerEvent>,
    ) -> Result<(), DeliveryError> {
        let outbox = self
            .outboxes
            .get(connection_id)
            .ok_or_else(|| DeliveryError::UnknownConnection(connection_id.clone()))?;

        let result = outbox.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::OutboxFull(connection_id.clone()),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(connection_id.clone()),
        });
        let counter = if result.is_ok() { &self.delivered } else { &self.dropped };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }
}
