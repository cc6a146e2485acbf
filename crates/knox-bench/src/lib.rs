//! Shared fixtures for Knox benchmarks.

use knox_core::{
    BroadcastEngine, ConnectionHub, ConnectionId, HubConfig, Identity, InMemoryMessageStore,
    RoomRegistry,
};
use knox_protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Inbox = mpsc::Receiver<Arc<ServerEvent>>;

/// A registry and engine with `size` members already in `room`.
///
/// The receivers must be kept alive, otherwise every delivery is dropped.
pub fn populated_room(
    room: &str,
    size: usize,
    capacity: usize,
) -> (Arc<RoomRegistry>, BroadcastEngine, Vec<Inbox>) {
    let registry = Arc::new(RoomRegistry::new());
    let engine = BroadcastEngine::new(Arc::clone(&registry));

    let inboxes = (0..size)
        .map(|i| {
            let id = ConnectionId::new(format!("conn-{}", i));
            let (tx, rx) = mpsc::channel(capacity);
            engine.register(id.clone(), tx);
            registry
                .add_member(room, &id)
                .expect("room accepts members");
            rx
        })
        .collect();

    (registry, engine, inboxes)
}

/// A hub over an in-memory store with `size` connected members in `room`.
pub async fn populated_hub(
    room: &str,
    size: usize,
    capacity: usize,
) -> (ConnectionHub, Vec<(ConnectionId, Inbox)>) {
    let hub = ConnectionHub::new(
        Arc::new(RoomRegistry::new()),
        Arc::new(InMemoryMessageStore::new()),
        HubConfig::default(),
    );

    let mut members = Vec::with_capacity(size);
    for i in 0..size {
        let id = ConnectionId::new(format!("conn-{}", i));
        let (tx, rx) = mpsc::channel(capacity);
        hub.on_connect(id.clone(), Identity::new(format!("user-{}", i)), tx)
            .expect("identity is not blank");
        hub.on_join(&id, room).await.expect("room name is valid");
        members.push((id, rx));
    }

    (hub, members)
}

/// Discard everything queued in the inboxes.
pub fn drain(inboxes: &mut [Inbox]) -> usize {
    let mut count = 0;
    for inbox in inboxes {
        while inbox.try_recv().is_ok() {
            count += 1;
        }
    }
    count
}
