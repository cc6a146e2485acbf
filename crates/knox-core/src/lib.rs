//! # knox-core
//!
//! Real-time room membership and message fan-out for the Knox chat service.
//!
//! This crate provides the building blocks the server wires together:
//!
//! - **RoomRegistry** - live member sets per room, created on first join and
//!   dropped when the last member leaves
//! - **BroadcastEngine** - delivers events to a room's current members or to a
//!   single connection, without ever blocking on one slow peer
//! - **ConnectionHub** - per-connection session state and the handlers for
//!   inbound `join` / `leave` / `message` events
//! - **MessageStore** / **Authenticator** - seams for persistence and identity
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌──────────────┐
//! │  Connection │────▶│ ConnectionHub │────▶│ RoomRegistry │
//! └─────────────┘     └───────────────┘     └──────────────┘
//!        ▲                │       │                 │
//!        │                ▼       ▼                 │
//!        │        ┌──────────────┐ ┌─────────────────┐
//!        └────────│ MessageStore │ │ BroadcastEngine │◀┘
//!     outbox      └──────────────┘ └─────────────────┘
//! ```

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod hub;
pub mod message;
pub mod registry;
pub mod room;
pub mod store;

pub use auth::{AuthError, Authenticator, Credentials};
pub use broadcast::{BroadcastEngine, DeliveryError, DeliveryReport, DeliveryTotals, Outbox};
pub use connection::{ConnectionId, Identity};
pub use hub::{ConnectionHub, HubConfig, HubError};
pub use message::ChatMessage;
pub use registry::{RegistryConfig, RegistryError, RegistryStats, RoomRegistry};
pub use room::Room;
pub use store::{InMemoryMessageStore, MessageStore, StoreError};
