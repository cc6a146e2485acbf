//! # knox-protocol
//!
//! Wire protocol definitions for the Knox chat service.
//!
//! Clients and the server exchange named events with structured payloads:
//!
//! - `join` / `leave` / `message` - client requests
//! - `connected` - handshake carrying the server-bound identity
//! - `load_history` - recent messages, sent only to a new joiner
//! - `status` / `chat_message` - room broadcasts
//!
//! ## Example
//!
//! ```rust
//! use knox_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::message("lobby", "Hello, world!", "10:02");
//!
//! let text = codec::encode_json(&event).unwrap();
//! let decoded: ClientEvent = codec::decode_json(&text).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, Encoded, ProtocolError, WireFormat};
pub use events::{
    ChatEntry, ClientEvent, MessageRequest, RoomRequest, ServerEvent, StatusKind, StatusNotice,
    PROTOCOL_VERSION,
};
