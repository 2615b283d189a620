//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle chat broker.
//!
//! This crate defines the data model shared between the broker and its
//! clients, the request/response/event frames, and the codecs used to put
//! them on a WebSocket.
//!
//! ## Frames
//!
//! - [`ClientFrame`] - One [`Request`] with an optional correlation ID
//! - [`ServerFrame`] - `welcome`, `ack`, `error`, or a pushed [`ServerEvent`]
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientFrame, Request};
//!
//! let frame = ClientFrame::new(1, Request::Join { username: "alice".into() });
//!
//! // Binary (MessagePack)
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//!
//! // Text (JSON)
//! let text = codec::encode_json(&frame).unwrap();
//! assert!(text.contains("\"join\""));
//! ```

pub mod codec;
pub mod frames;
pub mod model;

pub use codec::{ProtocolError, WireFormat};
pub use frames::{
    ClientFrame, ErrorNotice, Reply, Request, ServerEvent, ServerFrame, TypingNotice,
    PROTOCOL_VERSION,
};
pub use model::{
    now_millis, Author, ChatMessage, ConnectionId, MessageId, MessageKind, Participant, Room,
    RoomId,
};
