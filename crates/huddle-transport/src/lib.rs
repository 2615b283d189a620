//! # huddle-transport
//!
//! Transport gateway for the Huddle chat broker.
//!
//! The broker never touches sockets. It hands events to a [`Gateway`], which
//! queues them for the connections they are addressed to:
//!
//! ```text
//! ┌─────────────┐  unicast/broadcast  ┌─────────────┐  mpsc   ┌─────────────┐
//! │   Broker    │────────────────────▶│     Hub     │────────▶│ socket task │
//! └─────────────┘                     └─────────────┘         └─────────────┘
//! ```
//!
//! ```rust
//! use huddle_transport::{Gateway, Hub};
//! use huddle_protocol::{ConnectionId, ServerEvent};
//!
//! let hub = Hub::new();
//! let conn = ConnectionId::from("conn-1");
//! let mut rx = hub.attach(conn.clone());
//! hub.broadcast(&[conn], ServerEvent::Participants(Vec::new()), None);
//! assert!(rx.try_recv().is_ok());
//! ```

pub mod hub;
pub mod traits;

pub use hub::{Hub, Outbound};
pub use traits::{Gateway, TransportError};
