//! # huddle-core
//!
//! Presence tracking, room membership, message history and fan-out for the
//! Huddle chat broker.
//!
//! - **Registry** - Joined participants, unique usernames
//! - **Rooms** - Room directory with the always-present default room
//! - **History** - Append-only, ordered message log
//! - **Broker** - Applies client requests and decides who hears about them
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Broker    │────▶│   Gateway   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!             ┌──────────────┼──────────────┐
//!             ▼              ▼              ▼
//!      ┌────────────┐ ┌────────────┐ ┌────────────┐
//!      │  Registry  │ │   Rooms    │ │  History   │
//!      └────────────┘ └────────────┘ └────────────┘
//! ```

pub mod broker;
pub mod error;
pub mod history;
pub mod registry;
pub mod rooms;

pub use broker::{Broker, BrokerConfig, BrokerStats, ConnectionState};
pub use error::BrokerError;
pub use history::{MessageLog, DEFAULT_HISTORY_LIMIT};
pub use registry::IdentityRegistry;
pub use rooms::{RoomDirectory, DEFAULT_ROOM};
