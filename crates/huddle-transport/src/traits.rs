//! Transport abstraction traits for Huddle.
//!
//! The broker decides *who* receives an event; a [`Gateway`] decides *how*
//! it gets there. Keeping delivery behind this trait lets the broker run
//! against the real [`Hub`](crate::Hub) or any in-memory stand-in.

use huddle_protocol::{ConnectionId, ServerEvent};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out after {0} ms of inactivity")]
    Timeout(u64),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] huddle_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Best-effort delivery of server events to connections.
///
/// Implementations must not block or await: the broker calls into the
/// gateway while holding its state lock, so delivery is an enqueue.
pub trait Gateway: Send + Sync {
    /// Deliver an event to one connection.
    ///
    /// Returns `false` if the connection is gone; callers ignore this, the
    /// transport reports the disconnect separately.
    fn unicast(&self, target: &ConnectionId, event: ServerEvent) -> bool;

    /// Deliver an event to each of `recipients` except `exclude`.
    ///
    /// Recipients that are no longer attached are skipped. Returns the
    /// number of connections the event was queued for.
    fn broadcast(
        &self,
        recipients: &[ConnectionId],
        event: ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> usize;

    /// Number of attached connections.
    fn connection_count(&self) -> usize;
}
