//! Broker error taxonomy.
//!
//! Every variant is reported only to the requesting connection and never
//! ends the connection or the broker.

use thiserror::Error;

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Username is empty after trimming.
    #[error("Username cannot be empty")]
    UsernameEmpty,

    /// Username exceeds the configured length.
    #[error("Username is longer than {0} characters")]
    UsernameTooLong(usize),

    /// Another connected participant already uses this username.
    #[error("Username is already taken: {0}")]
    UsernameTaken(String),

    /// The connection has already joined.
    #[error("Already joined")]
    AlreadyJoined,

    /// The action requires a joined connection.
    #[error("Join the chat first")]
    NotJoined,

    /// Message content is empty or whitespace.
    #[error("Message cannot be empty")]
    EmptyContent,

    /// Message content exceeds the configured length.
    #[error("Message is longer than {0} characters")]
    ContentTooLong(usize),

    /// No room with this ID.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room name failed validation.
    #[error("Invalid room name: {0}")]
    InvalidRoomName(&'static str),

    /// Participants always stay in the default room.
    #[error("Cannot leave the default room")]
    CannotLeaveDefaultRoom,

    /// Internal error. The operation was rolled back.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Stable machine-readable reason.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            BrokerError::UsernameEmpty => "username-empty",
            BrokerError::UsernameTooLong(_) => "username-too-long",
            BrokerError::UsernameTaken(_) => "username-taken",
            BrokerError::AlreadyJoined => "already-joined",
            BrokerError::NotJoined => "not-joined",
            BrokerError::EmptyContent => "empty-content",
            BrokerError::ContentTooLong(_) => "content-too-long",
            BrokerError::RoomNotFound(_) => "room-not-found",
            BrokerError::InvalidRoomName(_) => "invalid-room-name",
            BrokerError::CannotLeaveDefaultRoom => "cannot-leave-default-room",
            BrokerError::Internal(_) => "internal",
        }
    }

    /// Numeric wire code.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            BrokerError::UsernameEmpty => 1001,
            BrokerError::UsernameTooLong(_) => 1002,
            BrokerError::UsernameTaken(_) => 1003,
            BrokerError::AlreadyJoined => 1004,
            BrokerError::NotJoined => 1005,
            BrokerError::EmptyContent => 1006,
            BrokerError::ContentTooLong(_) => 1007,
            BrokerError::RoomNotFound(_) => 1008,
            BrokerError::InvalidRoomName(_) => 1009,
            BrokerError::CannotLeaveDefaultRoom => 1010,
            BrokerError::Internal(_) => 1500,
        }
    }
}
