//! Shared data model for Huddle.
//!
//! These records are owned by the broker and copied out to clients as
//! snapshots; nothing on the wire aliases live broker state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Opaque handle for one transport connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", uuid::Uuid::now_v7().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A room identifier.
pub type RoomId = String;

/// A message identifier, assigned by the message log in append order.
pub type MessageId = u64;

/// A connected, successfully joined identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Connection this participant is bound to.
    pub connection_id: ConnectionId,
    /// Display name, unique case-insensitively among connected participants.
    pub username: String,
    /// When the participant joined (Unix ms).
    pub joined_at: u64,
}

impl Participant {
    /// Create a participant stamped with the current time.
    #[must_use]
    pub fn new(connection_id: ConnectionId, username: impl Into<String>) -> Self {
        Self {
            connection_id,
            username: username.into(),
            joined_at: now_millis(),
        }
    }
}

/// A named grouping of participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Unique room ID.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Member connections.
    pub members: BTreeSet<ConnectionId>,
    /// When the room was created (Unix ms).
    pub created_at: u64,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: BTreeSet::new(),
            created_at: now_millis(),
        }
    }

    /// Check whether a connection is a member.
    #[must_use]
    pub fn has_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Author {
    /// Authored by the broker itself.
    System,
    /// Authored by a participant.
    Participant {
        connection_id: ConnectionId,
        username: String,
    },
}

impl Author {
    /// Author stamp for a participant.
    #[must_use]
    pub fn participant(participant: &Participant) -> Self {
        Author::Participant {
            connection_id: participant.connection_id.clone(),
            username: participant.username.clone(),
        }
    }

    /// Username of the author, or `None` for system messages.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Author::System => None,
            Author::Participant { username, .. } => Some(username),
        }
    }
}

/// Message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    System,
}

/// An entry in the message log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: Author,
    pub content: String,
    pub timestamp: u64,
    pub kind: MessageKind,
}
