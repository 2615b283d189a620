//! Frame types for the Huddle protocol.
//!
//! Clients send [`ClientFrame`]s carrying one [`Request`]; the server answers
//! with [`ServerFrame`]s, which are either acknowledgements of a request or
//! pushed [`ServerEvent`]s.

use crate::model::{ChatMessage, ConnectionId, Participant, Room, RoomId};
use serde::{Deserialize, Serialize};

/// Current protocol version, announced in the `welcome` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// A client request. One variant per client action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    /// Claim a username and enter the default room.
    Join { username: String },
    /// Post a text message.
    SendMessage { content: String },
    /// Fetch the most recent messages.
    GetHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// Create a new room.
    CreateRoom { name: String },
    /// List all rooms.
    ListRooms,
    /// Enter an existing room.
    JoinRoom { room_id: RoomId },
    /// Leave a room (never the default room).
    LeaveRoom { room_id: RoomId },
    /// Started typing.
    TypingStart,
    /// Stopped typing.
    TypingStop,
    /// Leave the chat and close the connection.
    Logout,
}

impl Request {
    /// Stable name of the request kind, used for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Join { .. } => "join",
            Request::SendMessage { .. } => "send-message",
            Request::GetHistory { .. } => "get-history",
            Request::CreateRoom { .. } => "create-room",
            Request::ListRooms => "list-rooms",
            Request::JoinRoom { .. } => "join-room",
            Request::LeaveRoom { .. } => "leave-room",
            Request::TypingStart => "typing-start",
            Request::TypingStop => "typing-stop",
            Request::Logout => "logout",
        }
    }
}

/// An inbound frame: a request plus an optional correlation ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Echoed back in the `ack`/`error` frame for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub request: Request,
}

impl ClientFrame {
    /// Create a frame that expects a correlated response.
    #[must_use]
    pub fn new(id: u64, request: Request) -> Self {
        Self {
            id: Some(id),
            request,
        }
    }
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Reply {
    Joined { participant: Participant },
    MessageSent { message: ChatMessage },
    History { messages: Vec<ChatMessage> },
    RoomCreated { room: Room },
    Rooms { rooms: Vec<Room> },
    RoomJoined { room: Room },
    RoomLeft { room: Room },
    /// Accepted with nothing to report.
    Done,
}

/// Ephemeral typing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    pub connection_id: ConnectionId,
    pub username: String,
}

/// Out-of-band error notification pushed to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: u16,
    pub reason: String,
    pub message: String,
}

/// An event pushed from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    /// Full participant snapshot, sent to a newly joined connection.
    Participants(Vec<Participant>),
    /// Recent history, sent to a newly joined connection.
    History(Vec<ChatMessage>),
    MessageAdded(ChatMessage),
    RoomCreated(Room),
    Typing(TypingNotice),
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ParticipantJoined(_) => "participant-joined",
            ServerEvent::ParticipantLeft(_) => "participant-left",
            ServerEvent::Participants(_) => "participants",
            ServerEvent::History(_) => "history",
            ServerEvent::MessageAdded(_) => "message-added",
            ServerEvent::RoomCreated(_) => "room-created",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// A frame sent from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// First frame on every connection.
    Welcome {
        connection_id: ConnectionId,
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
    /// A request succeeded.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        reply: Reply,
    },
    /// A request failed.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        code: u16,
        reason: String,
        message: String,
    },
    /// A pushed event.
    Event { event: ServerEvent },
}

impl ServerFrame {
    /// Create a Welcome frame.
    #[must_use]
    pub fn welcome(connection_id: ConnectionId, heartbeat: u32) -> Self {
        ServerFrame::Welcome {
            connection_id,
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: Option<u64>, reply: Reply) -> Self {
        ServerFrame::Ack { id, reply }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(
        id: Option<u64>,
        code: u16,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServerFrame::Error {
            id,
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ServerFrame::Welcome { .. } => "welcome",
            ServerFrame::Ack { .. } => "ack",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Event { event } => event.name(),
        }
    }
}

impl From<ServerEvent> for ServerFrame {
    fn from(event: ServerEvent) -> Self {
        ServerFrame::Event { event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, MessageKind};
    use serde_json::json;

    #[test]
    fn test_request_wire_names() {
        let join: ClientFrame = serde_json::from_value(json!({
            "id": 7,
            "request": {"type": "join", "username": "alice"}
        }))
        .unwrap();
        assert_eq!(join.id, Some(7));
        assert_eq!(
            join.request,
            Request::Join {
                username: "alice".into()
            }
        );

        let history: ClientFrame = serde_json::from_value(json!({
            "request": {"type": "get-history"}
        }))
        .unwrap();
        assert_eq!(history.id, None);
        assert_eq!(history.request, Request::GetHistory { limit: None });
        assert_eq!(history.request.kind(), "get-history");
    }

    #[test]
    fn test_unit_requests() {
        let frame: ClientFrame =
            serde_json::from_value(json!({"request": {"type": "typing-start"}})).unwrap();
        assert_eq!(frame.request, Request::TypingStart);
    }

    #[test]
    fn test_event_wire_shape() {
        let message = ChatMessage {
            id: 3,
            author: Author::System,
            content: "alice joined the chat".into(),
            timestamp: 0,
            kind: MessageKind::System,
        };
        let frame = ServerFrame::from(ServerEvent::MessageAdded(message));

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["event"], "message-added");
        assert_eq!(value["event"]["payload"]["kind"], "system");
        assert_eq!(frame.label(), "message-added");
    }

    #[test]
    fn test_error_frame() {
        let frame = ServerFrame::error(Some(1), 1002, "username-taken", "Username is taken");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "error",
                "id": 1,
                "code": 1002,
                "reason": "username-taken",
                "message": "Username is taken"
            })
        );
    }
}
