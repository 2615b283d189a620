//! Presence broker.
//!
//! The broker owns the identity registry, room directory and message log
//! behind one lock, applies client requests to them, and decides which
//! connections hear about each change.
//!
//! Broadcasts reach joined participants only; connections that have not
//! joined hear nothing but replies to their own requests.
//!
//! Every mutating operation runs under the write lock and hands its events
//! to the [`Gateway`] before releasing it. Gateway delivery is an enqueue,
//! so this never waits on the network, and it gives every connection the
//! same order of events as the log.

use crate::error::BrokerError;
use crate::history::{MessageLog, DEFAULT_HISTORY_LIMIT};
use crate::registry::{IdentityRegistry, DEFAULT_MAX_USERNAME_LENGTH};
use crate::rooms::{validate_room_name, RoomDirectory, DEFAULT_MAX_ROOM_NAME_LENGTH, DEFAULT_ROOM};
use huddle_protocol::{
    Author, ChatMessage, ConnectionId, ErrorNotice, MessageKind, Participant, Reply, Request,
    Room, ServerEvent, TypingNotice,
};
use huddle_transport::Gateway;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// ID and name of the room every participant belongs to.
    pub default_room: String,
    /// Messages sent to a newly joined participant, and the default
    /// `get-history` limit.
    pub history_limit: usize,
    /// Maximum username length, in characters.
    pub max_username_length: usize,
    /// Maximum message length, in characters.
    pub max_message_length: usize,
    /// Maximum room name length, in characters.
    pub max_room_name_length: usize,
    /// Keep at most this many messages in the log; `None` is unbounded.
    pub history_retention: Option<usize>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_room: DEFAULT_ROOM.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_username_length: DEFAULT_MAX_USERNAME_LENGTH,
            max_message_length: 4096,
            max_room_name_length: DEFAULT_MAX_ROOM_NAME_LENGTH,
            history_retention: None,
        }
    }
}

/// Lifecycle of a connection as seen by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected but not joined.
    Anonymous,
    /// Holds a username and is a member of the default room.
    Joined,
}

/// Broker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    /// Number of joined participants.
    pub participant_count: usize,
    /// Number of rooms.
    pub room_count: usize,
    /// Messages currently retained in the log.
    pub message_count: usize,
    /// Messages ever appended.
    pub total_messages: u64,
}

/// The state container. One per broker, never shared outside the lock.
#[derive(Debug)]
struct BrokerState {
    registry: IdentityRegistry,
    rooms: RoomDirectory,
    log: MessageLog,
}

/// The presence and fan-out broker.
pub struct Broker {
    state: RwLock<BrokerState>,
    gateway: Arc<dyn Gateway>,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker with default configuration.
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self::with_config(gateway, BrokerConfig::default())
    }

    /// Create a broker with custom configuration.
    #[must_use]
    pub fn with_config(gateway: Arc<dyn Gateway>, config: BrokerConfig) -> Self {
        info!("Creating broker with config: {:?}", config);

        let mut rooms = RoomDirectory::new(config.default_room.clone());
        rooms.ensure_default_room();

        let state = BrokerState {
            registry: IdentityRegistry::new(config.max_username_length),
            rooms,
            log: MessageLog::with_retention(config.history_retention),
        };

        Self {
            state: RwLock::new(state),
            gateway,
            config,
        }
    }

    /// Get the broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Apply one client request.
    ///
    /// # Errors
    ///
    /// Returns the reason the request was rejected. Rejected requests leave
    /// the broker state unchanged.
    pub async fn handle(
        &self,
        connection_id: &ConnectionId,
        request: Request,
    ) -> Result<Reply, BrokerError> {
        let kind = request.kind();
        debug!(connection = %connection_id, request = kind, "Handling request");

        let result = match request {
            Request::Join { username } => self
                .join(connection_id, &username)
                .await
                .map(|participant| Reply::Joined { participant }),
            Request::SendMessage { content } => self
                .send(connection_id, &content)
                .await
                .map(|message| Reply::MessageSent { message }),
            Request::GetHistory { limit } => Ok(Reply::History {
                messages: self.get_history(limit).await,
            }),
            Request::CreateRoom { name } => self
                .create_room(connection_id, &name)
                .await
                .map(|room| Reply::RoomCreated { room }),
            Request::ListRooms => Ok(Reply::Rooms {
                rooms: self.rooms().await,
            }),
            Request::JoinRoom { room_id } => self
                .join_room(connection_id, &room_id)
                .await
                .map(|room| Reply::RoomJoined { room }),
            Request::LeaveRoom { room_id } => self
                .leave_room(connection_id, &room_id)
                .await
                .map(|room| Reply::RoomLeft { room }),
            Request::TypingStart => {
                self.typing_start(connection_id).await;
                Ok(Reply::Done)
            }
            Request::TypingStop => {
                self.typing_stop(connection_id);
                Ok(Reply::Done)
            }
            Request::Logout => {
                self.disconnect(connection_id).await;
                Ok(Reply::Done)
            }
        };

        if let Err(e) = &result {
            warn!(connection = %connection_id, request = kind, reason = e.reason(), "Request rejected");
        }
        result
    }

    /// Join the chat under `username`.
    ///
    /// The new participant receives the participant snapshot and recent
    /// history first; everyone else then hears about the join, and finally
    /// the join announcement goes to all connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection already joined or the username is
    /// rejected. Nothing is broadcast on error.
    pub async fn join(
        &self,
        connection_id: &ConnectionId,
        username: &str,
    ) -> Result<Participant, BrokerError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let participant = state.registry.join(connection_id.clone(), username)?;

        let default_room = state.rooms.default_room_id().to_string();
        if let Err(e) = state
            .rooms
            .add_member(&default_room, connection_id)
            .map(|_| ())
        {
            state.registry.remove(connection_id);
            error!(connection = %connection_id, error = %e, "Default room missing, join rolled back");
            return Err(BrokerError::Internal(e.to_string()));
        }

        self.gateway
            .unicast(connection_id, ServerEvent::Participants(state.registry.list_all()));
        self.gateway.unicast(
            connection_id,
            ServerEvent::History(state.log.tail(self.config.history_limit)),
        );
        self.broadcast(
            &state.registry,
            ServerEvent::ParticipantJoined(participant.clone()),
            Some(connection_id),
        );

        let announcement = state
            .log
            .append_system(format!("{} joined the chat", participant.username));
        self.broadcast(&state.registry, ServerEvent::MessageAdded(announcement), None);

        info!(connection = %connection_id, username = %participant.username, "Participant joined");
        Ok(participant)
    }

    /// Post a text message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotJoined`] (also pushed to the sender as an
    /// `error` event) or a content error. Nothing is logged or broadcast on
    /// error.
    pub async fn send(
        &self,
        connection_id: &ConnectionId,
        content: &str,
    ) -> Result<ChatMessage, BrokerError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(author) = state.registry.lookup(connection_id).map(Author::participant) else {
            let err = BrokerError::NotJoined;
            self.gateway.unicast(
                connection_id,
                ServerEvent::Error(ErrorNotice {
                    code: err.code(),
                    reason: err.reason().to_string(),
                    message: err.to_string(),
                }),
            );
            return Err(err);
        };

        if content.trim().is_empty() {
            return Err(BrokerError::EmptyContent);
        }
        if content.chars().count() > self.config.max_message_length {
            return Err(BrokerError::ContentTooLong(self.config.max_message_length));
        }

        let message = state.log.append(author, content, MessageKind::Text);
        self.broadcast(&state.registry, ServerEvent::MessageAdded(message.clone()), None);

        debug!(connection = %connection_id, id = message.id, "Message added");
        Ok(message)
    }

    /// The most recent `limit` messages (default: the configured history
    /// limit), oldest first. Read-only.
    pub async fn get_history(&self, limit: Option<usize>) -> Vec<ChatMessage> {
        let limit = limit.unwrap_or(self.config.history_limit);
        self.state.read().await.log.tail(limit)
    }

    /// Create a room and announce it to everyone.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not joined or the name is
    /// invalid.
    pub async fn create_room(
        &self,
        connection_id: &ConnectionId,
        name: &str,
    ) -> Result<Room, BrokerError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if !state.registry.contains(connection_id) {
            return Err(BrokerError::NotJoined);
        }
        let name = validate_room_name(name, self.config.max_room_name_length)?;

        let room = state.rooms.create_room(name);
        self.broadcast(&state.registry, ServerEvent::RoomCreated(room.clone()), None);

        info!(connection = %connection_id, room = %room.id, name = %room.name, "Room created");
        Ok(room)
    }

    /// Add the connection to an existing room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not joined or the room does
    /// not exist.
    pub async fn join_room(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
    ) -> Result<Room, BrokerError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if !state.registry.contains(connection_id) {
            return Err(BrokerError::NotJoined);
        }
        let room = state.rooms.add_member(room_id, connection_id)?.clone();
        Ok(room)
    }

    /// Remove the connection from a room other than the default room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not joined, the room does not
    /// exist, or it is the default room.
    pub async fn leave_room(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
    ) -> Result<Room, BrokerError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if !state.registry.contains(connection_id) {
            return Err(BrokerError::NotJoined);
        }
        if room_id == state.rooms.default_room_id() {
            return Err(BrokerError::CannotLeaveDefaultRoom);
        }
        if state.rooms.get(room_id).is_none() {
            return Err(BrokerError::RoomNotFound(room_id.to_string()));
        }

        state.rooms.remove_member(room_id, connection_id);
        state
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| BrokerError::Internal(format!("room {room_id} vanished")))
    }

    /// Tell everyone else that this participant is typing. No-op unless
    /// joined.
    pub async fn typing_start(&self, connection_id: &ConnectionId) {
        let state = self.state.read().await;
        let Some(participant) = state.registry.lookup(connection_id) else {
            return;
        };

        self.broadcast(
            &state.registry,
            ServerEvent::Typing(TypingNotice {
                connection_id: connection_id.clone(),
                username: participant.username.clone(),
            }),
            Some(connection_id),
        );
    }

    /// Stopped typing. Intentionally does nothing: clients let the typing
    /// indicator expire on their own.
    pub fn typing_stop(&self, connection_id: &ConnectionId) {
        debug!(connection = %connection_id, "Typing stopped");
    }

    /// Handle a closed connection. Idempotent.
    ///
    /// Returns the participant that left, or `None` if the connection never
    /// joined or was already cleaned up.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Option<Participant> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let participant = state.registry.remove(connection_id)?;
        state.rooms.remove_member_from_all_rooms(connection_id);

        self.broadcast(
            &state.registry,
            ServerEvent::ParticipantLeft(participant.clone()),
            None,
        );
        let announcement = state
            .log
            .append_system(format!("{} left the chat", participant.username));
        self.broadcast(&state.registry, ServerEvent::MessageAdded(announcement), None);

        info!(connection = %connection_id, username = %participant.username, "Participant left");
        Some(participant)
    }

    /// Queue an event for every joined participant except `exclude`.
    fn broadcast(
        &self,
        registry: &IdentityRegistry,
        event: ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        self.gateway
            .broadcast(&registry.connection_ids(), event, exclude)
    }

    /// Lifecycle state of a connection.
    pub async fn connection_state(&self, connection_id: &ConnectionId) -> ConnectionState {
        if self.state.read().await.registry.contains(connection_id) {
            ConnectionState::Joined
        } else {
            ConnectionState::Anonymous
        }
    }

    /// Snapshot of all participants, in join order.
    pub async fn participants(&self) -> Vec<Participant> {
        self.state.read().await.registry.list_all()
    }

    /// Snapshot of all rooms, in creation order.
    pub async fn rooms(&self) -> Vec<Room> {
        self.state.read().await.rooms.list_rooms()
    }

    /// Get broker statistics.
    pub async fn stats(&self) -> BrokerStats {
        let state = self.state.read().await;
        BrokerStats {
            participant_count: state.registry.len(),
            room_count: state.rooms.len(),
            message_count: state.log.len(),
            total_messages: state.log.total_appended(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ServerFrame;
    use huddle_transport::{Hub, Outbound};

    fn setup() -> (Arc<Hub>, Broker) {
        let hub = Arc::new(Hub::new());
        let broker = Broker::new(hub.clone());
        (hub, broker)
    }

    fn events(rx: &mut Outbound) -> Vec<ServerEvent> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|frame| match frame {
                ServerFrame::Event { event } => Some(event),
                _ => None,
            })
            .collect()
    }

    fn names(events: &[ServerEvent]) -> Vec<&'static str> {
        events.iter().map(ServerEvent::name).collect()
    }

    fn messages(events: &[ServerEvent]) -> Vec<&ChatMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::MessageAdded(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Attach and join, discarding the events produced by the join itself.
    async fn joined(hub: &Hub, broker: &Broker, id: &str, name: &str) -> Outbound {
        let conn = ConnectionId::from(id);
        let mut rx = hub.attach(conn.clone());
        broker.join(&conn, name).await.unwrap();
        events(&mut rx);
        rx
    }

    #[tokio::test]
    async fn test_join_sends_snapshot_and_history_before_broadcasts() {
        let (hub, broker) = setup();
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;

        let alice = ConnectionId::from("a");
        let mut alice_rx = hub.attach(alice.clone());
        let participant = broker.join(&alice, "alice").await.unwrap();
        assert_eq!(participant.username, "alice");

        let alice_events = events(&mut alice_rx);
        assert_eq!(
            names(&alice_events),
            ["participants", "history", "message-added"]
        );
        match &alice_events[0] {
            ServerEvent::Participants(all) => assert_eq!(all.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match &alice_events[1] {
            ServerEvent::History(history) => {
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].content, "bob joined the chat");
            }
            other => panic!("unexpected {other:?}"),
        }

        let bob_events = events(&mut bob_rx);
        assert_eq!(names(&bob_events), ["participant-joined", "message-added"]);
        let announced = messages(&bob_events);
        assert_eq!(announced[0].content, "alice joined the chat");
        assert_eq!(announced[0].kind, MessageKind::System);
        assert_eq!(announced[0].author, Author::System);

        assert_eq!(broker.connection_state(&alice).await, ConnectionState::Joined);
        let general = &broker.rooms().await[0];
        assert!(general.has_member(&alice));
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected_case_insensitively() {
        let (hub, broker) = setup();
        let mut alice_rx = joined(&hub, &broker, "a", "alice").await;

        let other = ConnectionId::from("b");
        let mut other_rx = hub.attach(other.clone());
        let result = broker
            .handle(
                &other,
                Request::Join {
                    username: "Alice".into(),
                },
            )
            .await;

        assert_eq!(result, Err(BrokerError::UsernameTaken("Alice".into())));
        assert!(events(&mut alice_rx).is_empty());
        assert!(events(&mut other_rx).is_empty());
        assert_eq!(broker.participants().await.len(), 1);
        assert_eq!(broker.connection_state(&other).await, ConnectionState::Anonymous);
    }

    #[tokio::test]
    async fn test_join_twice_is_rejected() {
        let (hub, broker) = setup();
        let _rx = joined(&hub, &broker, "a", "alice").await;

        assert_eq!(
            broker.join(&"a".into(), "alice2").await,
            Err(BrokerError::AlreadyJoined)
        );
        assert_eq!(broker.stats().await.participant_count, 1);
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let (_hub, broker) = setup();
        assert_eq!(
            broker.join(&"a".into(), "  \t").await,
            Err(BrokerError::UsernameEmpty)
        );
        assert_eq!(broker.stats().await.total_messages, 0);
    }

    #[tokio::test]
    async fn test_send_reaches_everyone_once() {
        let (hub, broker) = setup();
        let mut alice_rx = joined(&hub, &broker, "a", "alice").await;
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;
        events(&mut alice_rx);

        let reply = broker
            .handle(
                &"a".into(),
                Request::SendMessage {
                    content: "hi".into(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::MessageSent { .. }));

        for rx in [&mut alice_rx, &mut bob_rx] {
            let received = events(rx);
            let added = messages(&received);
            assert_eq!(added.len(), 1);
            assert_eq!(added[0].content, "hi");
            assert_eq!(added[0].kind, MessageKind::Text);
            assert_eq!(added[0].author.username(), Some("alice"));
        }
    }

    #[tokio::test]
    async fn test_whitespace_message_is_silently_rejected() {
        let (hub, broker) = setup();
        let mut alice_rx = joined(&hub, &broker, "a", "alice").await;
        let before = broker.stats().await.total_messages;

        assert_eq!(
            broker.send(&"a".into(), "   ").await,
            Err(BrokerError::EmptyContent)
        );
        assert_eq!(broker.stats().await.total_messages, before);
        assert!(events(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_too_long() {
        let hub = Arc::new(Hub::new());
        let config = BrokerConfig {
            max_message_length: 5,
            ..BrokerConfig::default()
        };
        let broker = Broker::with_config(hub.clone(), config);
        let _rx = joined(&hub, &broker, "a", "alice").await;

        assert_eq!(
            broker.send(&"a".into(), "toolong").await,
            Err(BrokerError::ContentTooLong(5))
        );
    }

    #[tokio::test]
    async fn test_send_before_join_notifies_sender_only() {
        let (hub, broker) = setup();
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;
        let anon = ConnectionId::from("x");
        let mut anon_rx = hub.attach(anon.clone());

        assert_eq!(
            broker.send(&anon, "hello").await,
            Err(BrokerError::NotJoined)
        );

        let anon_events = events(&mut anon_rx);
        match anon_events.as_slice() {
            [ServerEvent::Error(notice)] => assert_eq!(notice.reason, "not-joined"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(events(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_get_history_is_read_only() {
        let (hub, broker) = setup();
        let mut alice_rx = joined(&hub, &broker, "a", "alice").await;
        for i in 0..5 {
            broker.send(&"a".into(), &format!("m{i}")).await.unwrap();
        }
        events(&mut alice_rx);

        let reply = broker
            .handle(&"a".into(), Request::GetHistory { limit: Some(2) })
            .await
            .unwrap();
        match reply {
            Reply::History { messages } => {
                let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, ["m3", "m4"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Default limit covers the whole log here: 1 join + 5 messages.
        assert_eq!(broker.get_history(None).await.len(), 6);
        assert!(events(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_history_limit_zero_is_empty() {
        let (hub, broker) = setup();
        let _rx = joined(&hub, &broker, "a", "alice").await;
        broker.send(&"a".into(), "hi").await.unwrap();

        let reply = broker
            .handle(&"a".into(), Request::GetHistory { limit: Some(0) })
            .await
            .unwrap();
        assert_eq!(reply, Reply::History { messages: Vec::new() });
    }

    #[tokio::test]
    async fn test_connections_that_never_joined_hear_nothing() {
        let (hub, broker) = setup();
        let lurker = ConnectionId::from("lurker");
        let mut lurker_rx = hub.attach(lurker.clone());

        let _alice_rx = joined(&hub, &broker, "a", "alice").await;
        let _bob_rx = joined(&hub, &broker, "b", "bob").await;
        broker.send(&"a".into(), "secret").await.unwrap();
        broker.create_room(&"a".into(), "side").await.unwrap();
        broker.typing_start(&"b".into()).await;
        broker.disconnect(&"b".into()).await;

        assert!(events(&mut lurker_rx).is_empty());
        assert_eq!(
            broker.connection_state(&lurker).await,
            ConnectionState::Anonymous
        );
    }

    #[tokio::test]
    async fn test_create_room_broadcasts_and_replies() {
        let (hub, broker) = setup();
        let mut alice_rx = joined(&hub, &broker, "a", "alice").await;
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;
        events(&mut alice_rx);

        let room = broker.create_room(&"a".into(), "  random ").await.unwrap();
        assert_eq!(room.name, "random");

        for rx in [&mut alice_rx, &mut bob_rx] {
            let received = events(rx);
            assert_eq!(received, [ServerEvent::RoomCreated(room.clone())]);
        }
        assert_eq!(broker.rooms().await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_room_requires_join() {
        let (_hub, broker) = setup();
        assert_eq!(
            broker.create_room(&"a".into(), "random").await,
            Err(BrokerError::NotJoined)
        );
        assert!(matches!(
            broker.handle(&"a".into(), Request::ListRooms).await,
            Ok(Reply::Rooms { rooms }) if rooms.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_join_and_leave_rooms() {
        let (hub, broker) = setup();
        let _rx = joined(&hub, &broker, "a", "alice").await;
        let alice = ConnectionId::from("a");
        let room = broker.create_room(&alice, "side").await.unwrap();

        let joined_room = broker.join_room(&alice, &room.id).await.unwrap();
        assert!(joined_room.has_member(&alice));

        let left_room = broker.leave_room(&alice, &room.id).await.unwrap();
        assert!(!left_room.has_member(&alice));

        assert_eq!(
            broker.leave_room(&alice, DEFAULT_ROOM).await,
            Err(BrokerError::CannotLeaveDefaultRoom)
        );
        assert_eq!(
            broker.join_room(&alice, "missing").await,
            Err(BrokerError::RoomNotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_typing_start_goes_to_others_only() {
        let (hub, broker) = setup();
        let mut alice_rx = joined(&hub, &broker, "a", "alice").await;
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;
        events(&mut alice_rx);

        broker
            .handle(&"a".into(), Request::TypingStart)
            .await
            .unwrap();
        broker.handle(&"a".into(), Request::TypingStop).await.unwrap();

        assert!(events(&mut alice_rx).is_empty());
        let bob_events = events(&mut bob_rx);
        match bob_events.as_slice() {
            [ServerEvent::Typing(notice)] => assert_eq!(notice.username, "alice"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_start_ignored_when_anonymous() {
        let (hub, broker) = setup();
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;

        broker.typing_start(&"x".into()).await;
        assert!(events(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_and_clears_membership() {
        let (hub, broker) = setup();
        let alice_rx = joined(&hub, &broker, "a", "alice").await;
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;
        let alice = ConnectionId::from("a");
        let side = broker.create_room(&alice, "side").await.unwrap();
        broker.join_room(&alice, &side.id).await.unwrap();
        events(&mut bob_rx);

        hub.detach(&alice);
        drop(alice_rx);
        let left = broker.disconnect(&alice).await.unwrap();
        assert_eq!(left.username, "alice");

        let bob_events = events(&mut bob_rx);
        assert_eq!(names(&bob_events), ["participant-left", "message-added"]);
        assert_eq!(messages(&bob_events)[0].content, "alice left the chat");

        for room in broker.rooms().await {
            assert!(!room.has_member(&alice));
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (hub, broker) = setup();
        let _alice_rx = joined(&hub, &broker, "a", "alice").await;
        let mut bob_rx = joined(&hub, &broker, "b", "bob").await;

        assert!(broker.disconnect(&"a".into()).await.is_some());
        assert!(broker.disconnect(&"a".into()).await.is_none());
        assert!(broker.disconnect(&"never".into()).await.is_none());

        let bob_events = events(&mut bob_rx);
        assert_eq!(names(&bob_events), ["participant-left", "message-added"]);
    }

    #[tokio::test]
    async fn test_logout_frees_username() {
        let (hub, broker) = setup();
        let _rx = joined(&hub, &broker, "a", "alice").await;

        broker.handle(&"a".into(), Request::Logout).await.unwrap();
        assert!(broker.join(&"c".into(), "ALICE").await.is_ok());
    }

    #[tokio::test]
    async fn test_history_limit_on_join() {
        let hub = Arc::new(Hub::new());
        let config = BrokerConfig {
            history_limit: 3,
            ..BrokerConfig::default()
        };
        let broker = Broker::with_config(hub.clone(), config);
        let _alice_rx = joined(&hub, &broker, "a", "alice").await;
        for i in 0..10 {
            broker.send(&"a".into(), &format!("m{i}")).await.unwrap();
        }

        let bob = ConnectionId::from("b");
        let mut bob_rx = hub.attach(bob.clone());
        broker.join(&bob, "bob").await.unwrap();

        match &events(&mut bob_rx)[1] {
            ServerEvent::History(history) => {
                let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, ["m7", "m8", "m9"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_keep_log_order() {
        let hub = Arc::new(Hub::new());
        let broker = Arc::new(Broker::new(hub.clone()));

        let mut receivers = Vec::new();
        for i in 0..4 {
            receivers.push(joined(&hub, &broker, &format!("c{i}"), &format!("user{i}")).await);
        }

        let mut tasks = Vec::new();
        for i in 0..4 {
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                let conn = ConnectionId::from(format!("c{i}"));
                for n in 0..25 {
                    broker.send(&conn, &format!("{i}:{n}")).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = broker.get_history(Some(1000)).await;
        let log_ids: Vec<_> = log
            .iter()
            .filter(|m| m.kind == MessageKind::Text)
            .map(|m| m.id)
            .collect();
        assert_eq!(log_ids.len(), 100);
        assert!(log_ids.windows(2).all(|w| w[0] < w[1]));

        for rx in &mut receivers {
            let received = events(rx);
            let ids: Vec<_> = messages(&received)
                .iter()
                .filter(|m| m.kind == MessageKind::Text)
                .map(|m| m.id)
                .collect();
            assert_eq!(ids, log_ids);
        }
    }
}
