//! In-process gateway: one outbound queue per attached connection.
//!
//! The socket task owning a connection drains the receiver returned by
//! [`Hub::attach`] and writes frames to the wire, so every frame for one
//! connection arrives in the order it was queued.

use crate::traits::Gateway;
use dashmap::DashMap;
use huddle_protocol::{ConnectionId, ServerEvent, ServerFrame};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedReceiver<ServerFrame>;

/// Registry of attached connections.
#[derive(Debug, Default)]
pub struct Hub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<ServerFrame>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection, returning its outbound queue.
    ///
    /// Re-attaching an ID replaces the previous queue, which then closes.
    pub fn attach(&self, connection_id: ConnectionId) -> Outbound {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection_id, "Connection attached");
        self.connections.insert(connection_id, tx);
        rx
    }

    /// Detach a connection. Returns `true` if it was attached.
    pub fn detach(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Connection detached");
        }
        removed
    }

    /// Check if a connection is attached.
    #[must_use]
    pub fn is_attached(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Queue an arbitrary frame (acks, errors) for one connection.
    pub fn send_frame(&self, connection_id: &ConnectionId, frame: ServerFrame) -> bool {
        match self.connections.get(connection_id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

impl Gateway for Hub {
    fn unicast(&self, target: &ConnectionId, event: ServerEvent) -> bool {
        trace!(connection = %target, event = event.name(), "Unicast");
        self.send_frame(target, event.into())
    }

    fn broadcast(
        &self,
        recipients: &[ConnectionId],
        event: ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for target in recipients {
            if exclude == Some(target) {
                continue;
            }
            let Some(tx) = self.connections.get(target) else {
                continue;
            };
            if tx.send(ServerFrame::from(event.clone())).is_ok() {
                delivered += 1;
            }
        }
        trace!(event = event.name(), recipients = delivered, "Broadcast");
        delivered
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::{Participant, Reply};

    fn joined(id: &str) -> ServerEvent {
        ServerEvent::ParticipantJoined(Participant::new(id.into(), id))
    }

    fn ids(ids: &[&str]) -> Vec<ConnectionId> {
        ids.iter().map(|id| ConnectionId::from(*id)).collect()
    }

    #[test]
    fn test_attach_detach() {
        let hub = Hub::new();
        let id = ConnectionId::from("c-1");

        let _rx = hub.attach(id.clone());
        assert!(hub.is_attached(&id));
        assert_eq!(hub.connection_count(), 1);

        assert!(hub.detach(&id));
        assert!(!hub.detach(&id));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_unicast() {
        let hub = Hub::new();
        let mut rx = hub.attach("c-1".into());

        assert!(hub.unicast(&"c-1".into(), joined("c-2")));
        assert!(!hub.unicast(&"missing".into(), joined("c-2")));

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.label(), "participant-joined");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_with_exclusion() {
        let hub = Hub::new();
        let mut rx1 = hub.attach("c-1".into());
        let mut rx2 = hub.attach("c-2".into());
        let mut rx3 = hub.attach("c-3".into());

        let count = hub.broadcast(
            &ids(&["c-1", "c-2", "c-3"]),
            joined("c-1"),
            Some(&"c-1".into()),
        );
        assert_eq!(count, 2);

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_only_reaches_recipients() {
        let hub = Hub::new();
        let mut rx1 = hub.attach("c-1".into());
        let mut outsider = hub.attach("c-2".into());

        let count = hub.broadcast(&ids(&["c-1", "gone"]), joined("c-1"), None);
        assert_eq!(count, 1);

        assert!(rx1.try_recv().is_ok());
        assert!(outsider.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let hub = Hub::new();
        let rx = hub.attach("c-1".into());
        let mut rx2 = hub.attach("c-2".into());
        drop(rx);

        assert!(!hub.unicast(&"c-1".into(), joined("x")));
        assert_eq!(hub.broadcast(&ids(&["c-1", "c-2"]), joined("x"), None), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_frames_keep_queue_order() {
        let hub = Hub::new();
        let id = ConnectionId::from("c-1");
        let mut rx = hub.attach(id.clone());

        hub.unicast(&id, ServerEvent::Participants(Vec::new()));
        hub.broadcast(&[id.clone()], joined("c-2"), None);
        hub.send_frame(&id, ServerFrame::ack(Some(1), Reply::Done));

        let labels: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.label())
            .collect();
        assert_eq!(labels, ["participants", "participant-joined", "ack"]);
    }
}
