//! Shared fixtures for the Huddle benchmarks.

use huddle_core::{Broker, BrokerConfig};
use huddle_protocol::ConnectionId;
use huddle_transport::{Hub, Outbound};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Single-threaded runtime for driving the async broker from criterion.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime")
}

/// A broker with `size` joined participants (`conn-<i>` / `user-<i>`) and
/// their outbound queues, already drained.
///
/// Retention is capped so long benchmark runs do not grow the log without
/// bound.
///
/// # Panics
///
/// Panics if a join is rejected.
pub fn populated(rt: &Runtime, size: usize) -> (Arc<Hub>, Broker, Vec<Outbound>) {
    let hub = Arc::new(Hub::new());
    let config = BrokerConfig {
        history_retention: Some(1024),
        ..BrokerConfig::default()
    };
    let broker = Broker::with_config(hub.clone(), config);

    let mut receivers = rt.block_on(async {
        let mut receivers = Vec::with_capacity(size);
        for i in 0..size {
            let conn = ConnectionId::from(format!("conn-{i}"));
            receivers.push(hub.attach(conn.clone()));
            broker.join(&conn, &format!("user-{i}")).await.unwrap();
        }
        receivers
    });
    drain(&mut receivers);

    (hub, broker, receivers)
}

/// Discard everything queued for these connections.
pub fn drain(receivers: &mut [Outbound]) {
    for rx in receivers {
        while rx.try_recv().is_ok() {}
    }
}
