//! Connection handlers for Huddle server.
//!
//! This module handles the connection lifecycle, request dispatch and the
//! read-only HTTP endpoints.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use huddle_core::Broker;
use huddle_protocol::{
    codec, ClientFrame, ConnectionId, ProtocolError, Request, ServerFrame, WireFormat,
};
use huddle_transport::{Gateway, Hub, Outbound, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Error code for frames that could not be decoded.
const BAD_REQUEST_CODE: u16 = 1400;

/// Shared server state.
pub struct AppState {
    /// The presence broker.
    pub broker: Broker,
    /// Outbound queues of every open connection.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(Hub::new());
        let broker = Broker::with_config(hub.clone(), config.broker_config());

        Self {
            broker,
            hub,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broker.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count(),
        "participants": stats.participant_count,
        "rooms": stats.room_count,
    }))
}

/// Statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broker.stats().await;
    Json(serde_json::json!({
        "total_participants": stats.participant_count,
        "total_messages": stats.total_messages,
        "total_rooms": stats.room_count,
        "participants": state.broker.participants().await,
        "rooms": state.broker.rooms().await,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection refused: limit reached"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection from upgrade to cleanup.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    let mut outbound = state.hub.attach(connection_id.clone());
    let (mut sender, mut receiver) = socket.split();

    match serve_connection(
        &connection_id,
        &state,
        &mut outbound,
        &mut sender,
        &mut receiver,
    )
    .await
    {
        Ok(()) => debug!(connection = %connection_id, "WebSocket closed"),
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "WebSocket closed with error");
            metrics::record_error("websocket");
        }
    }

    // Detach first so the leave announcement is not queued for a dead socket.
    state.hub.detach(&connection_id);
    state.broker.disconnect(&connection_id).await;
    metrics::set_broker_stats(&state.broker.stats().await);

    let _ = sender.close().await;
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Per-connection socket state.
struct Session {
    format: WireFormat,
    read_buffer: BytesMut,
    last_seen: Instant,
}

/// Pump frames between the socket and the broker until the connection ends.
async fn serve_connection(
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    outbound: &mut Outbound,
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> Result<(), TransportError> {
    let heartbeat = &state.config.heartbeat;
    let interval = Duration::from_millis(heartbeat.interval_ms.max(1));
    let timeout = Duration::from_millis(heartbeat.timeout_ms);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    let mut session = Session {
        format: WireFormat::default(),
        read_buffer: BytesMut::with_capacity(4096),
        last_seen: Instant::now(),
    };

    state.hub.send_frame(
        connection_id,
        ServerFrame::welcome(
            connection_id.clone(),
            advertised_heartbeat(heartbeat.interval_ms),
        ),
    );

    loop {
        tokio::select! {
            biased;

            // Frames queued by the broker or by request handling
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return Err(TransportError::ConnectionClosed);
                };
                send_frame(sender, &frame, session.format).await?;
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                session.last_seen = Instant::now();
                let open = match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.format = WireFormat::Json;
                        metrics::record_frame("client", text.len(), "inbound");
                        match codec::decode_json::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(frame, connection_id, state).await,
                            Err(e) => {
                                reject_malformed(connection_id, state, &e);
                                true
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        session.format = WireFormat::MessagePack;
                        metrics::record_frame("client", data.len(), "inbound");
                        session.read_buffer.extend_from_slice(&data);
                        drain_binary(&mut session.read_buffer, connection_id, state).await?
                    }
                    Some(Ok(Message::Ping(data))) => {
                        sender
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                        true
                    }
                    Some(Ok(Message::Pong(_))) => true,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        false
                    }
                    Some(Err(e)) => return Err(TransportError::Other(e.to_string())),
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        false
                    }
                };

                if !open {
                    // Flush the acknowledgement of a logout before closing.
                    while let Ok(frame) = outbound.try_recv() {
                        send_frame(sender, &frame, session.format).await?;
                    }
                    return Ok(());
                }
            }

            _ = ticker.tick() => {
                if session.last_seen.elapsed() > timeout {
                    return Err(TransportError::Timeout(heartbeat.timeout_ms));
                }
                sender
                    .send(Message::Ping(Vec::new()))
                    .await
                    .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            }
        }
    }
}

/// Heartbeat interval as sent in `welcome`, saturating at `u32::MAX`.
fn advertised_heartbeat(interval_ms: u64) -> u32 {
    u32::try_from(interval_ms).unwrap_or(u32::MAX)
}

/// Decode and handle every complete MessagePack frame in the buffer.
///
/// Returns `false` once a request asks to close the connection.
async fn drain_binary(
    buffer: &mut BytesMut,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
) -> Result<bool, TransportError> {
    loop {
        match codec::decode_from::<ClientFrame>(buffer) {
            Ok(Some(frame)) => {
                if !handle_frame(frame, connection_id, state).await {
                    return Ok(false);
                }
            }
            Ok(None) => return Ok(true),
            // Cannot resynchronise past an oversized length prefix.
            Err(e @ ProtocolError::FrameTooLarge(_)) => {
                reject_malformed(connection_id, state, &e);
                return Err(e.into());
            }
            Err(e) => reject_malformed(connection_id, state, &e),
        }
    }
}

/// Apply one request and queue its acknowledgement.
///
/// Returns `false` if the connection should close afterwards.
async fn handle_frame(frame: ClientFrame, connection_id: &ConnectionId, state: &AppState) -> bool {
    let start = std::time::Instant::now();
    let ClientFrame { id, request } = frame;
    let kind = request.kind();
    let keep_open = !matches!(request, Request::Logout);
    let changes_membership = matches!(
        request,
        Request::Join { .. } | Request::CreateRoom { .. } | Request::Logout
    );
    metrics::record_request(kind);

    let response = match state.broker.handle(connection_id, request).await {
        Ok(reply) => ServerFrame::ack(id, reply),
        Err(e) => {
            metrics::record_rejection(e.reason());
            ServerFrame::error(id, e.code(), e.reason(), e.to_string())
        }
    };
    state.hub.send_frame(connection_id, response);

    metrics::record_latency(start.elapsed().as_secs_f64());
    if changes_membership {
        metrics::set_broker_stats(&state.broker.stats().await);
    }
    keep_open
}

/// Tell the client its frame could not be decoded.
fn reject_malformed(connection_id: &ConnectionId, state: &AppState, error: &ProtocolError) {
    warn!(connection = %connection_id, error = %error, "Malformed frame");
    metrics::record_error("bad_request");
    state.hub.send_frame(
        connection_id,
        ServerFrame::error(None, BAD_REQUEST_CODE, "bad-request", error.to_string()),
    );
}

/// Send a frame to the WebSocket in the connection's wire format.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
    format: WireFormat,
) -> Result<(), TransportError> {
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_json(frame)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    let size = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(frame.label(), size, "outbound");

    sender
        .send(message)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}
