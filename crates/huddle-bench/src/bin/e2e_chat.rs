//! End-to-end chat benchmark for Huddle.
//!
//! Connects N clients over real WebSockets, joins each one, then has every
//! client post messages as fast as it can while counting the
//! `message-added` events delivered back.

use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, ClientFrame, Request, ServerEvent, ServerFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A client whose join has been acknowledged.
struct JoinedClient {
    sender: SplitSink<Socket, Message>,
    receiver: SplitStream<Socket>,
    recv_buf: BytesMut,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Huddle end-to-end chat benchmark");
    println!("  server:  {url} (start it with: cargo run --release --bin huddle)");
    println!("  clients: {num_clients}");
    println!("  warmup {WARMUP_SECS}s, measure {BENCH_SECS}s");
    println!();

    let delivered = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let delivered = Arc::clone(&delivered);
        let sent = Arc::clone(&sent);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            let joined = join_client(&url, client_id).await;
            // Always reach the barrier so a failed join cannot stall the run.
            barrier.wait().await;

            let result = match joined {
                Ok(client) => run_client(client, client_id, delivered, sent).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                eprintln!("Client {client_id} error: {e}");
            }
        }));
    }

    barrier.wait().await;
    println!("All {num_clients} clients finished joining");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    delivered.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    let elapsed = start.elapsed().as_secs_f64();

    let delivered = delivered.load(Ordering::SeqCst);
    let sent = sent.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  duration:         {elapsed:>10.2}s");
    println!("  messages sent:    {sent:>10}");
    println!("  events delivered: {delivered:>10}");
    println!("  send rate:        {:>10.0} msg/s", sent as f64 / elapsed);
    println!("  delivery rate:    {:>10.0} events/s", delivered as f64 / elapsed);

    for handle in handles {
        handle.abort();
    }
}

/// Connect and wait for the join acknowledgement.
async fn join_client(url: &str, client_id: usize) -> Result<JoinedClient, BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let join = ClientFrame::new(
        1,
        Request::Join {
            username: format!("bench-{client_id}"),
        },
    );
    sender
        .send(Message::Binary(codec::encode(&join)?.to_vec()))
        .await?;

    let mut recv_buf = BytesMut::with_capacity(65536);
    while let Some(message) = receiver.next().await {
        match message? {
            Message::Binary(data) => recv_buf.extend_from_slice(&data),
            Message::Text(text) => {
                if let Ok(ServerFrame::Ack { id: Some(1), .. }) =
                    codec::decode_json::<ServerFrame>(&text)
                {
                    return Ok(JoinedClient {
                        sender,
                        receiver,
                        recv_buf,
                    });
                }
                continue;
            }
            _ => continue,
        }
        while let Some(frame) = codec::decode_from::<ServerFrame>(&mut recv_buf)? {
            match frame {
                ServerFrame::Ack { id: Some(1), .. } => {
                    return Ok(JoinedClient {
                        sender,
                        receiver,
                        recv_buf,
                    })
                }
                ServerFrame::Error { message, .. } => return Err(message.into()),
                _ => {}
            }
        }
    }

    Err("connection closed before join was acknowledged".into())
}

/// Post messages until the connection fails, counting deliveries.
async fn run_client(
    client: JoinedClient,
    client_id: usize,
    delivered: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
) -> Result<(), BoxError> {
    let JoinedClient {
        mut sender,
        mut receiver,
        mut recv_buf,
    } = client;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Binary(data) = message {
                recv_buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from::<ServerFrame>(&mut recv_buf) {
                    if let ServerFrame::Event {
                        event: ServerEvent::MessageAdded(_),
                    } = frame
                    {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    let frame = ClientFrame {
        id: None,
        request: Request::SendMessage {
            content: format!("hello from {client_id}"),
        },
    };
    let payload = Message::Binary(codec::encode(&frame)?.to_vec());

    loop {
        if sender.send(payload.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
