//! End-to-end throughput benchmark for Relay.
//!
//! Measures relayed chat messages per second over real WebSocket connections:
//! one client creates a channel, the rest join it by invite key, and every
//! client sends as fast as it can while counting what it receives.
//!
//! Usage: `e2e_throughput [clients] [url]`

use futures_util::{SinkExt, StreamExt};
use relay_protocol::{extract_invite_key, InviteKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_URL: &str = "ws://127.0.0.1:5000/";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16).max(2);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Relay End-to-End Throughput Benchmark                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_channel_benchmark(num_clients, url).await
}

async fn run_channel_benchmark(num_clients: usize, url: String) -> Result<(), BoxError> {
    println!("📊 Channel Benchmark: {} clients at {}", num_clients, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let (creator, key) = create_channel(&url).await?;
    println!("✓ Channel created, invite key {}", key);

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    handles.push(spawn_client(0, creator, &message_count, &barrier));
    for client_id in 1..num_clients {
        let ws = join_channel(&url, &key).await?;
        handles.push(spawn_client(client_id, ws, &message_count, &barrier));
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("✓ All {} clients joined", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Messages Received:    {:>10}                           ║",
        total_messages
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        msgs_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Read text frames until one arrives.
async fn next_line(ws: &mut Socket) -> Result<String, BoxError> {
    while let Some(frame) = ws.next().await {
        if let Message::Text(text) = frame? {
            return Ok(text);
        }
    }
    Err("connection closed".into())
}

/// Connect and skip the welcome line.
async fn connect(url: &str) -> Result<Socket, BoxError> {
    let (mut ws, _) = connect_async(url).await?;
    next_line(&mut ws).await?;
    Ok(ws)
}

async fn create_channel(url: &str) -> Result<(Socket, InviteKey), BoxError> {
    let mut ws = connect(url).await?;
    ws.send(Message::Text("create".to_string())).await?;

    let line = next_line(&mut ws).await?;
    let key = extract_invite_key(&line).ok_or_else(|| format!("unexpected reply: {line}"))?;
    Ok((ws, key))
}

async fn join_channel(url: &str, key: &InviteKey) -> Result<Socket, BoxError> {
    let mut ws = connect(url).await?;
    ws.send(Message::Text(format!("join {key}"))).await?;

    let line = next_line(&mut ws).await?;
    if !line.starts_with("[System]") {
        return Err(format!("join refused: {line}").into());
    }
    Ok(ws)
}

fn spawn_client(
    client_id: usize,
    ws: Socket,
    message_count: &Arc<AtomicU64>,
    barrier: &Arc<Barrier>,
) -> tokio::task::JoinHandle<()> {
    let message_count = Arc::clone(message_count);
    let barrier = Arc::clone(barrier);

    tokio::spawn(async move {
        if let Err(e) = run_client(client_id, ws, message_count, barrier).await {
            eprintln!("Client {} error: {}", client_id, e);
        }
    })
}

async fn run_client(
    client_id: usize,
    ws: Socket,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (mut sender, mut receiver) = ws.split();

    // Wait for all clients to be ready
    barrier.wait().await;

    let message = Message::Text(format!("client {client_id}: {}", "x".repeat(48)));

    // Spawn separate receiver task for full-duplex operation
    let recv_count = message_count.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(_)) = result {
                recv_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    // Send loop - no waiting, just blast messages
    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
