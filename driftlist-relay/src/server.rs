//! WebSocket listener: path-demultiplexed sync connections plus a plain
//! HTTP health probe on the same port.

use crate::rooms::{RoomManager, RoomManagerConfig};
use crate::{RelayError, RelayResult};
use driftlist_sync::SyncMessage;
use driftlist_types::Identity;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Shared database file holding every identity's durable state.
    pub db_path: PathBuf,
    /// Per-room persistence intervals.
    pub rooms: RoomManagerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            db_path: PathBuf::from("driftlist-relay.db"),
            rooms: RoomManagerConfig::default(),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    listener: TcpListener,
    rooms: Arc<RoomManager>,
}

impl RelayServer {
    /// Binds the listener and prepares the room manager.
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let rooms = Arc::new(RoomManager::new(config.db_path, config.rooms));
        Ok(Self { listener, rooms })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the room manager, e.g. for a shutdown flush.
    pub fn rooms(&self) -> Arc<RoomManager> {
        self.rooms.clone()
    }

    /// Accept loop. Runs until the task is dropped or the listener fails.
    pub async fn run(self) -> RelayResult<()> {
        info!("[RELAY] listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let rooms = self.rooms.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms).await {
                    debug!("[RELAY] connection from {addr} ended with error: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<RoomManager>,
) -> RelayResult<()> {
    if peek_is_health_probe(&stream).await? {
        return answer_health_probe(&mut stream, &rooms).await;
    }

    // WebSocket handshake, capturing the request path for demultiplexing.
    let mut path = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .await
    .map_err(|e| RelayError::Handshake(e.to_string()))?;

    let identity = match Identity::parse(path.trim_start_matches('/')) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("[RELAY] rejecting {addr}: {e}");
            let (mut sender, _) = ws.split();
            let _ = sender.close().await;
            return Ok(());
        }
    };

    let (room, conn_id, mut fanout_rx) = rooms.join(&identity).await?;
    info!("[RELAY] {addr} joined {identity} as connection {conn_id}");

    let (mut ws_sender, mut ws_receiver) = ws.split();

    // Bootstrap: the relay's full state, before any traffic.
    let bootstrap = room.snapshot_frame().await;
    if ws_sender.send(Message::Text(bootstrap)).await.is_err() {
        rooms.leave(&identity).await;
        return Ok(());
    }

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(raw))) => {
                        match SyncMessage::decode(&raw) {
                            Ok(message) => {
                                let applied = room.merge_and_forward(conn_id, &message).await;
                                if applied > 0 {
                                    debug!(
                                        "[RELAY] {identity}: connection {conn_id} applied {applied} writes"
                                    );
                                }
                            }
                            // Malformed input is dropped, never fatal.
                            Err(e) => warn!("[RELAY] {identity}: dropping malformed message from {addr}: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("[RELAY] {identity}: websocket error from {addr}: {e}");
                        break;
                    }
                }
            }

            outgoing = fanout_rx.recv() => {
                match outgoing {
                    Ok((sender, frame)) => {
                        if sender == conn_id {
                            continue;
                        }
                        if ws_sender.send(Message::Text((*frame).clone())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Too slow for the delta stream: resynchronize with a
                        // full snapshot, which subsumes whatever was missed.
                        warn!("[RELAY] {identity}: connection {conn_id} lagged {n} frames, resnapshotting");
                        let snapshot = room.snapshot_frame().await;
                        if ws_sender.send(Message::Text(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("[RELAY] {addr} left {identity} (connection {conn_id})");
    rooms.leave(&identity).await;
    Ok(())
}

/// Looks at the first bytes of the stream without consuming them: a plain
/// `GET /health` is answered directly; anything else goes through the
/// WebSocket handshake.
async fn peek_is_health_probe(stream: &TcpStream) -> RelayResult<bool> {
    const PROBE: &[u8] = b"GET /health";
    let mut buf = [0u8; 32];
    // The request line arrives in one segment in practice; a couple of
    // retries cover a slow client without stalling the handshake.
    for _ in 0..5 {
        let n = stream.peek(&mut buf).await?;
        if n >= PROBE.len() {
            return Ok(buf.starts_with(PROBE));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(false)
}

async fn answer_health_probe(stream: &mut TcpStream, rooms: &RoomManager) -> RelayResult<()> {
    let stats = rooms.stats().await;
    let status = if rooms.any_degraded().await { "degraded" } else { "ok" };
    let body = serde_json::json!({
        "status": status,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "rooms": stats.rooms,
        "connections": stats.connections,
    })
    .to_string();

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
