//! Transport seam: the channel trait and its WebSocket implementation.

use crate::protocol::SyncMessage;
use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use driftlist_types::Identity;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

/// One bidirectional sync channel, scoped to a single identity.
#[async_trait]
pub trait SyncChannel: Send {
    async fn send(&mut self, message: SyncMessage) -> SyncResult<()>;

    /// Next well-formed message, or `None` once the channel is closed.
    /// Malformed frames are logged and skipped, not fatal.
    async fn recv(&mut self) -> Option<SyncMessage>;
}

/// Dials a channel for an identity. A trait so tests can wire synchronizers
/// to in-memory channels instead of a live relay.
#[async_trait]
pub trait SyncConnector: Send + Sync {
    async fn connect(&self, identity: &Identity) -> SyncResult<Box<dyn SyncChannel>>;
}

/// WebSocket channel to the relay.
pub struct WsChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SyncChannel for WsChannel {
    async fn send(&mut self, message: SyncMessage) -> SyncResult<()> {
        self.ws
            .send(Message::Text(message.encode()))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(raw)) => match SyncMessage::decode(&raw) {
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        warn!("[SYNC] dropping malformed message: {e}");
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(Message::Binary(_)) => {
                    warn!("[SYNC] dropping unexpected binary frame");
                }
                // Ping/pong keepalive is handled by tungstenite itself.
                Ok(_) => {}
                Err(e) => {
                    warn!("[SYNC] websocket error: {e}");
                    return None;
                }
            }
        }
    }
}

/// Connector that dials `ws://<relay>/<identity>`.
pub struct WsConnector {
    relay_url: String,
}

impl WsConnector {
    /// `relay_url` is the relay's base address, e.g. `ws://127.0.0.1:8787`.
    pub fn new(relay_url: impl Into<String>) -> Self {
        let mut relay_url = relay_url.into();
        while relay_url.ends_with('/') {
            relay_url.pop();
        }
        Self { relay_url }
    }
}

#[async_trait]
impl SyncConnector for WsConnector {
    async fn connect(&self, identity: &Identity) -> SyncResult<Box<dyn SyncChannel>> {
        let url = format!("{}/{}", self.relay_url, identity);
        let (ws, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Box::new(WsChannel { ws }))
    }
}
