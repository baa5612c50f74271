//! The Driftlist relay.
//!
//! A rendezvous, not a compute node: it demultiplexes WebSocket
//! connections by identity path, keeps one in-memory store per connected
//! identity, merges whatever arrives, forwards what each merge actually
//! changed to the identity's other connections, and persists durably so a
//! lone replica can sync against yesterday's state.

mod rooms;
mod server;

pub use rooms::{Room, RoomManager, RoomManagerConfig, RoomMessage, RoomStats};
pub use server::{RelayConfig, RelayServer};

use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur running the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] driftlist_storage::StorageError),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}
