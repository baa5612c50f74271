//! Replica-side synchronization for Driftlist.
//!
//! The [`Synchronizer`] wraps a local [`driftlist_store::MergeableStore`],
//! keeps a channel to the relay open, and converges local and remote state:
//! a full snapshot both ways at connection establishment, debounced
//! incremental deltas afterwards. Disconnection is non-fatal — the
//! synchronizer reconnects with exponential backoff and self-heals through
//! a fresh snapshot bootstrap.

mod protocol;
mod synchronizer;
mod transport;

pub use protocol::{ProtocolError, SyncMessage};
pub use synchronizer::{
    create_synchronizer, SyncCommand, SyncConfig, SyncEvent, Synchronizer, SynchronizerHandle,
};
pub use transport::{SyncChannel, SyncConnector, WsChannel, WsConnector};

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient transport failure: connect, send, or receive. Retried with
    /// backoff, never surfaced as data loss.
    #[error("transport error: {0}")]
    Transport(String),

    /// The command channel to the synchronizer is gone.
    #[error("synchronizer channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
