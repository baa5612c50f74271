//! Wire protocol: two message kinds, JSON over WebSocket text frames.

use driftlist_store::Delta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed wire message. Dropped and logged by the receiver, never
/// fatal to the channel.
#[derive(Debug, Error)]
#[error("malformed sync message: {0}")]
pub struct ProtocolError(String);

/// The two messages replicas and the relay exchange.
///
/// A `Snapshot` carries the sender's full state and is sent once, in both
/// directions, when a connection is established — it bootstraps late
/// joiners and previously-offline replicas. `Deltas` carries the debounced
/// incremental changes of normal operation. Both merge identically on
/// receipt; the distinction exists only for logging and intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    Snapshot { delta: Delta },
    Deltas { delta: Delta },
}

impl SyncMessage {
    pub fn delta(&self) -> &Delta {
        match self {
            SyncMessage::Snapshot { delta } | SyncMessage::Deltas { delta } => delta,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("sync messages always serialize")
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError(e.to_string()))
    }
}
