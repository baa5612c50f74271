//! Replica tags — per-device write provenance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tag identifying the replica (device/store instance) that produced
/// a write.
///
/// The derived `Ord` compares the underlying string as an unsigned byte
/// sequence, which is the total order used for last-writer-wins tie-breaks.
/// Every replica computes the same order, so ties resolve identically
/// everywhere.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Generates a fresh random tag for a new store instance.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wraps an explicit tag (tests, fixed relay tags).
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
