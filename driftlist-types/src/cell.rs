//! Cell values and the logical timestamps that order them.

use crate::ReplicaId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar cell value: string, number, or boolean.
///
/// Serialized untagged so the wire and persisted forms are plain JSON
/// scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

/// Logical timestamp attached to every cell write.
///
/// `counter` is a Lamport counter: each replica increments it for local
/// writes and bumps it past any counter observed in a merged delta. The
/// derived `Ord` compares `(counter, replica)`, giving a total order in
/// which concurrent writes with equal counters are broken by the replica
/// tag's byte order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub counter: u64,
    pub replica: ReplicaId,
}

impl Stamp {
    pub fn new(counter: u64, replica: ReplicaId) -> Self {
        Self { counter, replica }
    }

    /// The floor stamp: ordered below every real write.
    pub fn zero() -> Self {
        Self {
            counter: 0,
            replica: ReplicaId::default(),
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.replica)
    }
}
