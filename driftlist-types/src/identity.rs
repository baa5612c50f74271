//! Identity — the namespace key for one user's data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of lowercase hex characters in an identity (64 bits).
pub const IDENTITY_LEN: usize = 16;

/// Deterministic, passphrase-derived namespace key for one user's data.
///
/// Always exactly 16 lowercase hex characters. Used as the storage partition
/// key and as the sync channel path segment, so parsing is strict: anything
/// that is not 16 lowercase hex characters is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

/// Error returned when a string is not a well-formed identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identity {0:?}: expected 16 lowercase hex characters")]
pub struct IdentityParseError(pub String);

impl Identity {
    /// Parses an identity, rejecting anything but 16 lowercase hex chars.
    pub fn parse(s: &str) -> Result<Self, IdentityParseError> {
        if s.len() == IDENTITY_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Ok(Self(s.to_string()))
        } else {
            Err(IdentityParseError(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> String {
        id.0
    }
}
