//! Identity derivation and session state for Driftlist.
//!
//! A user's whole account is one memorized 12-word passphrase. The
//! passphrase deterministically derives a 16-hex-character identity that
//! names both the durable storage partition and the sync channel, so a
//! second device "logs in" by deriving the same identity from the same
//! words. There is no server-side account and no reset: the passphrase is
//! the only secret.

mod passphrase;
mod session;

pub use passphrase::{derive_identity, generate_passphrase};
pub use session::{MemorySessionStore, Session, SessionState, SessionStore};

use thiserror::Error;

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur deriving identities or managing the session.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Malformed passphrase, rejected at the boundary before any derivation.
    #[error("invalid passphrase: {0}")]
    InvalidInput(String),

    /// The persisted session record could not be read or written.
    #[error("session store error: {0}")]
    SessionStore(String),

    /// Entropy generation failed while creating a new passphrase.
    #[error("passphrase generation failed: {0}")]
    Generation(String),
}
