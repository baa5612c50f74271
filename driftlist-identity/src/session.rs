//! Session state machine: `Anonymous ⇄ Authenticated`.
//!
//! The current identity is persisted through a [`SessionStore`] so a
//! restart re-enters `Authenticated` without the passphrase. The passphrase
//! itself is kept only in memory for the lifetime of the session and is
//! never written anywhere.

use crate::passphrase::derive_identity;
use crate::{IdentityError, IdentityResult};
use driftlist_types::Identity;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Durable storage seam for the current session's identity.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Identity>, String>;
    fn save(&self, identity: &Identity) -> Result<(), String>;
    fn clear(&self) -> Result<(), String>;
}

/// In-memory session store for tests and ephemeral contexts.
#[derive(Default)]
pub struct MemorySessionStore {
    current: Mutex<Option<Identity>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Identity>, String> {
        Ok(self.current.lock().unwrap().clone())
    }

    fn save(&self, identity: &Identity) -> Result<(), String> {
        *self.current.lock().unwrap() = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), String> {
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

/// Current session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated { identity: Identity },
}

/// The session: derives identities from passphrases and tracks the current
/// one across restarts.
pub struct Session {
    state: SessionState,
    /// Held in memory only; `None` after a passphrase-less restore.
    passphrase: Option<String>,
    store: Arc<dyn SessionStore>,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            state: SessionState::Anonymous,
            passphrase: None,
            store,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The passphrase of the current session, if it was entered this
    /// process lifetime (a restored session has none).
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }

    /// The current identity, if authenticated.
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated { identity } => Some(identity),
            SessionState::Anonymous => None,
        }
    }

    /// Derives the identity for `passphrase`, persists it as the current
    /// session, and transitions to `Authenticated`.
    ///
    /// Derivation failures are synchronous and leave the session untouched.
    pub fn set_identity(&mut self, passphrase: &str) -> IdentityResult<Identity> {
        let identity = derive_identity(passphrase)?;
        self.store
            .save(&identity)
            .map_err(IdentityError::SessionStore)?;
        self.passphrase = Some(passphrase.trim().to_string());
        self.state = SessionState::Authenticated {
            identity: identity.clone(),
        };
        info!("[SESSION] authenticated as {identity}");
        Ok(identity)
    }

    /// Re-enters `Authenticated` from the persisted identity, if any. Does
    /// not need (and cannot recover) the passphrase.
    pub fn restore(&mut self) -> IdentityResult<Option<Identity>> {
        match self.store.load().map_err(IdentityError::SessionStore)? {
            Some(identity) => {
                self.state = SessionState::Authenticated {
                    identity: identity.clone(),
                };
                info!("[SESSION] restored session for {identity}");
                Ok(Some(identity))
            }
            None => Ok(None),
        }
    }

    /// Clears both in-memory and persisted session state.
    pub fn logout(&mut self) -> IdentityResult<()> {
        self.store.clear().map_err(IdentityError::SessionStore)?;
        self.passphrase = None;
        self.state = SessionState::Anonymous;
        info!("[SESSION] logged out");
        Ok(())
    }
}
