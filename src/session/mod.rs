mod builder;
pub use builder::*;
mod store;
pub use store::*;

use crate::config::ClientConfig;
use crate::ratchet::{CiphertextMessage, RatchetMessage, SessionState};
use crate::types::X25519PublicKey;
use crate::{Error, IdentityPublicKey};
use std::collections::VecDeque;
use std::fmt;
use std::time::SystemTime;

/// A peer device. Sessions are kept per device, not per user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionAddress {
    pub user: String,
    pub device: u32,
}

impl SessionAddress {
    pub fn new(user: impl Into<String>, device: u32) -> Self {
        Self {
            user: user.into(),
            device,
        }
    }
}

impl fmt::Display for SessionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.user, self.device)
    }
}

struct ArchivedState {
    state: SessionState,
    archived_at: SystemTime,
}

/// The session with one peer device: the state in use plus superseded states
/// that may still receive late messages.
#[derive(Default)]
pub struct Session {
    current: Option<SessionState>,
    /// Newest first.
    archived: VecDeque<ArchivedState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn archived_count(&self) -> usize {
        self.archived.len()
    }

    /// No state at all, current or archived.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.archived.is_empty()
    }

    /// Fails with [`Error::UntrustedIdentity`] if the current state belongs to a different identity.
    pub fn check_identity(
        &self,
        address: &SessionAddress,
        identity: &IdentityPublicKey,
    ) -> Result<(), Error> {
        match &self.current {
            Some(current) if current.remote_identity() != identity => {
                tracing::warn!(%address, "peer identity changed");
                Err(Error::UntrustedIdentity(address.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Installs a new current state. The previous one is archived.
    pub fn promote(&mut self, state: SessionState, config: &ClientConfig) {
        self.promote_at(state, config, SystemTime::now());
    }

    pub(crate) fn promote_at(&mut self, state: SessionState, config: &ClientConfig, now: SystemTime) {
        if let Some(previous) = self.current.replace(state) {
            self.archived.push_front(ArchivedState {
                state: previous,
                archived_at: now,
            });
        }
        self.prune_archived_at(config, now);
    }

    /// Drops archived states beyond the count limit or older than the age limit.
    pub fn prune_archived_at(&mut self, config: &ClientConfig, now: SystemTime) {
        self.archived.retain(|archived| {
            now.duration_since(archived.archived_at).unwrap_or_default()
                <= config.archived_state_max_age
        });
        self.archived.truncate(config.max_archived_states);
    }

    /// Discards every state.
    pub fn reset(&mut self) {
        self.current = None;
        self.archived.clear();
    }

    /// Whether any state, current or archived, was built from this handshake.
    pub fn has_base_key(&self, base_key: &X25519PublicKey) -> bool {
        self.current
            .iter()
            .chain(self.archived.iter().map(|archived| &archived.state))
            .any(|state| state.base_key() == base_key)
    }

    /// Encrypts with the current state. Atomic: on error nothing changes.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage, Error> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| Error::Protocol("session has no current state".to_string()))?;

        let mut next = current.clone();
        let message = next.encrypt(plaintext)?;
        *current = next;
        Ok(message)
    }

    /// Decrypts with the current state, then with each archived state.
    ///
    /// An archived state that succeeds becomes current again. When nothing
    /// succeeds the current state's error is returned.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, Error> {
        let first_error = match self.current.as_mut() {
            Some(current) => match current.decrypt(message) {
                Ok(plaintext) => return Ok(plaintext),
                Err(err) => err,
            },
            None => Error::Protocol("session has no current state".to_string()),
        };

        for index in 0..self.archived.len() {
            let Some(archived) = self.archived.get_mut(index) else {
                break;
            };
            if let Ok(plaintext) = archived.state.decrypt(message) {
                if let Some(revived) = self.archived.remove(index) {
                    tracing::debug!(session_id = %revived.state.session_id(), "archived session state revived");
                    if let Some(previous) = self.current.replace(revived.state) {
                        self.archived.push_front(ArchivedState {
                            state: previous,
                            archived_at: SystemTime::now(),
                        });
                    }
                }
                return Ok(plaintext);
            }
        }

        Err(first_error)
    }

    /// Decrypts with the state built from `base_key`, wherever it is.
    pub(crate) fn decrypt_with_base_key(
        &mut self,
        base_key: &X25519PublicKey,
        message: &RatchetMessage,
    ) -> Result<Vec<u8>, Error> {
        if let Some(current) = self.current.as_mut() {
            if current.base_key() == base_key {
                return current.decrypt(message);
            }
        }
        self.archived
            .iter_mut()
            .find(|archived| archived.state.base_key() == base_key)
            .ok_or_else(|| Error::Protocol("no state for base key".to_string()))?
            .state
            .decrypt(message)
    }
}
