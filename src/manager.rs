use crate::config::ClientConfig;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::keystore::KeyStore;
use crate::ratchet::{PreKeyMessage, RatchetMessage};
use crate::session::{Session, SessionAddress, SessionBuilder, SessionStore};
use crate::binary::Node;
use crate::{Error, PreKeyBundle};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Source of peer bundles, usually a query to the server.
pub trait BundleFetcher: Send + Sync {
    fn fetch_bundle(
        &self,
        address: &SessionAddress,
    ) -> impl Future<Output = Result<PreKeyBundle, Error>> + Send;
}

/// Fetcher for managers that only ever respond to handshakes.
pub struct NoFetcher;

impl BundleFetcher for NoFetcher {
    async fn fetch_bundle(&self, address: &SessionAddress) -> Result<PreKeyBundle, Error> {
        Err(Error::PeerUnavailable(address.to_string()))
    }
}

/// Runs the cipher for every peer device and turns its output into `<enc>` nodes.
///
/// Operations on the same address are serialized by that address's session lock.
/// Bundle fetches happen before the lock is taken, and the build and commit of
/// a new state happen under it without any await in between, so a cancelled
/// call never leaves a half-written session behind.
pub struct SessionManager<F> {
    key_store: Arc<parking_lot::Mutex<KeyStore>>,
    sessions: SessionStore,
    config: ClientConfig,
    fetcher: Option<F>,
}

impl SessionManager<NoFetcher> {
    pub fn without_fetcher(key_store: Arc<parking_lot::Mutex<KeyStore>>) -> Self {
        Self::new(key_store, None)
    }
}

impl<F: BundleFetcher> SessionManager<F> {
    /// Uses the key store's configuration for every session.
    pub fn new(key_store: Arc<parking_lot::Mutex<KeyStore>>, fetcher: Option<F>) -> Self {
        let config = key_store.lock().config().clone();
        Self {
            key_store,
            sessions: SessionStore::new(),
            config,
            fetcher,
        }
    }

    pub fn key_store(&self) -> &Arc<parking_lot::Mutex<KeyStore>> {
        &self.key_store
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Fetches the peer's bundle within `deadline` and installs a new session state.
    ///
    /// An existing state is archived, not discarded.
    pub async fn establish(&self, address: &SessionAddress, deadline: Duration) -> Result<(), Error> {
        self.establish_inner(address, deadline, false).await
    }

    async fn establish_inner(
        &self,
        address: &SessionAddress,
        deadline: Duration,
        only_if_missing: bool,
    ) -> Result<(), Error> {
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| Error::SessionNotFound(address.to_string()))?;

        let bundle = match tokio::time::timeout(deadline, fetcher.fetch_bundle(address)).await {
            Ok(Ok(bundle)) => bundle,
            Ok(Err(err @ (Error::PeerUnavailable(_) | Error::Timeout))) => return Err(err),
            Ok(Err(err)) => return Err(Error::PeerUnavailable(format!("{address}: {err}"))),
            Err(_) => {
                tracing::warn!(%address, ?deadline, "bundle fetch timed out");
                return Err(Error::Timeout);
            }
        };

        let cell = self.sessions.cell(address);
        let result = {
            let mut session = cell.lock().await;
            self.install_bundle(&mut session, address, &bundle, only_if_missing)
        };
        self.sessions.release(address, cell);
        result
    }

    fn install_bundle(
        &self,
        session: &mut Session,
        address: &SessionAddress,
        bundle: &PreKeyBundle,
        only_if_missing: bool,
    ) -> Result<(), Error> {
        if only_if_missing && session.has_current() {
            return Ok(());
        }
        session.check_identity(address, &bundle.identity_key)?;

        let (state, _) = SessionBuilder::from_pre_key_bundle(bundle, &self.key_store.lock())?;
        tracing::info!(%address, session_id = %state.session_id(), "session established");
        session.promote(state, &self.config);
        Ok(())
    }

    /// Encrypts `plaintext` for the peer and wraps it in an `<enc>` node.
    ///
    /// Without a session, establishes one first if a fetcher is configured.
    pub async fn encrypt(
        &self,
        address: &SessionAddress,
        plaintext: &[u8],
        deadline: Duration,
    ) -> Result<Node, Error> {
        if let Some(cell) = self.sessions.get(address) {
            let mut session = cell.lock().await;
            if session.has_current() {
                return Self::encrypt_locked(&mut session, plaintext);
            }
        }

        if self.fetcher.is_none() {
            return Err(Error::SessionNotFound(address.to_string()));
        }
        tracing::debug!(%address, "no session, establishing before encrypt");
        self.establish_inner(address, deadline, true).await?;

        let cell = self
            .sessions
            .get(address)
            .ok_or_else(|| Error::SessionNotFound(address.to_string()))?;
        let mut session = cell.lock().await;
        if !session.has_current() {
            return Err(Error::SessionNotFound(address.to_string()));
        }
        Self::encrypt_locked(&mut session, plaintext)
    }

    fn encrypt_locked(session: &mut Session, plaintext: &[u8]) -> Result<Node, Error> {
        let message = session.encrypt(plaintext)?;
        Ok(Envelope::from_ciphertext(&message)?.to_node())
    }

    /// Decrypts an `<enc>` node, or a stanza carrying one, received from `address`.
    ///
    /// A `pkmsg` from an unknown handshake builds a responder state. That state and
    /// the one-time pre-key it consumed are only committed if the payload decrypts.
    pub async fn decrypt(&self, address: &SessionAddress, node: &Node) -> Result<Vec<u8>, Error> {
        let envelope = Envelope::from_node(node)?;
        match envelope.kind {
            EnvelopeKind::Message => {
                let cell = self
                    .sessions
                    .get(address)
                    .ok_or_else(|| Error::SessionNotFound(address.to_string()))?;
                let mut session = cell.lock().await;
                if !session.has_current() {
                    return Err(Error::SessionNotFound(address.to_string()));
                }
                let message = RatchetMessage::from_bytes(&envelope.payload)?;
                session.decrypt(&message)
            }
            EnvelopeKind::PreKey => {
                let message = PreKeyMessage::from_bytes(&envelope.payload)?;
                let cell = self.sessions.cell(address);
                let result = {
                    let mut session = cell.lock().await;
                    self.accept_pre_key_message(&mut session, address, &message)
                };
                self.sessions.release(address, cell);
                result
            }
        }
    }

    fn accept_pre_key_message(
        &self,
        session: &mut Session,
        address: &SessionAddress,
        message: &PreKeyMessage,
    ) -> Result<Vec<u8>, Error> {
        if session.has_base_key(&message.base_key) {
            return session.decrypt_with_base_key(&message.base_key, &message.message);
        }
        session.check_identity(address, &message.identity_key)?;

        let (mut state, consumed) =
            SessionBuilder::from_pre_key_message(message, &mut self.key_store.lock())?;

        match state.decrypt(&message.message) {
            Ok(plaintext) => {
                tracing::info!(%address, session_id = %state.session_id(), "session accepted");
                session.promote(state, &self.config);
                Ok(plaintext)
            }
            Err(err) => {
                if let Some(pre_key) = consumed {
                    self.key_store.lock().restore_pre_key(pre_key);
                }
                tracing::warn!(%address, error = %err, "pre-key message rejected");
                Err(err)
            }
        }
    }

    /// Trusts a changed peer identity by discarding the session bound to the old one.
    pub async fn accept_identity(&self, address: &SessionAddress) {
        tracing::warn!(%address, "accepting new identity, session reset");
        self.reset_session(address).await;
    }

    pub async fn has_session(&self, address: &SessionAddress) -> bool {
        match self.sessions.get(address) {
            Some(cell) => cell.lock().await.has_current(),
            None => false,
        }
    }

    /// Discards every state for the peer and forgets the address.
    pub async fn reset_session(&self, address: &SessionAddress) {
        if let Some(cell) = self.sessions.get(address) {
            cell.lock().await.reset();
            self.sessions.release(address, cell);
        }
    }
}
