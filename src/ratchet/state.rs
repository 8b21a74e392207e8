use super::chain::Chain;
use super::skipped::SkippedKeys;
use crate::config::ClientConfig;
use crate::types::{X25519PublicKey, X25519Secret};
use crate::x3dh::AgreedKeys;
use crate::{IdentityPublicKey, PreKeyBundle};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Older peer ratchet keys remembered so their late messages are recognised.
const RETIRED_PEER_KEYS: usize = 16;

/// Handshake parameters an initiator repeats until the peer replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingPreKey {
    pub(crate) pre_key_id: Option<u32>,
    pub(crate) signed_pre_key_id: u32,
    pub(crate) base_key: X25519PublicKey,
    pub(crate) local_identity: IdentityPublicKey,
    pub(crate) local_registration_id: u32,
}

/// Everything one side of a session needs to encrypt and decrypt.
#[derive(Clone)]
pub struct SessionState {
    pub(crate) session_id: String,
    pub(crate) remote_identity: IdentityPublicKey,
    pub(crate) remote_registration_id: u32,
    pub(crate) base_key: X25519PublicKey,
    pub(crate) root_key: Box<[u8; 32]>,
    pub(crate) sending_chain: Option<Chain>,
    pub(crate) receiving_chain: Option<Chain>,
    pub(crate) self_ratchet: X25519Secret,
    pub(crate) peer_ratchet: X25519PublicKey,
    pub(crate) retired_peer_ratchets: VecDeque<X25519PublicKey>,
    pub(crate) previous_counter: u32,
    /// Set after a receive ratchet; the next encrypt starts a new sending chain.
    pub(crate) pending_ratchet: bool,
    pub(crate) skipped: SkippedKeys,
    pub(crate) pending_pre_key: Option<PendingPreKey>,
    /// initiator identity ‖ responder identity
    pub(crate) associated_data: Box<[u8; 64]>,
    pub(crate) max_message_gap: u32,
}

impl SessionState {
    /// State of the side that consumed a bundle. The X3DH ephemeral key doubles
    /// as the first ratchet key and the agreed chain key starts the sending chain.
    pub(crate) fn initiator(
        keys: &AgreedKeys,
        ephemeral: X25519Secret,
        local_identity: IdentityPublicKey,
        local_registration_id: u32,
        bundle: &PreKeyBundle,
        config: &ClientConfig,
    ) -> Self {
        let base_key = ephemeral.public_key();
        let remote_identity = bundle.identity_key;

        Self {
            session_id: derive_session_id(&local_identity, &remote_identity, &base_key),
            remote_identity,
            remote_registration_id: bundle.registration_id,
            base_key,
            root_key: keys.root_key.clone(),
            sending_chain: Some(Chain::new(keys.chain_key.clone())),
            receiving_chain: None,
            self_ratchet: ephemeral,
            peer_ratchet: bundle.signed_pre_key,
            retired_peer_ratchets: VecDeque::new(),
            previous_counter: 0,
            pending_ratchet: false,
            skipped: SkippedKeys::new(config.max_skipped_message_keys as usize),
            pending_pre_key: Some(PendingPreKey {
                pre_key_id: bundle.one_time_pre_key.map(|(id, _)| id),
                signed_pre_key_id: bundle.signed_pre_key_id,
                base_key,
                local_identity,
                local_registration_id,
            }),
            associated_data: associated_data(&local_identity, &remote_identity),
            max_message_gap: config.max_message_gap,
        }
    }

    /// State of the side that received a pre-key message. The signed pre-key is
    /// its ratchet key until it first replies.
    pub(crate) fn responder(
        keys: &AgreedKeys,
        signed_pre_key: X25519Secret,
        local_identity: IdentityPublicKey,
        remote_identity: IdentityPublicKey,
        remote_registration_id: u32,
        base_key: X25519PublicKey,
        config: &ClientConfig,
    ) -> Self {
        Self {
            session_id: derive_session_id(&remote_identity, &local_identity, &base_key),
            remote_identity,
            remote_registration_id,
            base_key,
            root_key: keys.root_key.clone(),
            sending_chain: None,
            receiving_chain: Some(Chain::new(keys.chain_key.clone())),
            self_ratchet: signed_pre_key,
            peer_ratchet: base_key,
            retired_peer_ratchets: VecDeque::new(),
            previous_counter: 0,
            pending_ratchet: true,
            skipped: SkippedKeys::new(config.max_skipped_message_keys as usize),
            pending_pre_key: None,
            associated_data: associated_data(&remote_identity, &local_identity),
            max_message_gap: config.max_message_gap,
        }
    }

    /// Identical on both sides of a session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn remote_identity(&self) -> &IdentityPublicKey {
        &self.remote_identity
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    /// The initiator's X3DH ephemeral key, which identifies the handshake.
    pub fn base_key(&self) -> &X25519PublicKey {
        &self.base_key
    }

    /// Whether outgoing messages still carry the handshake.
    pub fn has_pending_pre_key(&self) -> bool {
        self.pending_pre_key.is_some()
    }

    pub fn ratchet_public_key(&self) -> X25519PublicKey {
        self.self_ratchet.public_key()
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    pub(crate) fn retire_peer_ratchet(&mut self, key: X25519PublicKey) {
        if self.retired_peer_ratchets.contains(&key) {
            return;
        }
        if self.retired_peer_ratchets.len() >= RETIRED_PEER_KEYS {
            self.retired_peer_ratchets.pop_front();
        }
        self.retired_peer_ratchets.push_back(key);
    }
}

fn associated_data(initiator: &IdentityPublicKey, responder: &IdentityPublicKey) -> Box<[u8; 64]> {
    let mut ad = Box::new([0u8; 64]);
    ad[0..32].copy_from_slice(initiator.dh.as_bytes());
    ad[32..64].copy_from_slice(responder.dh.as_bytes());
    ad
}

/// SHA-256 over both identities and the base key, base64 encoded.
fn derive_session_id(
    initiator: &IdentityPublicKey,
    responder: &IdentityPublicKey,
    base_key: &X25519PublicKey,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(initiator.dh.as_bytes());
    hasher.update(responder.dh.as_bytes());
    hasher.update(base_key.as_bytes());

    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
