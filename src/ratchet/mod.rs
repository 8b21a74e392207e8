mod chain;
mod message;
mod skipped;
mod state;

use chain::Chain;
pub use message::*;
pub use state::SessionState;

use crate::Error;
use crate::types::X25519Secret;
use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

const NONCE_SIZE: usize = 12;

const ROOT_INFO: &[u8] = b"Nodewire-Ratchet";
const MESSAGE_KEYS_INFO: &[u8] = b"Nodewire-Message-Keys";

/// Message keys derived while catching up a receiving chain, not yet committed.
type StagedKeys = Vec<(u32, Box<[u8; 32]>)>;

impl SessionState {
    /// Encrypts one message and advances the sending chain.
    ///
    /// Runs the deferred sending ratchet first when a new peer ratchet key has
    /// been received since the last send.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage, Error> {
        if self.pending_ratchet || self.sending_chain.is_none() {
            self.ratchet_sending()?;
        }

        let chain = self
            .sending_chain
            .as_mut()
            .ok_or_else(|| Error::Protocol("no sending chain".to_string()))?;
        let counter = chain.index;
        let mut message_key = chain.next()?;

        let header = MessageHeader {
            ratchet_key: self.self_ratchet.public_key(),
            previous_counter: self.previous_counter,
            counter,
        };
        let ciphertext = seal(&message_key, plaintext, &self.message_ad(&header));
        message_key.zeroize();

        let message = RatchetMessage {
            header,
            ciphertext: ciphertext?,
        };

        Ok(match &self.pending_pre_key {
            Some(pending) => CiphertextMessage::PreKey(PreKeyMessage {
                registration_id: pending.local_registration_id,
                pre_key_id: pending.pre_key_id,
                signed_pre_key_id: pending.signed_pre_key_id,
                base_key: pending.base_key,
                identity_key: pending.local_identity,
                message,
            }),
            None => CiphertextMessage::Whisper(message),
        })
    }

    /// Decrypts one message.
    ///
    /// Every key derived along the way is staged and only written back once the
    /// ciphertext authenticates, so a rejected message leaves the state as it was.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, Error> {
        let header = message.header;
        let ratchet_key = header.ratchet_key.to_bytes();
        let ad = self.message_ad(&header);

        let is_current = header.ratchet_key == self.peer_ratchet;
        let is_retired = self.retired_peer_ratchets.contains(&header.ratchet_key);

        if is_current || is_retired {
            let behind = match (&self.receiving_chain, is_current) {
                (Some(chain), true) => header.counter < chain.index,
                (None, true) => return Err(Error::DecryptionFailed),
                (_, false) => true,
            };

            if behind {
                let Some(message_key) = self.skipped.get(&ratchet_key, header.counter) else {
                    return Err(Error::DuplicateMessage(header.counter));
                };
                let plaintext = open(message_key, &message.ciphertext, &ad)?;
                self.skipped.remove(&ratchet_key, header.counter);
                self.pending_pre_key = None;
                tracing::debug!(counter = header.counter, "decrypted with skipped message key");
                return Ok(plaintext);
            }

            let mut chain = self
                .receiving_chain
                .clone()
                .ok_or(Error::DecryptionFailed)?;
            let staged = self.stage_keys(&mut chain, header.counter)?;
            let mut message_key = chain.next()?;
            let plaintext = open(&message_key, &message.ciphertext, &ad);
            message_key.zeroize();
            let plaintext = plaintext?;

            self.receiving_chain = Some(chain);
            self.commit_skipped(ratchet_key, staged);
            self.pending_pre_key = None;
            return Ok(plaintext);
        }

        // A ratchet key we have not seen: the peer started a new sending chain.
        let old_chain_keys = match &self.receiving_chain {
            Some(old_chain) => {
                let mut old_chain = old_chain.clone();
                self.stage_keys(&mut old_chain, header.previous_counter)?
            }
            None => Vec::new(),
        };

        let (root_key, chain_key) =
            kdf_rk(&self.root_key, self.self_ratchet.dh(&header.ratchet_key))?;
        let mut chain = Chain::new(chain_key);
        let staged = self.stage_keys(&mut chain, header.counter)?;
        let mut message_key = chain.next()?;
        let plaintext = open(&message_key, &message.ciphertext, &ad);
        message_key.zeroize();
        let plaintext = plaintext?;

        let old_peer = std::mem::replace(&mut self.peer_ratchet, header.ratchet_key);
        self.commit_skipped(old_peer.to_bytes(), old_chain_keys);
        self.commit_skipped(ratchet_key, staged);
        self.retire_peer_ratchet(old_peer);
        self.root_key = root_key;
        self.receiving_chain = Some(chain);
        self.pending_ratchet = true;
        self.pending_pre_key = None;
        tracing::debug!(
            session_id = %self.session_id,
            counter = header.counter,
            "receiving ratchet advanced"
        );

        Ok(plaintext)
    }

    /// Starts a new sending chain from a fresh ratchet key pair.
    fn ratchet_sending(&mut self) -> Result<(), Error> {
        let ratchet = X25519Secret::generate()?;
        let (root_key, chain_key) = kdf_rk(&self.root_key, ratchet.dh(&self.peer_ratchet))?;

        self.previous_counter = self.sending_chain.as_ref().map_or(0, |chain| chain.index);
        self.root_key = root_key;
        self.sending_chain = Some(Chain::new(chain_key));
        self.self_ratchet = ratchet;
        self.pending_ratchet = false;
        tracing::debug!(session_id = %self.session_id, "sending ratchet advanced");
        Ok(())
    }

    /// Derives the keys for counters `chain.index..until` without storing them.
    fn stage_keys(&self, chain: &mut Chain, until: u32) -> Result<StagedKeys, Error> {
        let gap = until.saturating_sub(chain.index);
        if gap > self.max_message_gap {
            return Err(Error::Protocol(format!(
                "message gap of {gap} exceeds {}",
                self.max_message_gap
            )));
        }

        let mut staged = Vec::with_capacity(gap as usize);
        while chain.index < until {
            let counter = chain.index;
            staged.push((counter, chain.next()?));
        }
        Ok(staged)
    }

    fn commit_skipped(&mut self, ratchet_key: [u8; 32], staged: StagedKeys) {
        let mut evicted = 0;
        for (counter, key) in staged {
            evicted += self.skipped.insert(ratchet_key, counter, key);
        }
        if evicted > 0 {
            tracing::warn!(
                session_id = %self.session_id,
                evicted,
                capacity = self.skipped.capacity(),
                "skipped message key cache full, dropped oldest keys"
            );
        }
    }

    fn message_ad(&self, header: &MessageHeader) -> Vec<u8> {
        let mut ad = Vec::with_capacity(64 + message::HEADER_LEN);
        ad.extend_from_slice(self.associated_data.as_slice());
        ad.extend_from_slice(&header.to_bytes());
        ad
    }
}

/// Root key ratchet: mixes a DH output into the root key and yields a new chain key.
fn kdf_rk(
    root_key: &[u8; 32],
    mut dh_output: SharedSecret,
) -> Result<(Box<[u8; 32]>, Box<[u8; 32]>), Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_slice()), dh_output.as_bytes());
    dh_output.zeroize();

    let mut okm = [0u8; 64];
    hkdf.expand(ROOT_INFO, &mut okm)
        .map_err(|_| Error::Crypto("HKDF expansion failed for root key".to_string()))?;

    let mut new_root_key = Box::new([0u8; 32]);
    let mut chain_key = Box::new([0u8; 32]);
    new_root_key.copy_from_slice(&okm[0..32]);
    chain_key.copy_from_slice(&okm[32..64]);
    okm.zeroize();

    Ok((new_root_key, chain_key))
}

/// Expands a message key into an AES-256-GCM-SIV key and nonce.
fn message_cipher(message_key: &[u8; 32]) -> Result<(Aes256GcmSiv, [u8; NONCE_SIZE]), Error> {
    let hkdf = Hkdf::<Sha256>::new(None, message_key);

    let mut derived_material = [0u8; 32 + NONCE_SIZE];
    hkdf.expand(MESSAGE_KEYS_INFO, &mut derived_material)
        .map_err(|_| Error::Crypto("HKDF expansion failed for message key".to_string()))?;

    let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(&derived_material[0..32]);
    let cipher = Aes256GcmSiv::new(key);

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&derived_material[32..]);
    derived_material.zeroize();

    Ok((cipher, nonce))
}

fn seal(message_key: &[u8; 32], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher, nonce) = message_cipher(message_key)?;
    cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ad,
            },
        )
        .map_err(|_| Error::Crypto("Message encryption failed".to_string()))
}

fn open(message_key: &[u8; 32], ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher, nonce) = message_cipher(message_key)?;
    Ok(cipher.decrypt(
        Nonce::from_slice(&nonce),
        Payload {
            msg: ciphertext,
            aad: ad,
        },
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::{IdentityKey, PreKeyBundle, SignedPreKey, X3DH};

    fn create_states(config: &ClientConfig) -> (SessionState, SessionState) {
        let alice_identity = IdentityKey::new().unwrap();
        let bob_identity = IdentityKey::new().unwrap();
        let bob_signed_pre_key = SignedPreKey::new(1, &bob_identity).unwrap();
        let bundle = PreKeyBundle {
            registration_id: 2,
            identity_key: bob_identity.public_key(),
            signed_pre_key_id: 1,
            signed_pre_key: bob_signed_pre_key.public_key(),
            signed_pre_key_signature: bob_signed_pre_key.signature(),
            one_time_pre_key: None,
        };

        let x3dh = X3DH::new(&config.protocol_info);
        let initiation = x3dh.initiate(&alice_identity, &bundle).unwrap();
        let base_key = initiation.ephemeral.public_key();
        let bob_keys = x3dh
            .respond(
                &bob_identity,
                &bob_signed_pre_key,
                None,
                &alice_identity.public_key().dh,
                &base_key,
            )
            .unwrap();

        let alice = SessionState::initiator(
            &initiation.keys,
            initiation.ephemeral.clone(),
            alice_identity.public_key(),
            1,
            &bundle,
            config,
        );
        let bob = SessionState::responder(
            &bob_keys,
            bob_signed_pre_key.key_pair(),
            bob_identity.public_key(),
            alice_identity.public_key(),
            1,
            base_key,
            config,
        );
        (alice, bob)
    }

    fn send(from: &mut SessionState, text: &str) -> RatchetMessage {
        from.encrypt(text.as_bytes()).unwrap().ratchet_message().clone()
    }

    #[test]
    fn test_basic_communication() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());
        assert_eq!(alice.session_id(), bob.session_id());

        let first = alice.encrypt(b"Hello, Bob!").unwrap();
        assert!(matches!(first, CiphertextMessage::PreKey(_)));
        assert_eq!(bob.decrypt(first.ratchet_message()).unwrap(), b"Hello, Bob!");

        let reply = bob.encrypt(b"Hello, Alice!").unwrap();
        assert!(matches!(reply, CiphertextMessage::Whisper(_)));
        assert_eq!(alice.decrypt(reply.ratchet_message()).unwrap(), b"Hello, Alice!");

        assert!(!alice.has_pending_pre_key());
        assert!(matches!(
            alice.encrypt(b"again").unwrap(),
            CiphertextMessage::Whisper(_)
        ));
    }

    #[test]
    fn test_key_rotation() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());
        let opening = send(&mut alice, "Hello, Bob!");
        bob.decrypt(&opening).unwrap();
        let alice_initial_public = alice.ratchet_public_key();

        for i in 0..5 {
            let bob_msg = format!("Message from Bob {i}");
            let encrypted = send(&mut bob, &bob_msg);
            assert_eq!(alice.decrypt(&encrypted).unwrap(), bob_msg.as_bytes());

            let alice_msg = format!("Message from Alice {i}");
            let encrypted = send(&mut alice, &alice_msg);
            assert_eq!(bob.decrypt(&encrypted).unwrap(), alice_msg.as_bytes());
        }

        assert_ne!(alice_initial_public, alice.ratchet_public_key());
    }

    #[test]
    fn test_out_of_order_messages() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());
        let messages: Vec<_> = (0..5).map(|i| send(&mut alice, &format!("Message {i}"))).collect();

        for i in [0, 2, 4, 1, 3] {
            let plaintext = bob.decrypt(&messages[i]).unwrap();
            assert_eq!(plaintext, format!("Message {i}").as_bytes());
        }
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn test_late_message_from_previous_chain() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());
        let first = send(&mut alice, "first");
        let late = send(&mut alice, "late");
        bob.decrypt(&first).unwrap();

        let reply = send(&mut bob, "reply");
        alice.decrypt(&reply).unwrap();
        let next = send(&mut alice, "next chain");
        assert_eq!(next.header.previous_counter, 2);

        bob.decrypt(&next).unwrap();
        assert_eq!(bob.decrypt(&late).unwrap(), b"late");
        assert_eq!(bob.decrypt(&late), Err(Error::DuplicateMessage(1)));
    }

    #[test]
    fn test_duplicate_message() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());
        let message = send(&mut alice, "once");
        bob.decrypt(&message).unwrap();
        assert_eq!(bob.decrypt(&message), Err(Error::DuplicateMessage(0)));
    }

    #[test]
    fn test_tampered_message_leaves_state_unchanged() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());
        let first = send(&mut alice, "first");
        let second = send(&mut alice, "second");

        let mut tampered = second.clone();
        if let Some(last) = tampered.ciphertext.last_mut() {
            *last ^= 0x01;
        }
        assert_eq!(bob.decrypt(&tampered), Err(Error::DecryptionFailed));
        assert_eq!(bob.skipped_key_count(), 0);

        assert_eq!(bob.decrypt(&first).unwrap(), b"first");
        assert_eq!(bob.decrypt(&second).unwrap(), b"second");
    }

    #[test]
    fn test_gap_limit() {
        let config = ClientConfig {
            max_message_gap: 3,
            ..ClientConfig::default()
        };
        let (mut alice, mut bob) = create_states(&config);
        let messages: Vec<_> = (0..6).map(|i| send(&mut alice, &format!("{i}"))).collect();

        assert!(matches!(bob.decrypt(&messages[5]), Err(Error::Protocol(_))));
        assert_eq!(bob.decrypt(&messages[3]).unwrap(), b"3");
    }

    #[test]
    fn test_skipped_key_cache_eviction() {
        let config = ClientConfig {
            max_skipped_message_keys: 2,
            ..ClientConfig::default()
        };
        let (mut alice, mut bob) = create_states(&config);
        let messages: Vec<_> = (0..5).map(|i| send(&mut alice, &format!("{i}"))).collect();

        bob.decrypt(&messages[4]).unwrap();
        assert_eq!(bob.skipped_key_count(), 2);

        assert_eq!(bob.decrypt(&messages[0]), Err(Error::DuplicateMessage(0)));
        assert_eq!(bob.decrypt(&messages[3]).unwrap(), b"3");
    }

    #[test]
    fn test_large_and_empty_messages() {
        let (mut alice, mut bob) = create_states(&ClientConfig::default());

        let large_message = vec![b'A'; 100 * 1024];
        let encrypted = alice.encrypt(&large_message).unwrap();
        assert_eq!(bob.decrypt(encrypted.ratchet_message()).unwrap(), large_message);

        let encrypted = alice.encrypt(b"").unwrap();
        assert!(bob.decrypt(encrypted.ratchet_message()).unwrap().is_empty());
    }
}
