use crate::keystore::KeyStore;
use crate::ratchet::{PreKeyMessage, SessionState};
use crate::types::X25519PublicKey;
use crate::{Error, PreKey, PreKeyBundle, X3DH};

/// Turns handshake material into a fresh [`SessionState`].
///
/// Neither function touches an existing session. Trust decisions and committing
/// the new state are left to the caller.
pub struct SessionBuilder;

impl SessionBuilder {
    /// Initiator side. Verifies the bundle and returns the new state together
    /// with the base key the peer will see in our pre-key messages.
    pub fn from_pre_key_bundle(
        bundle: &PreKeyBundle,
        key_store: &KeyStore,
    ) -> Result<(SessionState, X25519PublicKey), Error> {
        let identity = key_store.identity()?;
        let config = key_store.config();

        let initiation = X3DH::new(&config.protocol_info).initiate(identity, bundle)?;
        let state = SessionState::initiator(
            &initiation.keys,
            initiation.ephemeral.clone(),
            identity.public_key(),
            key_store.registration_id()?,
            bundle,
            config,
        );

        tracing::debug!(
            session_id = %state.session_id(),
            signed_pre_key_id = bundle.signed_pre_key_id,
            one_time_pre_key = bundle.one_time_pre_key.is_some(),
            "built session from pre-key bundle"
        );
        let base_key = *state.base_key();
        Ok((state, base_key))
    }

    /// Responder side. Consumes the referenced one-time pre-key and returns it so
    /// the caller can put it back with [`KeyStore`] if the handshake is abandoned.
    pub fn from_pre_key_message(
        message: &PreKeyMessage,
        key_store: &mut KeyStore,
    ) -> Result<(SessionState, Option<PreKey>), Error> {
        let identity = key_store.identity()?.public_key();
        let signed_pre_key = key_store
            .signed_pre_key(message.signed_pre_key_id)
            .ok_or(Error::PreKeyNotFound(message.signed_pre_key_id))?
            .clone();
        signed_pre_key.verify(&identity)?;

        let one_time_pre_key = message
            .pre_key_id
            .map(|id| key_store.consume_pre_key(id))
            .transpose()?;

        let keys = X3DH::new(&key_store.config().protocol_info).respond(
            key_store.identity()?,
            &signed_pre_key,
            one_time_pre_key.as_ref(),
            &message.identity_key.dh,
            &message.base_key,
        );
        let keys = match keys {
            Ok(keys) => keys,
            Err(err) => {
                if let Some(pre_key) = one_time_pre_key {
                    key_store.restore_pre_key(pre_key);
                }
                return Err(err);
            }
        };

        let state = SessionState::responder(
            &keys,
            signed_pre_key.key_pair(),
            identity,
            message.identity_key,
            message.registration_id,
            message.base_key,
            key_store.config(),
        );

        tracing::debug!(
            session_id = %state.session_id(),
            signed_pre_key_id = message.signed_pre_key_id,
            pre_key_id = ?message.pre_key_id,
            "built session from pre-key message"
        );
        Ok((state, one_time_pre_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::ratchet::CiphertextMessage;
    use std::time::{Duration, SystemTime};

    fn store() -> KeyStore {
        let mut store = KeyStore::new(ClientConfig::default());
        store.generate_identity().unwrap();
        store.generate_pre_keys(3, 1).unwrap();
        store
    }

    fn opening(state: &mut SessionState) -> PreKeyMessage {
        match state.encrypt(b"hello").unwrap() {
            CiphertextMessage::PreKey(message) => message,
            CiphertextMessage::Whisper(_) => panic!("expected pre-key message"),
        }
    }

    #[test]
    fn test_both_sides_agree() {
        let alice = store();
        let mut bob = store();
        let bundle = bob.pre_key_bundle().unwrap();

        let (mut alice_state, base_key) = SessionBuilder::from_pre_key_bundle(&bundle, &alice).unwrap();
        let message = opening(&mut alice_state);
        assert_eq!(message.base_key, base_key);
        assert_eq!(message.pre_key_id, Some(1));

        let (mut bob_state, consumed) = SessionBuilder::from_pre_key_message(&message, &mut bob).unwrap();
        assert_eq!(consumed.map(|key| key.id()), Some(1));
        assert_eq!(bob.pre_key_count(), 2);
        assert_eq!(bob_state.session_id(), alice_state.session_id());
        assert_eq!(bob_state.decrypt(&message.message).unwrap(), b"hello");
    }

    #[test]
    fn test_one_time_pre_key_is_single_use() {
        let alice = store();
        let mut bob = store();
        let bundle = bob.pre_key_bundle().unwrap();

        let (mut alice_state, _) = SessionBuilder::from_pre_key_bundle(&bundle, &alice).unwrap();
        let message = opening(&mut alice_state);
        SessionBuilder::from_pre_key_message(&message, &mut bob).unwrap();

        assert!(matches!(
            SessionBuilder::from_pre_key_message(&message, &mut bob),
            Err(Error::PreKeyNotFound(1))
        ));
    }

    #[test]
    fn test_unknown_signed_pre_key() {
        let alice = store();
        let mut bob = store();
        let bundle = bob.pre_key_bundle().unwrap();

        let (mut alice_state, _) = SessionBuilder::from_pre_key_bundle(&bundle, &alice).unwrap();
        let mut message = opening(&mut alice_state);
        message.signed_pre_key_id = 99;

        assert!(matches!(
            SessionBuilder::from_pre_key_message(&message, &mut bob),
            Err(Error::PreKeyNotFound(99))
        ));
        assert_eq!(bob.pre_key_count(), 3);
    }

    #[test]
    fn test_grace_window_signed_pre_key_still_accepted() {
        let alice = store();
        let mut bob = store();
        let bundle = bob.pre_key_bundle().unwrap();
        let (mut alice_state, _) = SessionBuilder::from_pre_key_bundle(&bundle, &alice).unwrap();
        let message = opening(&mut alice_state);

        let now = SystemTime::now();
        bob.rotate_signed_pre_key_at(now).unwrap();
        assert!(SessionBuilder::from_pre_key_message(&message, &mut bob).is_ok());

        let grace = bob.config().signed_pre_key_grace_period;
        bob.rotate_signed_pre_key_at(now + grace + Duration::from_secs(1))
            .unwrap();
        let (mut late_state, _) = SessionBuilder::from_pre_key_bundle(&bundle, &alice).unwrap();
        let mut late = opening(&mut late_state);
        late.pre_key_id = None;
        assert!(matches!(
            SessionBuilder::from_pre_key_message(&late, &mut bob),
            Err(Error::PreKeyNotFound(_))
        ));
    }

    #[test]
    fn test_signed_pre_key_past_grace_rejected() {
        let alice = store();
        let mut bob = store();
        let bundle = bob.pre_key_bundle().unwrap();
        let (mut alice_state, _) = SessionBuilder::from_pre_key_bundle(&bundle, &alice).unwrap();
        let message = opening(&mut alice_state);

        let month_ago = SystemTime::now() - Duration::from_secs(30 * 24 * 60 * 60);
        bob.rotate_signed_pre_key_at(month_ago).unwrap();

        assert!(matches!(
            SessionBuilder::from_pre_key_message(&message, &mut bob),
            Err(Error::PreKeyNotFound(id)) if id == bundle.signed_pre_key_id
        ));
        assert_eq!(bob.pre_key_count(), 3);
    }

    #[test]
    fn test_forged_bundle_rejected() {
        let alice = store();
        let bob = store();
        let mallory = store();

        let mut bundle = bob.pre_key_bundle().unwrap();
        bundle.signed_pre_key = mallory.pre_key_bundle().unwrap().signed_pre_key;

        assert!(matches!(
            SessionBuilder::from_pre_key_bundle(&bundle, &alice),
            Err(Error::InvalidSignature)
        ));
    }
}
