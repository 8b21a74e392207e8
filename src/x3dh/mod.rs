mod identity_key;
pub use identity_key::*;
mod pre_key;
pub use pre_key::*;
mod signed_pre_key;
pub use signed_pre_key::*;

use crate::Error;
use crate::types::{X25519PublicKey, X25519Secret};
use ed25519_dalek::Signature;
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SALT: &[u8] = b"Nodewire-X3DH";

/// Root and first chain key agreed by both sides of a handshake.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct AgreedKeys {
    pub(crate) root_key: Box<[u8; 32]>,
    pub(crate) chain_key: Box<[u8; 32]>,
}

/// The initiator's result: agreed keys plus the ephemeral key pair whose public
/// half (the base key) has to reach the responder.
pub(crate) struct X3DHInitiation {
    pub(crate) keys: AgreedKeys,
    pub(crate) ephemeral: X25519Secret,
}

/// Public key material a peer publishes so others can open a session without a round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub identity_key: IdentityPublicKey,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: X25519PublicKey,
    pub signed_pre_key_signature: Signature,
    pub one_time_pre_key: Option<(u32, X25519PublicKey)>,
}

impl PreKeyBundle {
    /// Verifies that the signed pre-key was signed by the bundle's identity.
    pub fn verify(&self) -> Result<(), Error> {
        self.identity_key.verify(
            self.signed_pre_key.as_bytes(),
            &self.signed_pre_key_signature,
        )
    }
}

/// Extended triple Diffie-Hellman agreement.
///
/// Both roles concatenate `DH(IKa, SPKb) ‖ DH(EKa, IKb) ‖ DH(EKa, SPKb)` and, when a
/// one-time pre-key is used, `‖ DH(EKa, OPKb)`, then expand the result with HKDF.
pub struct X3DH {
    info: Vec<u8>,
}

impl X3DH {
    /// Creates an agreement context. `info` separates derivations of different protocols.
    pub fn new(info: &[u8]) -> Self {
        Self {
            info: info.to_vec(),
        }
    }

    /// Initiator side: verifies the bundle, generates the ephemeral key and derives the keys.
    pub(crate) fn initiate(
        &self,
        identity: &IdentityKey,
        bundle: &PreKeyBundle,
    ) -> Result<X3DHInitiation, Error> {
        bundle.verify()?;

        let ephemeral = X25519Secret::generate()?;

        // DH1 = DH(IKa, SPKb)
        let dh1 = identity.dh(&bundle.signed_pre_key);
        // DH2 = DH(EKa, IKb)
        let dh2 = ephemeral.dh(&bundle.identity_key.dh);
        // DH3 = DH(EKa, SPKb)
        let dh3 = ephemeral.dh(&bundle.signed_pre_key);
        // DH4 = DH(EKa, OPKb)
        let dh4 = bundle
            .one_time_pre_key
            .map(|(_, one_time)| ephemeral.dh(&one_time));

        let keys = self.derive(dh1, dh2, dh3, dh4)?;
        Ok(X3DHInitiation { keys, ephemeral })
    }

    /// Responder side: mirrors the initiator's agreements with the private halves.
    pub(crate) fn respond(
        &self,
        identity: &IdentityKey,
        signed_pre_key: &SignedPreKey,
        one_time_pre_key: Option<&PreKey>,
        initiator_identity: &X25519PublicKey,
        base_key: &X25519PublicKey,
    ) -> Result<AgreedKeys, Error> {
        // DH1 = DH(SPKb, IKa)
        let dh1 = signed_pre_key.dh(initiator_identity);
        // DH2 = DH(IKb, EKa)
        let dh2 = identity.dh(base_key);
        // DH3 = DH(SPKb, EKa)
        let dh3 = signed_pre_key.dh(base_key);
        // DH4 = DH(OPKb, EKa)
        let dh4 = one_time_pre_key.map(|one_time| one_time.dh(base_key));

        self.derive(dh1, dh2, dh3, dh4)
    }

    fn derive(
        &self,
        dh1: SharedSecret,
        dh2: SharedSecret,
        dh3: SharedSecret,
        dh4: Option<SharedSecret>,
    ) -> Result<AgreedKeys, Error> {
        let mut key_material = Vec::with_capacity(128);
        key_material.extend_from_slice(dh1.as_bytes());
        key_material.extend_from_slice(dh2.as_bytes());
        key_material.extend_from_slice(dh3.as_bytes());
        if let Some(dh4) = dh4 {
            key_material.extend_from_slice(dh4.as_bytes());
        }

        let hkdf = Hkdf::<Sha256>::new(Some(SALT), &key_material);
        key_material.zeroize();

        let mut okm = [0u8; 64];
        hkdf.expand(&self.info, &mut okm)
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        root_key.copy_from_slice(&okm[0..32]);
        chain_key.copy_from_slice(&okm[32..64]);
        okm.zeroize();

        Ok(AgreedKeys {
            root_key,
            chain_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_for(
        identity: &IdentityKey,
        signed_pre_key: &SignedPreKey,
        one_time: Option<&PreKey>,
    ) -> PreKeyBundle {
        PreKeyBundle {
            registration_id: 42,
            identity_key: identity.public_key(),
            signed_pre_key_id: signed_pre_key.id(),
            signed_pre_key: signed_pre_key.public_key(),
            signed_pre_key_signature: signed_pre_key.signature(),
            one_time_pre_key: one_time.map(|key| (key.id(), key.public_key())),
        }
    }

    #[test]
    fn test_x3dh_key_agreement() {
        let alice_identity = IdentityKey::new().unwrap();
        let bob_identity = IdentityKey::new().unwrap();
        let bob_signed_pre_key = SignedPreKey::new(1, &bob_identity).unwrap();
        let bob_one_time_pre_key = PreKey::new(1).unwrap();
        let bob_bundle = bundle_for(&bob_identity, &bob_signed_pre_key, Some(&bob_one_time_pre_key));

        let x3dh = X3DH::new(b"Test-Protocol-Info");
        let alice = x3dh.initiate(&alice_identity, &bob_bundle).unwrap();

        let bob = x3dh
            .respond(
                &bob_identity,
                &bob_signed_pre_key,
                Some(&bob_one_time_pre_key),
                &alice_identity.public_key().dh,
                &alice.ephemeral.public_key(),
            )
            .unwrap();

        assert_eq!(alice.keys.root_key, bob.root_key);
        assert_eq!(alice.keys.chain_key, bob.chain_key);
        assert_ne!(alice.keys.root_key, alice.keys.chain_key);
    }

    #[test]
    fn test_x3dh_agreement_without_one_time_key() {
        let alice_identity = IdentityKey::new().unwrap();
        let bob_identity = IdentityKey::new().unwrap();
        let bob_signed_pre_key = SignedPreKey::new(1, &bob_identity).unwrap();
        let bob_bundle = bundle_for(&bob_identity, &bob_signed_pre_key, None);

        let x3dh = X3DH::new(b"Test-Protocol-Info");
        let alice = x3dh.initiate(&alice_identity, &bob_bundle).unwrap();
        let bob = x3dh
            .respond(
                &bob_identity,
                &bob_signed_pre_key,
                None,
                &alice_identity.public_key().dh,
                &alice.ephemeral.public_key(),
            )
            .unwrap();

        assert_eq!(alice.keys.root_key, bob.root_key);
    }

    #[test]
    fn test_different_info_gives_different_keys() {
        let alice_identity = IdentityKey::new().unwrap();
        let bob_identity = IdentityKey::new().unwrap();
        let bob_signed_pre_key = SignedPreKey::new(1, &bob_identity).unwrap();
        let bundle = bundle_for(&bob_identity, &bob_signed_pre_key, None);

        let first = X3DH::new(b"Protocol-Info-1")
            .initiate(&alice_identity, &bundle)
            .unwrap();
        let responder = X3DH::new(b"Protocol-Info-2")
            .respond(
                &bob_identity,
                &bob_signed_pre_key,
                None,
                &alice_identity.public_key().dh,
                &first.ephemeral.public_key(),
            )
            .unwrap();

        assert_ne!(first.keys.root_key, responder.root_key);
    }

    #[test]
    fn test_tampered_bundle_is_rejected() {
        let alice_identity = IdentityKey::new().unwrap();
        let bob_identity = IdentityKey::new().unwrap();
        let another_identity = IdentityKey::new().unwrap();
        let bob_signed_pre_key = SignedPreKey::new(1, &bob_identity).unwrap();

        let mut bundle = bundle_for(&bob_identity, &bob_signed_pre_key, None);
        bundle.identity_key.signing = another_identity.public_key().signing;

        let result = X3DH::new(b"info").initiate(&alice_identity, &bundle);
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }
}
