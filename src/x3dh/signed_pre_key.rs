use crate::types::{X25519PublicKey, X25519Secret};
use crate::{Error, IdentityKey, IdentityPublicKey};
use ed25519_dalek::Signature;
use std::time::{SystemTime, UNIX_EPOCH};
use x25519_dalek::SharedSecret;

/// A medium-term pre-key signed with the identity key.
///
/// Rotated periodically. The signature covers the 32-byte public key so that a
/// peer fetching the bundle can tell the key belongs to the identity.
#[derive(Clone)]
pub struct SignedPreKey {
    id: u32,
    pre_key: X25519Secret,
    signature: Signature,
    created_at: u64,
}

impl SignedPreKey {
    /// Creates and signs a new signed pre-key with the given ID.
    pub fn new(id: u32, identity: &IdentityKey) -> Result<Self, Error> {
        Self::new_at(id, identity, SystemTime::now())
    }

    pub(crate) fn new_at(id: u32, identity: &IdentityKey, now: SystemTime) -> Result<Self, Error> {
        let pre_key = X25519Secret::generate()?;
        let signature = identity.sign(pre_key.public_key().as_bytes());
        let created_at = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self {
            id,
            pre_key,
            signature,
            created_at,
        })
    }

    pub(crate) fn from_parts(
        id: u32,
        pre_key: X25519Secret,
        signature: Signature,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            pre_key,
            signature,
            created_at,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.pre_key.public_key()
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Creation time in seconds since the unix epoch.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Verifies the stored signature against an identity.
    pub fn verify(&self, identity: &IdentityPublicKey) -> Result<(), Error> {
        identity.verify(self.public_key().as_bytes(), &self.signature)
    }

    pub(crate) fn key_pair(&self) -> X25519Secret {
        self.pre_key.clone()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.pre_key.dh(public_key)
    }
}
