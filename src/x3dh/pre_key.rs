use crate::Error;
use crate::types::{X25519PublicKey, X25519Secret};
use x25519_dalek::SharedSecret;

/// A one-time pre-key. Each key completes at most one inbound handshake.
#[derive(Clone)]
pub struct PreKey {
    id: u32,
    pre_key: X25519Secret,
}

impl PreKey {
    /// Creates a new one-time pre-key with the given ID.
    pub fn new(id: u32) -> Result<Self, Error> {
        Ok(Self {
            id,
            pre_key: X25519Secret::generate()?,
        })
    }

    pub(crate) fn from_parts(id: u32, pre_key: X25519Secret) -> Self {
        Self { id, pre_key }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.pre_key.public_key()
    }

    pub(crate) fn secret_bytes(&self) -> [u8; 32] {
        self.pre_key.to_bytes()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.pre_key.dh(public_key)
    }
}
