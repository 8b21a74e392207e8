use crate::types::{X25519PublicKey, X25519Secret, generate_random_seed};
use crate::Error;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Long-term identity key pair that combines signing and key agreement capabilities.
///
/// An `IdentityKey` contains both an Ed25519 signing key used to sign pre-keys and
/// an X25519 key for Diffie-Hellman key agreement, derived from the same seed.
#[derive(Clone)]
pub struct IdentityKey {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKey {
    /// Creates a new identity key with randomly generated components.
    pub fn new() -> Result<Self, Error> {
        let mut seed = generate_random_seed()?;
        let identity = Self::from_seed(&seed);
        seed.zeroize();
        Ok(identity)
    }

    fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: Box::new(SigningKey::from_bytes(seed)),
            dh_key: X25519Secret::from(*seed),
        }
    }

    /// Signs a message using the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Returns both public halves.
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey {
            dh: self.dh_key.public_key(),
            signing: self.signing_key.verifying_key(),
        }
    }

    /// Performs Diffie-Hellman key agreement with another party's public key.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.dh_key.dh(public_key)
    }

    /// Serializes the identity key to a 64-byte array.
    ///
    /// The first 32 bytes contain the Ed25519 private key,
    /// and the last 32 bytes contain the X25519 private key.
    pub(crate) fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes().as_slice());
        bytes[32..64].copy_from_slice(&self.dh_key.to_bytes());

        bytes
    }

    pub(crate) fn try_from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 64 {
            return Err(Error::Serde(format!(
                "invalid identity key length {}",
                bytes.len()
            )));
        }

        let mut signing_bytes = [0u8; 32];
        signing_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&signing_bytes));
        signing_bytes.zeroize();

        Ok(Self {
            signing_key,
            dh_key: X25519Secret::try_from_slice(&bytes[32..64])?,
        })
    }
}

impl Zeroize for IdentityKey {
    fn zeroize(&mut self) {
        self.dh_key.zeroize();
    }
}

impl ZeroizeOnDrop for IdentityKey {}

/// Public identity: the agreement key and the key that verifies pre-key signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityPublicKey {
    pub dh: X25519PublicKey,
    pub signing: VerifyingKey,
}

impl IdentityPublicKey {
    /// `dh ‖ signing`, 64 bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.dh.as_bytes());
        bytes[32..64].copy_from_slice(self.signing.as_bytes());
        bytes
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 64 {
            return Err(Error::Serde(format!(
                "invalid identity public key length {}",
                bytes.len()
            )));
        }
        let mut signing = [0u8; 32];
        signing.copy_from_slice(&bytes[32..64]);

        Ok(Self {
            dh: X25519PublicKey::try_from_slice(&bytes[0..32])?,
            signing: VerifyingKey::from_bytes(&signing)
                .map_err(|err| Error::Serde(err.to_string()))?,
        })
    }

    /// Checks an Ed25519 signature made by this identity.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        self.signing
            .verify_strict(message, signature)
            .map_err(|_| Error::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_and_verification() {
        let identity_key = IdentityKey::new().unwrap();
        let message = b"This is a test message";

        let signature = identity_key.sign(message);
        let public = identity_key.public_key();
        assert!(public.verify(message, &signature).is_ok());
        assert_eq!(
            public.verify(b"This is a modified message", &signature),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_serialization_deserialization() {
        let original_key = IdentityKey::new().unwrap();
        let restored = IdentityKey::try_from_slice(&original_key.to_bytes()).unwrap();
        assert_eq!(original_key.public_key(), restored.public_key());

        assert!(IdentityKey::try_from_slice(&[0u8; 63]).is_err());
    }

    #[test]
    fn test_public_key_bytes() {
        let public = IdentityKey::new().unwrap().public_key();
        let parsed = IdentityPublicKey::try_from_slice(&public.to_bytes()).unwrap();
        assert_eq!(parsed, public);
    }
}
