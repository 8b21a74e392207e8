use crate::proto::PreKeyMessageProto;
use crate::types::X25519PublicKey;
use crate::{Error, IdentityPublicKey};
use prost::Message;

/// Version byte leading every serialized cipher message.
pub const MESSAGE_VERSION: u8 = 0x03;

pub(crate) const HEADER_LEN: usize = 40;
const TAG_LEN: usize = 16;

/// Plaintext header of a ratchet message. Authenticated as associated data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Sender's current ratchet public key.
    pub ratchet_key: X25519PublicKey,
    /// Length of the sender's previous sending chain.
    pub previous_counter: u32,
    /// Position of this message in the sending chain.
    pub counter: u32,
}

impl MessageHeader {
    pub(crate) fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..32].copy_from_slice(self.ratchet_key.as_bytes());
        bytes[32..36].copy_from_slice(&self.previous_counter.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.counter.to_be_bytes());
        bytes
    }
}

impl From<[u8; HEADER_LEN]> for MessageHeader {
    fn from(bytes: [u8; HEADER_LEN]) -> Self {
        let mut ratchet_key = [0u8; 32];
        ratchet_key.copy_from_slice(&bytes[0..32]);

        Self {
            ratchet_key: X25519PublicKey::from(ratchet_key),
            previous_counter: u32::from_be_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]),
            counter: u32::from_be_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]),
        }
    }
}

/// A message encrypted under an established session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatchetMessage {
    pub header: MessageHeader,
    /// AEAD output, tag included.
    pub ciphertext: Vec<u8>,
}

impl RatchetMessage {
    /// Serializes the message for transmission.
    ///
    /// Format: [version (1 byte)][header (40 bytes)][ciphertext]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(1 + HEADER_LEN + self.ciphertext.len());
        result.push(MESSAGE_VERSION);
        result.extend_from_slice(&self.header.to_bytes());
        result.extend_from_slice(&self.ciphertext);
        result
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let Some((&version, rest)) = bytes.split_first() else {
            return Err(Error::MalformedFrame("empty cipher message".to_string()));
        };
        if version != MESSAGE_VERSION {
            return Err(Error::MalformedFrame(format!(
                "unsupported cipher message version {version:#04x}"
            )));
        }
        if rest.len() < HEADER_LEN + TAG_LEN {
            return Err(Error::MalformedFrame(format!(
                "cipher message too short: {} bytes",
                bytes.len()
            )));
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&rest[..HEADER_LEN]);

        Ok(Self {
            header: MessageHeader::from(header),
            ciphertext: rest[HEADER_LEN..].to_vec(),
        })
    }
}

/// The first messages of an initiator: handshake parameters plus the wrapped ratchet message.
///
/// Sent until the initiator receives a reply, so the responder can build its
/// session from whichever copy arrives first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: X25519PublicKey,
    pub identity_key: IdentityPublicKey,
    pub message: RatchetMessage,
}

impl PreKeyMessage {
    /// Format: [version (1 byte)][protobuf body]
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let proto = PreKeyMessageProto {
            registration_id: self.registration_id,
            pre_key_id: self.pre_key_id,
            signed_pre_key_id: self.signed_pre_key_id,
            base_key: self.base_key.to_bytes().to_vec(),
            identity_key: self.identity_key.to_bytes().to_vec(),
            message: self.message.to_bytes(),
        };

        let mut buf = Vec::with_capacity(1 + proto.encoded_len());
        buf.push(MESSAGE_VERSION);
        proto
            .encode(&mut buf)
            .map_err(|err| Error::Serde(format!("Failed to encode pre-key message: {err:?}")))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let Some((&version, body)) = bytes.split_first() else {
            return Err(Error::MalformedFrame("empty pre-key message".to_string()));
        };
        if version != MESSAGE_VERSION {
            return Err(Error::MalformedFrame(format!(
                "unsupported pre-key message version {version:#04x}"
            )));
        }

        let proto = PreKeyMessageProto::decode(body)
            .map_err(|err| Error::MalformedFrame(format!("Failed to decode pre-key message: {err}")))?;

        let base_key = X25519PublicKey::try_from_slice(&proto.base_key)
            .map_err(|err| Error::MalformedFrame(err.to_string()))?;
        let identity_key = IdentityPublicKey::try_from_slice(&proto.identity_key)
            .map_err(|err| Error::MalformedFrame(err.to_string()))?;

        Ok(Self {
            registration_id: proto.registration_id,
            pre_key_id: proto.pre_key_id,
            signed_pre_key_id: proto.signed_pre_key_id,
            base_key,
            identity_key,
            message: RatchetMessage::from_bytes(&proto.message)?,
        })
    }
}

/// Output of a session encrypt. Which variant is produced depends on whether
/// the peer has confirmed the session yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CiphertextMessage {
    PreKey(PreKeyMessage),
    Whisper(RatchetMessage),
}

impl CiphertextMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        match self {
            CiphertextMessage::PreKey(message) => message.to_bytes(),
            CiphertextMessage::Whisper(message) => Ok(message.to_bytes()),
        }
    }

    pub fn ratchet_message(&self) -> &RatchetMessage {
        match self {
            CiphertextMessage::PreKey(message) => &message.message,
            CiphertextMessage::Whisper(message) => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityKey;

    fn sample_message() -> RatchetMessage {
        RatchetMessage {
            header: MessageHeader {
                ratchet_key: X25519PublicKey::from([5u8; 32]),
                previous_counter: 3,
                counter: 0x0102_0304,
            },
            ciphertext: vec![0xAB; 24],
        }
    }

    #[test]
    fn test_ratchet_message_layout() {
        let bytes = sample_message().to_bytes();
        assert_eq!(bytes[0], MESSAGE_VERSION);
        assert_eq!(bytes[33..37], [0, 0, 0, 3]);
        assert_eq!(bytes[37..41], [1, 2, 3, 4]);
        assert_eq!(RatchetMessage::from_bytes(&bytes).unwrap(), sample_message());
    }

    #[test]
    fn test_short_or_unversioned_message_is_malformed() {
        let bytes = sample_message().to_bytes();
        assert!(matches!(
            RatchetMessage::from_bytes(&bytes[..HEADER_LEN]),
            Err(Error::MalformedFrame(_))
        ));

        let mut wrong_version = bytes.clone();
        wrong_version[0] = 0x02;
        assert!(matches!(
            RatchetMessage::from_bytes(&wrong_version),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_pre_key_message_bytes() {
        let identity = IdentityKey::new().unwrap();
        let message = PreKeyMessage {
            registration_id: 1234,
            pre_key_id: None,
            signed_pre_key_id: 7,
            base_key: X25519PublicKey::from([9u8; 32]),
            identity_key: identity.public_key(),
            message: sample_message(),
        };

        let bytes = message.to_bytes().unwrap();
        assert_eq!(PreKeyMessage::from_bytes(&bytes).unwrap(), message);
        assert!(matches!(
            PreKeyMessage::from_bytes(&bytes[1..]),
            Err(Error::MalformedFrame(_))
        ));
    }
}
