/// Errors returned by the codec, key store, handshake and cipher layers.
///
/// Every error is returned per call. None of them leave shared state
/// half-updated, so a caller can drop the offending frame and keep going.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// A frame could not be decoded, or a node could not be encoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A dictionary token referenced an index with no entry.
    #[error("Unknown dictionary code: {0:#06x}")]
    UnknownDictionaryCode(u16),

    /// A signed pre-key signature did not verify.
    #[error("Invalid signed pre-key signature")]
    InvalidSignature,

    /// The peer presented an identity key different from the trusted one.
    #[error("Untrusted identity for {0}")]
    UntrustedIdentity(String),

    /// The referenced pre-key does not exist or was already consumed.
    #[error("Pre-key {0} not found")]
    PreKeyNotFound(u32),

    /// The message key for this counter was already used.
    #[error("Duplicate message with counter {0}")]
    DuplicateMessage(u32),

    /// Authentication of a ciphertext failed.
    #[error("Message decryption failed")]
    DecryptionFailed,

    /// No session exists for the address.
    #[error("No session for {0}")]
    SessionNotFound(String),

    /// The bundle collaborator could not provide keys for the peer.
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    /// The caller supplied deadline expired.
    #[error("Operation timed out")]
    Timeout,

    /// A cryptographic primitive failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A protocol rule was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// Identity key operation failed.
    #[error("Identity key error: {0}")]
    Identity(String),

    /// Pre-key operation failed.
    #[error("Pre-key error: {0}")]
    PreKey(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),

    /// The persisted key store could not be loaded.
    #[error("Corrupt key store: {0}")]
    CorruptKeyStore(String),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(_: aes_gcm_siv::Error) -> Self {
        Self::DecryptionFailed
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
