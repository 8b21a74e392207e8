//! Protocol Buffers records for the handshake message, the persisted key store
//! and the synced application state.

use crate::config::ClientConfig;
use crate::keystore::{KeyStore, RetiredSignedPreKey};
use crate::types::X25519Secret;
use crate::{Error, IdentityKey, PreKey, SignedPreKey};
use ed25519_dalek::Signature;
use prost::Message;
use std::collections::BTreeMap;
use std::time::Duration;

/// Schema version written by [`KeyStore::serialize`].
pub const KEY_STORE_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Message)]
pub struct PreKeyMessageProto {
    #[prost(uint32, tag = "1")]
    pub registration_id: u32,
    #[prost(uint32, optional, tag = "2")]
    pub pre_key_id: Option<u32>,
    #[prost(uint32, tag = "3")]
    pub signed_pre_key_id: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub base_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub message: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientConfigProto {
    #[prost(uint32, tag = "1")]
    pub max_skipped_message_keys: u32,
    #[prost(uint32, tag = "2")]
    pub max_message_gap: u32,
    #[prost(uint64, tag = "3")]
    pub max_archived_states: u64,
    #[prost(uint64, tag = "4")]
    pub archived_state_max_age_secs: u64,
    #[prost(uint64, tag = "5")]
    pub signed_pre_key_rotation_interval_secs: u64,
    #[prost(uint64, tag = "6")]
    pub signed_pre_key_grace_period_secs: u64,
    #[prost(uint64, tag = "7")]
    pub min_pre_keys: u64,
    #[prost(uint64, tag = "8")]
    pub max_pre_keys: u64,
    #[prost(bytes = "vec", tag = "9")]
    pub protocol_info: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignedPreKeyProto {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub private_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub signature: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub created_at: u64,
    /// Zero for the current key, otherwise when it was replaced.
    #[prost(uint64, tag = "5")]
    pub retired_at: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct PreKeyProto {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub private_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct KeyStoreProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub identity: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub registration_id: u32,
    #[prost(message, optional, tag = "4")]
    pub config: Option<ClientConfigProto>,
    #[prost(message, optional, tag = "5")]
    pub signed_pre_key: Option<SignedPreKeyProto>,
    /// Sorted by id.
    #[prost(message, repeated, tag = "6")]
    pub retired_signed_pre_keys: Vec<SignedPreKeyProto>,
    /// Sorted by id.
    #[prost(message, repeated, tag = "7")]
    pub pre_keys: Vec<PreKeyProto>,
    #[prost(uint32, tag = "8")]
    pub next_pre_key_id: u32,
    #[prost(uint32, tag = "9")]
    pub next_signed_pre_key_id: u32,
}

/// An app-state mutation as synced between devices.
#[derive(Clone, PartialEq, Message)]
pub struct SyncActionData {
    #[prost(bytes = "vec", tag = "1")]
    pub index: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub padding: Vec<u8>,
    #[prost(int32, tag = "4")]
    pub version: i32,
}

impl From<&ClientConfig> for ClientConfigProto {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_skipped_message_keys: config.max_skipped_message_keys,
            max_message_gap: config.max_message_gap,
            max_archived_states: config.max_archived_states as u64,
            archived_state_max_age_secs: config.archived_state_max_age.as_secs(),
            signed_pre_key_rotation_interval_secs: config.signed_pre_key_rotation_interval.as_secs(),
            signed_pre_key_grace_period_secs: config.signed_pre_key_grace_period.as_secs(),
            min_pre_keys: config.min_pre_keys as u64,
            max_pre_keys: config.max_pre_keys as u64,
            protocol_info: config.protocol_info.clone(),
        }
    }
}

impl TryFrom<ClientConfigProto> for ClientConfig {
    type Error = Error;

    fn try_from(proto: ClientConfigProto) -> Result<Self, Error> {
        let size = |value: u64| {
            usize::try_from(value)
                .map_err(|_| Error::CorruptKeyStore(format!("config value {value} out of range")))
        };

        Ok(Self {
            max_skipped_message_keys: proto.max_skipped_message_keys,
            max_message_gap: proto.max_message_gap,
            max_archived_states: size(proto.max_archived_states)?,
            archived_state_max_age: Duration::from_secs(proto.archived_state_max_age_secs),
            signed_pre_key_rotation_interval: Duration::from_secs(
                proto.signed_pre_key_rotation_interval_secs,
            ),
            signed_pre_key_grace_period: Duration::from_secs(proto.signed_pre_key_grace_period_secs),
            min_pre_keys: size(proto.min_pre_keys)?,
            max_pre_keys: size(proto.max_pre_keys)?,
            protocol_info: proto.protocol_info,
        })
    }
}

fn signed_pre_key_to_proto(key: &SignedPreKey, retired_at: u64) -> SignedPreKeyProto {
    SignedPreKeyProto {
        id: key.id(),
        private_key: key.key_pair().to_bytes().to_vec(),
        signature: key.signature().to_bytes().to_vec(),
        created_at: key.created_at(),
        retired_at,
    }
}

fn signed_pre_key_from_proto(proto: &SignedPreKeyProto) -> Result<SignedPreKey, Error> {
    let private_key = X25519Secret::try_from_slice(&proto.private_key)
        .map_err(|err| Error::CorruptKeyStore(err.to_string()))?;
    let signature = Signature::from_slice(&proto.signature)
        .map_err(|_| Error::CorruptKeyStore(format!("bad signature on signed pre-key {}", proto.id)))?;

    Ok(SignedPreKey::from_parts(
        proto.id,
        private_key,
        signature,
        proto.created_at,
    ))
}

impl KeyStore {
    /// Serializes the store to its versioned Protocol Buffers record.
    ///
    /// Key lists are written in id order, so equal stores produce equal bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let identity = match &self.identity {
            Some(identity) => identity.to_bytes().to_vec(),
            None => Vec::new(),
        };

        let record = KeyStoreProto {
            version: KEY_STORE_VERSION,
            identity,
            registration_id: self.registration_id,
            config: Some(ClientConfigProto::from(&self.config)),
            signed_pre_key: self
                .signed_pre_key
                .as_ref()
                .map(|key| signed_pre_key_to_proto(key, 0)),
            retired_signed_pre_keys: self
                .retired_signed_pre_keys
                .values()
                .map(|retired| signed_pre_key_to_proto(&retired.key, retired.retired_at))
                .collect(),
            pre_keys: self
                .pre_keys
                .values()
                .map(|key| PreKeyProto {
                    id: key.id(),
                    private_key: key.secret_bytes().to_vec(),
                })
                .collect(),
            next_pre_key_id: self.next_pre_key_id,
            next_signed_pre_key_id: self.next_signed_pre_key_id,
        };

        let mut buf = Vec::with_capacity(record.encoded_len());
        record
            .encode(&mut buf)
            .map_err(|err| Error::Serde(format!("Failed to encode key store: {err:?}")))?;
        Ok(buf)
    }

    /// Restores a store from [`KeyStore::serialize`] output.
    ///
    /// Anything that does not decode or fails validation is reported as
    /// [`Error::CorruptKeyStore`]. Keys are never regenerated here.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let record = KeyStoreProto::decode(bytes)
            .map_err(|err| Error::CorruptKeyStore(format!("Failed to decode key store: {err}")))?;

        if record.version != KEY_STORE_VERSION {
            return Err(Error::CorruptKeyStore(format!(
                "Unsupported schema version: {}",
                record.version
            )));
        }

        let config = record
            .config
            .ok_or_else(|| Error::CorruptKeyStore("Missing client config".to_string()))?
            .try_into()?;

        let identity = if record.identity.is_empty() {
            None
        } else {
            Some(
                IdentityKey::try_from_slice(&record.identity)
                    .map_err(|err| Error::CorruptKeyStore(err.to_string()))?,
            )
        };

        let signed_pre_key = record
            .signed_pre_key
            .as_ref()
            .map(signed_pre_key_from_proto)
            .transpose()?;

        if let (Some(identity), Some(signed_pre_key)) = (&identity, &signed_pre_key) {
            signed_pre_key.verify(&identity.public_key()).map_err(|_| {
                Error::CorruptKeyStore("signed pre-key not signed by identity".to_string())
            })?;
        }
        if identity.is_some() != signed_pre_key.is_some() {
            return Err(Error::CorruptKeyStore(
                "identity and signed pre-key must be present together".to_string(),
            ));
        }

        let mut retired_signed_pre_keys = BTreeMap::new();
        for proto in &record.retired_signed_pre_keys {
            let key = signed_pre_key_from_proto(proto)?;
            let retired = RetiredSignedPreKey {
                key,
                retired_at: proto.retired_at,
            };
            if retired_signed_pre_keys.insert(proto.id, retired).is_some() {
                return Err(Error::CorruptKeyStore(format!(
                    "duplicate signed pre-key id {}",
                    proto.id
                )));
            }
        }

        let mut pre_keys = BTreeMap::new();
        for proto in &record.pre_keys {
            let secret = X25519Secret::try_from_slice(&proto.private_key)
                .map_err(|err| Error::CorruptKeyStore(err.to_string()))?;
            if pre_keys
                .insert(proto.id, PreKey::from_parts(proto.id, secret))
                .is_some()
            {
                return Err(Error::CorruptKeyStore(format!(
                    "duplicate pre-key id {}",
                    proto.id
                )));
            }
        }

        Ok(KeyStore {
            identity,
            registration_id: record.registration_id,
            signed_pre_key,
            retired_signed_pre_keys,
            pre_keys,
            next_pre_key_id: record.next_pre_key_id,
            next_signed_pre_key_id: record.next_signed_pre_key_id,
            config,
        })
    }
}
