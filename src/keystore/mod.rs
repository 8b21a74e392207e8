use crate::config::ClientConfig;
use crate::{Error, IdentityKey, IdentityPublicKey, PreKey, PreKeyBundle, SignedPreKey};
use rand::TryRngCore;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Highest registration id handed out. Ids start at 1.
pub const MAX_REGISTRATION_ID: u32 = 16380;

/// A signed pre-key replaced by a rotation, kept for handshakes already in flight.
#[derive(Clone)]
pub(crate) struct RetiredSignedPreKey {
    pub(crate) key: SignedPreKey,
    /// Unix seconds.
    pub(crate) retired_at: u64,
}

/// Local key material: the identity, the signed pre-keys and the one-time pre-key pool.
///
/// Starts empty. Call [`KeyStore::generate_identity`] once per installation,
/// then persist with [`KeyStore::serialize`] or [`KeyStore::save`].
pub struct KeyStore {
    pub(crate) identity: Option<IdentityKey>,
    pub(crate) registration_id: u32,
    pub(crate) signed_pre_key: Option<SignedPreKey>,
    pub(crate) retired_signed_pre_keys: BTreeMap<u32, RetiredSignedPreKey>,
    pub(crate) pre_keys: BTreeMap<u32, PreKey>,
    pub(crate) next_pre_key_id: u32,
    pub(crate) next_signed_pre_key_id: u32,
    pub(crate) config: ClientConfig,
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn random_registration_id() -> Result<u32, Error> {
    let value = OsRng.try_next_u32().map_err(|_| Error::Random)?;
    Ok(value % MAX_REGISTRATION_ID + 1)
}

impl KeyStore {
    /// Creates an empty store. No key is generated yet.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            identity: None,
            registration_id: 0,
            signed_pre_key: None,
            retired_signed_pre_keys: BTreeMap::new(),
            pre_keys: BTreeMap::new(),
            next_pre_key_id: 1,
            next_signed_pre_key_id: 1,
            config,
        }
    }

    /// Loads the store at `path`, or creates one with a fresh identity and a
    /// full pre-key pool and writes it there.
    ///
    /// `config` only applies to a newly created store. A loaded store keeps the
    /// configuration it was saved with, and a mismatch is logged.
    ///
    /// An existing file that cannot be read back fails with [`Error::CorruptKeyStore`].
    pub fn open(path: impl AsRef<Path>, config: ClientConfig) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.exists() {
            let bytes = std::fs::read(path)?;
            let store = Self::deserialize(&bytes)?;
            if store.config != config {
                tracing::warn!(path = %path.display(), "ignoring config passed to open, using the persisted one");
            }
            tracing::debug!(path = %path.display(), pre_keys = store.pre_keys.len(), "loaded key store");
            return Ok(store);
        }

        let mut store = Self::new(config);
        store.generate_identity()?;
        store.replenish_pre_keys()?;
        store.save(path)?;
        tracing::info!(path = %path.display(), "created key store");
        Ok(store)
    }

    /// Writes the serialized store to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        std::fs::write(path, self.serialize()?)?;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Creates the identity, the registration id and the first signed pre-key.
    ///
    /// Does nothing if an identity already exists.
    pub fn generate_identity(&mut self) -> Result<IdentityPublicKey, Error> {
        if let Some(identity) = &self.identity {
            return Ok(identity.public_key());
        }

        let identity = IdentityKey::new()?;
        let registration_id = random_registration_id()?;
        let signed_pre_key = SignedPreKey::new(self.take_signed_pre_key_id()?, &identity)?;

        let public = identity.public_key();
        self.identity = Some(identity);
        self.registration_id = registration_id;
        self.signed_pre_key = Some(signed_pre_key);
        tracing::info!(registration_id, "generated identity");
        Ok(public)
    }

    /// Replaces the identity. Every signed and one-time pre-key is discarded
    /// since none of them is bound to the new identity.
    ///
    /// Sessions established under the old identity stop verifying on the peer side
    /// and should be reset by the caller.
    pub fn regenerate_identity(&mut self) -> Result<IdentityPublicKey, Error> {
        let identity = IdentityKey::new()?;
        let signed_pre_key = SignedPreKey::new(self.take_signed_pre_key_id()?, &identity)?;
        if self.registration_id == 0 {
            self.registration_id = random_registration_id()?;
        }

        let public = identity.public_key();
        self.identity = Some(identity);
        self.signed_pre_key = Some(signed_pre_key);
        self.retired_signed_pre_keys.clear();
        self.pre_keys.clear();
        tracing::warn!("regenerated identity, previous pre-keys discarded");
        Ok(public)
    }

    pub fn identity(&self) -> Result<&IdentityKey, Error> {
        self.identity
            .as_ref()
            .ok_or_else(|| Error::Identity("no identity generated".to_string()))
    }

    pub fn identity_public(&self) -> Result<IdentityPublicKey, Error> {
        self.identity().map(IdentityKey::public_key)
    }

    pub fn registration_id(&self) -> Result<u32, Error> {
        self.identity()?;
        Ok(self.registration_id)
    }

    fn take_signed_pre_key_id(&mut self) -> Result<u32, Error> {
        let id = self.next_signed_pre_key_id;
        self.next_signed_pre_key_id = id
            .checked_add(1)
            .ok_or_else(|| Error::PreKey("signed pre-key ids exhausted".to_string()))?;
        Ok(id)
    }

    /// Generates `count` one-time pre-keys with ids `start_id..start_id + count`.
    ///
    /// Fails without touching the pool if any of those ids is already present.
    pub fn generate_pre_keys(&mut self, count: u32, start_id: u32) -> Result<Vec<PreKey>, Error> {
        let end_id = start_id
            .checked_add(count)
            .ok_or_else(|| Error::PreKey(format!("pre-key id range from {start_id} overflows")))?;

        if let Some((&id, _)) = self.pre_keys.range(start_id..end_id).next() {
            return Err(Error::PreKey(format!("pre-key id {id} already in use")));
        }

        let keys = (start_id..end_id)
            .map(PreKey::new)
            .collect::<Result<Vec<_>, _>>()?;

        for key in &keys {
            self.pre_keys.insert(key.id(), key.clone());
        }
        self.next_pre_key_id = self.next_pre_key_id.max(end_id);
        tracing::debug!(count, start_id, "generated pre-keys");
        Ok(keys)
    }

    /// Tops the pool up to `max_pre_keys`, continuing from the highest id handed out.
    pub fn replenish_pre_keys(&mut self) -> Result<Vec<PreKey>, Error> {
        let missing = self.config.max_pre_keys.saturating_sub(self.pre_keys.len());
        if missing == 0 {
            return Ok(Vec::new());
        }
        let count = u32::try_from(missing)
            .map_err(|_| Error::PreKey(format!("cannot generate {missing} pre-keys")))?;
        self.generate_pre_keys(count, self.next_pre_key_id)
    }

    /// Whether the pool has fallen below `min_pre_keys`.
    pub fn needs_pre_keys(&self) -> bool {
        self.pre_keys.len() < self.config.min_pre_keys
    }

    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.len()
    }

    /// Removes and returns a one-time pre-key. A key can be consumed only once.
    pub fn consume_pre_key(&mut self, id: u32) -> Result<PreKey, Error> {
        self.pre_keys.remove(&id).ok_or(Error::PreKeyNotFound(id))
    }

    /// Puts back a key consumed by a handshake that did not complete.
    pub(crate) fn restore_pre_key(&mut self, key: PreKey) {
        self.pre_keys.entry(key.id()).or_insert(key);
    }

    pub fn current_signed_pre_key(&self) -> Result<&SignedPreKey, Error> {
        self.signed_pre_key
            .as_ref()
            .ok_or_else(|| Error::Identity("no identity generated".to_string()))
    }

    /// Looks up the current signed pre-key or one still in its grace window.
    pub fn signed_pre_key(&self, id: u32) -> Option<&SignedPreKey> {
        self.signed_pre_key_at(id, SystemTime::now())
    }

    /// Like [`KeyStore::signed_pre_key`], with the grace window measured at `now`.
    /// A retired key past its window is not returned even before it is pruned.
    pub fn signed_pre_key_at(&self, id: u32, now: SystemTime) -> Option<&SignedPreKey> {
        if let Some(current) = self.signed_pre_key.as_ref().filter(|key| key.id() == id) {
            return Some(current);
        }
        let grace = self.config.signed_pre_key_grace_period.as_secs();
        self.retired_signed_pre_keys
            .get(&id)
            .filter(|retired| retired.retired_at.saturating_add(grace) > unix_secs(now))
            .map(|retired| &retired.key)
    }

    pub fn rotate_signed_pre_key(&mut self) -> Result<&SignedPreKey, Error> {
        self.rotate_signed_pre_key_at(SystemTime::now())
    }

    /// Replaces the current signed pre-key. The replaced key stays usable for
    /// `signed_pre_key_grace_period` and is dropped by a later rotation or prune.
    pub fn rotate_signed_pre_key_at(&mut self, now: SystemTime) -> Result<&SignedPreKey, Error> {
        self.identity()?;
        self.prune_signed_pre_keys_at(now);

        let id = self.take_signed_pre_key_id()?;
        let next = SignedPreKey::new_at(id, self.identity()?, now)?;

        if let Some(previous) = self.signed_pre_key.replace(next) {
            self.retired_signed_pre_keys.insert(
                previous.id(),
                RetiredSignedPreKey {
                    key: previous,
                    retired_at: unix_secs(now),
                },
            );
        }
        tracing::info!(signed_pre_key_id = id, "rotated signed pre-key");
        self.current_signed_pre_key()
    }

    /// Rotates the signed pre-key once the rotation interval has passed since it was created.
    pub fn rotate_signed_pre_key_if_due(&mut self) -> Result<Option<&SignedPreKey>, Error> {
        self.rotate_signed_pre_key_if_due_at(SystemTime::now())
    }

    pub fn rotate_signed_pre_key_if_due_at(
        &mut self,
        now: SystemTime,
    ) -> Result<Option<&SignedPreKey>, Error> {
        let created_at = self.current_signed_pre_key()?.created_at();
        let age = unix_secs(now).saturating_sub(created_at);
        if age < self.config.signed_pre_key_rotation_interval.as_secs() {
            return Ok(None);
        }
        self.rotate_signed_pre_key_at(now).map(Some)
    }

    /// Drops retired signed pre-keys whose grace window has ended.
    pub fn prune_signed_pre_keys_at(&mut self, now: SystemTime) {
        let now = unix_secs(now);
        let grace = self.config.signed_pre_key_grace_period.as_secs();
        let before = self.retired_signed_pre_keys.len();
        self.retired_signed_pre_keys
            .retain(|_, retired| retired.retired_at.saturating_add(grace) > now);

        let pruned = before - self.retired_signed_pre_keys.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned expired signed pre-keys");
        }
    }

    /// Public bundle for publishing. Offers the lowest unused one-time pre-key, if any.
    pub fn pre_key_bundle(&self) -> Result<PreKeyBundle, Error> {
        let identity = self.identity()?;
        let signed_pre_key = self.current_signed_pre_key()?;

        Ok(PreKeyBundle {
            registration_id: self.registration_id,
            identity_key: identity.public_key(),
            signed_pre_key_id: signed_pre_key.id(),
            signed_pre_key: signed_pre_key.public_key(),
            signed_pre_key_signature: signed_pre_key.signature(),
            one_time_pre_key: self
                .pre_keys
                .values()
                .next()
                .map(|key| (key.id(), key.public_key())),
        })
    }
}

impl Zeroize for KeyStore {
    fn zeroize(&mut self) {
        if let Some(identity) = self.identity.as_mut() {
            identity.zeroize();
        }
        self.pre_keys.clear();
        self.retired_signed_pre_keys.clear();
    }
}

impl ZeroizeOnDrop for KeyStore {}
