use std::time::Duration;

/// Tunables for key management and the session ratchet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Capacity of the per-state skipped message key cache. Oldest entries are evicted first.
    pub max_skipped_message_keys: u32,
    /// Largest counter jump accepted on a single receiving chain.
    pub max_message_gap: u32,
    /// Number of superseded session states kept for late messages.
    pub max_archived_states: usize,
    /// Archived states older than this are dropped.
    pub archived_state_max_age: Duration,
    /// How often the signed pre-key should be replaced.
    pub signed_pre_key_rotation_interval: Duration,
    /// How long a replaced signed pre-key still completes inbound handshakes.
    pub signed_pre_key_grace_period: Duration,
    /// Pool size below which the caller should replenish one-time pre-keys.
    pub min_pre_keys: usize,
    /// Pool size the pool is replenished to.
    pub max_pre_keys: usize,
    /// HKDF info used for every derivation in the handshake and ratchet.
    pub protocol_info: Vec<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_skipped_message_keys: 2000,
            max_message_gap: 2000,
            max_archived_states: 40,
            archived_state_max_age: Duration::from_secs(30 * 24 * 60 * 60),
            signed_pre_key_rotation_interval: Duration::from_secs(7 * 24 * 60 * 60), // 1 week
            signed_pre_key_grace_period: Duration::from_secs(14 * 24 * 60 * 60),
            min_pre_keys: 8,
            max_pre_keys: 55,
            protocol_info: b"Nodewire-E2E-v1".to_vec(),
        }
    }
}
