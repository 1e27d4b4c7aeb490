//! Protocol configuration.

use circle_crypto::DEFAULT_MAX_SKIP;

/// Tunables shared by the group coordinator and identity setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Largest forward jump a mirrored group chain performs to reach a
    /// message's key index. Each skipped key is cached.
    pub max_skip: u32,

    /// Cached message keys older than `key_index - sender_key_retention`
    /// are evicted after every group send/receive.
    pub sender_key_retention: u32,

    /// Number of one-time pre-keys generated with the device identity.
    pub pre_key_count: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { max_skip: DEFAULT_MAX_SKIP, sender_key_retention: 2000, pre_key_count: 10 }
    }
}
