//! State replication configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on how far a buffered payload may run ahead of the ledger.
pub const DEF_MAX_BLOCK_DISTANCE: u64 = 100;

/// Default anti-entropy tick interval.
pub const DEF_ANTI_ENTROPY_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of blocks per state request.
pub const DEF_ANTI_ENTROPY_BATCH_SIZE: u64 = 10;

/// Default wait for a state response before retrying another peer.
pub const DEF_ANTI_ENTROPY_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of peers tried per chunk within one tick.
pub const DEF_ANTI_ENTROPY_MAX_RETRIES: u32 = 3;

/// Default metastate publication interval.
pub const DEF_PUBLISH_STATE_INFO_INTERVAL: Duration = Duration::from_secs(4);

/// Default capacity of the inbound message hand-off channels.
pub const DEF_CHANNEL_BUFFER_SIZE: usize = 100;

/// Tunables of the state replication core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Reject payloads whose sequence runs this far (or more) ahead of the
    /// ledger height. Bounds buffer memory per channel.
    pub max_block_distance: u64,
    /// Interval between anti-entropy rounds.
    pub anti_entropy_interval: Duration,
    /// Maximum consecutive sequences per state request.
    pub anti_entropy_batch_size: u64,
    /// How long to wait for a state response before giving up on a peer.
    pub anti_entropy_response_timeout: Duration,
    /// How many peers to try per chunk within a single round.
    pub anti_entropy_max_retries: u32,
    /// Interval between metastate publications.
    pub publish_state_info_interval: Duration,
    /// Capacity of the inbound message hand-off channels.
    pub channel_buffer_size: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_block_distance: DEF_MAX_BLOCK_DISTANCE,
            anti_entropy_interval: DEF_ANTI_ENTROPY_INTERVAL,
            anti_entropy_batch_size: DEF_ANTI_ENTROPY_BATCH_SIZE,
            anti_entropy_response_timeout: DEF_ANTI_ENTROPY_RESPONSE_TIMEOUT,
            anti_entropy_max_retries: DEF_ANTI_ENTROPY_MAX_RETRIES,
            publish_state_info_interval: DEF_PUBLISH_STATE_INFO_INTERVAL,
            channel_buffer_size: DEF_CHANNEL_BUFFER_SIZE,
        }
    }
}
