//! Channel configuration event processing.
//!
//! Configuration blocks arrive through an external event stream; the only
//! part this subsystem cares about is the anchor-peer membership. Updates
//! that change nothing are swallowed here so receivers never re-join a
//! channel for a no-op configuration bump.

use mesh_gossip::{AnchorPeer, GossipAdapter, JoinChannelMessage};
use mesh_proto::ChannelId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The slice of channel configuration relevant to membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfiguration {
    /// Channel the configuration belongs to.
    pub channel: ChannelId,
    /// Configuration sequence number.
    pub sequence: u64,
    /// Anchor peers keyed by organization.
    pub organizations: BTreeMap<String, Vec<AnchorPeer>>,
}

/// Receives configuration updates that actually changed membership.
pub trait ConfigReceiver: Send + Sync {
    /// Called with the new configuration.
    fn config_updated(&self, config: &ChannelConfiguration);
}

/// Deduplicates configuration updates before they reach the receiver.
pub struct ConfigEventer {
    receiver: Arc<dyn ConfigReceiver>,
    last_orgs: Mutex<Option<BTreeMap<String, Vec<AnchorPeer>>>>,
}

impl ConfigEventer {
    /// Create an eventer forwarding to `receiver`.
    pub fn new(receiver: Arc<dyn ConfigReceiver>) -> Self {
        Self {
            receiver,
            last_orgs: Mutex::new(None),
        }
    }

    /// Process one configuration update from the event stream.
    ///
    /// The receiver is invoked only when the anchor-peer set differs from the
    /// last forwarded one; sequence-only bumps are ignored.
    pub fn process_config_update(&self, config: &ChannelConfiguration) {
        debug!(
            channel = %config.channel,
            sequence = config.sequence,
            "Processing configuration update"
        );
        {
            let mut last = self.last_orgs.lock();
            if last.as_ref() == Some(&config.organizations) {
                debug!(
                    channel = %config.channel,
                    "Configuration contained no anchor peer updates, ignoring"
                );
                return;
            }
            *last = Some(config.organizations.clone());
        }
        self.receiver.config_updated(config);
    }
}

/// Standard receiver: re-joins the gossip channel with the new membership.
pub struct JoinChannelReceiver {
    adapter: Arc<dyn GossipAdapter>,
}

impl JoinChannelReceiver {
    /// Create a receiver joining channels through `adapter`.
    pub fn new(adapter: Arc<dyn GossipAdapter>) -> Self {
        Self { adapter }
    }
}

impl ConfigReceiver for JoinChannelReceiver {
    fn config_updated(&self, config: &ChannelConfiguration) {
        let anchor_peers: Vec<AnchorPeer> =
            config.organizations.values().flatten().cloned().collect();
        debug!(
            channel = %config.channel,
            anchors = anchor_peers.len(),
            "Joining channel with updated membership"
        );
        self.adapter.join_channel(
            &JoinChannelMessage {
                sequence_number: config.sequence,
                anchor_peers,
            },
            &config.channel,
        );
    }
}
