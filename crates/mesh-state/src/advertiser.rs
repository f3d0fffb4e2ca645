//! Periodic publication of the local metastate.

use crate::coordinator::Coordinator;
use crate::NodeMetastate;
use mesh_gossip::GossipAdapter;
use mesh_proto::ChannelId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Publishes the local ledger height into channel metadata on an interval.
///
/// Peers treat the advertised height purely as a hint; the anti-entropy
/// engine re-reads the freshest metadata every tick.
pub(crate) struct MetadataAdvertiser {
    channel: ChannelId,
    adapter: Arc<dyn GossipAdapter>,
    coordinator: Arc<dyn Coordinator>,
    interval: Duration,
}

impl MetadataAdvertiser {
    pub(crate) fn new(
        channel: ChannelId,
        adapter: Arc<dyn GossipAdapter>,
        coordinator: Arc<dyn Coordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            channel,
            adapter,
            coordinator,
            interval,
        }
    }

    /// Run the publication loop until stopped.
    pub(crate) async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish(),
                _ = stop.changed() => {
                    debug!(channel = %self.channel, "Metadata advertiser stopped");
                    return;
                }
            }
        }
    }

    fn publish(&self) {
        match self.coordinator.ledger_height() {
            Ok(height) => {
                trace!(channel = %self.channel, height, "Publishing metastate");
                self.adapter.update_channel_metadata(
                    NodeMetastate::new(height).to_bytes(),
                    &self.channel,
                );
            }
            Err(e) => debug!(error = %e, "Cannot publish metastate without ledger height"),
        }
    }
}
