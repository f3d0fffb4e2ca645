//! Server side of the anti-entropy protocol.

use crate::coordinator::{allow_all_filter, Coordinator};
use crate::{StateError, StateResult};
use mesh_gossip::{ConnectionInfo, MessageCryptoService, ReceivedMessage};
use mesh_proto::{ChannelId, GossipMessage, Payload};
use std::sync::Arc;
use tracing::{debug, warn};

/// Serves block ranges to authorized peers.
///
/// Authorization happens before anything is fetched, and denial is silent to
/// the remote: an unauthorized requester learns nothing about which blocks
/// exist here.
pub(crate) struct StateRequestServer {
    channel: ChannelId,
    crypto: Arc<dyn MessageCryptoService>,
    coordinator: Arc<dyn Coordinator>,
    batch_size: u64,
}

impl StateRequestServer {
    pub(crate) fn new(
        channel: ChannelId,
        crypto: Arc<dyn MessageCryptoService>,
        coordinator: Arc<dyn Coordinator>,
        batch_size: u64,
    ) -> Self {
        Self {
            channel,
            crypto,
            coordinator,
            batch_size,
        }
    }

    /// Handle one inbound state request.
    pub(crate) fn handle(&self, msg: &dyn ReceivedMessage) {
        let gossip_msg = msg.gossip_message();
        let Some(request) = gossip_msg.state_request_body() else {
            return;
        };
        let info = msg.connection_info();

        if let Err(e) = self.authorize(info) {
            warn!(
                peer = %info.endpoint,
                error = %e,
                "Dropping state request from unauthorized peer"
            );
            return;
        }

        let height = match self.coordinator.ledger_height() {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "Cannot serve state request without ledger height");
                return;
            }
        };

        let start = request.start_seq_num;
        let end = request
            .end_seq_num
            .min(start.saturating_add(self.batch_size.saturating_sub(1)))
            .min(height.saturating_sub(1));

        let mut payloads: Vec<Payload> = Vec::new();
        if start <= end {
            let filter = allow_all_filter();
            for seq_num in start..=end {
                match self.coordinator.get_pvt_data_and_block_by_num(seq_num, &filter) {
                    Ok((block, pvt_data)) => {
                        let private_data = match pvt_data.marshal() {
                            Ok(blobs) => blobs,
                            Err(e) => {
                                warn!(seq_num, error = %e, "Cannot marshal private data, skipping block");
                                continue;
                            }
                        };
                        payloads.push(Payload {
                            seq_num,
                            data: block.encode(),
                            private_data,
                        });
                    }
                    Err(e) => {
                        // Best-effort: an absent block is omitted from the response
                        debug!(seq_num, error = %e, "Block is not available locally");
                    }
                }
            }
        }

        debug!(
            peer = %info.endpoint,
            start,
            end = request.end_seq_num,
            served = payloads.len(),
            "Responding to state request"
        );
        msg.respond(GossipMessage::state_response(
            self.channel.clone(),
            gossip_msg.nonce,
            payloads,
        ));
    }

    fn authorize(&self, info: &ConnectionInfo) -> StateResult<()> {
        let Some(auth) = &info.auth else {
            return Err(StateError::NotAuthorized(format!(
                "{} presented no authentication material",
                info.endpoint
            )));
        };
        self.crypto
            .verify_by_channel(&self.channel, &info.identity, &auth.signature, &auth.signed_data)
            .map_err(|e| StateError::NotAuthorized(e.to_string()))
    }
}
