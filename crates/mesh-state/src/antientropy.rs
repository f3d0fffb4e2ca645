//! Anti-entropy engine: periodic pull of missing block ranges.

use crate::coordinator::Coordinator;
use crate::payload_buffer::PayloadBuffer;
use crate::{NodeMetastate, StateConfig};
use dashmap::DashMap;
use mesh_gossip::{GossipAdapter, NetworkMember, RemotePeer};
use mesh_proto::{ChannelId, GossipMessage, RemoteStateResponse};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

/// Counters describing replication progress and peer behavior.
///
/// `short_responses` counts peers that served fewer blocks than their
/// advertised height promised.
#[derive(Debug, Default)]
pub struct AntiEntropyStats {
    pub(crate) requests_sent: AtomicU64,
    pub(crate) responses_received: AtomicU64,
    pub(crate) response_timeouts: AtomicU64,
    pub(crate) payloads_rejected: AtomicU64,
    pub(crate) short_responses: AtomicU64,
}

/// Point-in-time copy of [`AntiEntropyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AntiEntropySnapshot {
    /// State requests sent.
    pub requests_sent: u64,
    /// State responses matched to a pending request.
    pub responses_received: u64,
    /// Requests abandoned after the response timeout.
    pub response_timeouts: u64,
    /// Response payloads the buffer rejected.
    pub payloads_rejected: u64,
    /// Responses serving fewer blocks than requested.
    pub short_responses: u64,
}

impl AntiEntropyStats {
    /// Read all counters.
    pub fn snapshot(&self) -> AntiEntropySnapshot {
        AntiEntropySnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            response_timeouts: self.response_timeouts.load(Ordering::Relaxed),
            payloads_rejected: self.payloads_rejected.load(Ordering::Relaxed),
            short_responses: self.short_responses.load(Ordering::Relaxed),
        }
    }
}

/// Pulls missing block ranges from peers that advertise a higher ledger.
///
/// Progress never depends on a single peer: a request that times out is
/// retried against another randomly chosen peer, and whatever is still
/// missing is re-derived from scratch on the next tick.
pub(crate) struct AntiEntropyEngine {
    channel: ChannelId,
    adapter: Arc<dyn GossipAdapter>,
    coordinator: Arc<dyn Coordinator>,
    buffer: Arc<PayloadBuffer>,
    config: StateConfig,
    /// Outstanding requests keyed by nonce.
    pending: DashMap<u64, oneshot::Sender<RemoteStateResponse>>,
    stats: Arc<AntiEntropyStats>,
    stop: watch::Receiver<bool>,
}

impl AntiEntropyEngine {
    pub(crate) fn new(
        channel: ChannelId,
        adapter: Arc<dyn GossipAdapter>,
        coordinator: Arc<dyn Coordinator>,
        buffer: Arc<PayloadBuffer>,
        config: StateConfig,
        stats: Arc<AntiEntropyStats>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            channel,
            adapter,
            coordinator,
            buffer,
            config,
            pending: DashMap::new(),
            stats,
            stop,
        }
    }

    /// Run the periodic anti-entropy loop until stopped.
    pub(crate) async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.anti_entropy_interval);
        // The first tick fires immediately; skip it so a freshly started peer
        // first hears metadata from its neighbors.
        ticker.tick().await;
        let mut stop = self.stop.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = stop.changed() => {
                    debug!(channel = %self.channel, "Anti-entropy loop stopped");
                    return;
                }
            }
        }
    }

    /// One anti-entropy round.
    async fn tick(&self) {
        let height = match self.coordinator.ledger_height() {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "Cannot read ledger height, skipping anti-entropy round");
                return;
            }
        };
        let max = self.max_available_height();
        if max <= height {
            trace!(height, "Ledger is up to date with the channel");
            return;
        }

        debug!(
            local = height,
            max, "Ledger is behind, requesting missing blocks"
        );
        self.request_blocks_in_range(height, max - 1).await;
    }

    /// Request `[start, end]` in batch-sized chunks.
    async fn request_blocks_in_range(&self, start: u64, end: u64) {
        let mut from = start;
        while from <= end {
            if self.stopping() {
                return;
            }
            let to = from
                .saturating_add(self.config.anti_entropy_batch_size - 1)
                .min(end);
            if !self.fetch_chunk(from, to).await {
                // The gap is re-derived next tick, possibly against other peers
                return;
            }
            from = to + 1;
        }
    }

    /// Fetch one chunk, trying up to `anti_entropy_max_retries` peers.
    async fn fetch_chunk(&self, start: u64, end: u64) -> bool {
        for attempt in 1..=self.config.anti_entropy_max_retries {
            let Some(peer) = self.select_peer(end) else {
                debug!(start, end, "No peer advertises the requested range");
                return false;
            };

            let nonce: u64 = rand::random();
            let (tx, rx) = oneshot::channel();
            self.pending.insert(nonce, tx);
            self.adapter.send(
                GossipMessage::state_request(self.channel.clone(), nonce, start, end),
                &peer,
            );
            self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
            trace!(start, end, nonce, peer = %peer.endpoint, "State request sent");

            let mut stop = self.stop.clone();
            let outcome = tokio::select! {
                res = tokio::time::timeout(self.config.anti_entropy_response_timeout, rx) => res,
                _ = stop.changed() => {
                    self.pending.remove(&nonce);
                    return false;
                }
            };

            match outcome {
                Ok(Ok(response)) => {
                    self.stats.responses_received.fetch_add(1, Ordering::Relaxed);
                    self.absorb_response(start, end, response);
                    return true;
                }
                _ => {
                    // Timed out, or the provider dropped the routing side
                    self.pending.remove(&nonce);
                    self.stats.response_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        start,
                        end,
                        attempt,
                        peer = %peer.endpoint,
                        "State response timed out"
                    );
                }
            }
        }
        false
    }

    /// Push served payloads into the buffer, counting rejects and shortfalls.
    fn absorb_response(&self, start: u64, end: u64, response: RemoteStateResponse) {
        let expected = end - start + 1;
        if (response.payloads.len() as u64) < expected {
            self.stats.short_responses.fetch_add(1, Ordering::Relaxed);
            debug!(
                start,
                end,
                served = response.payloads.len(),
                "Peer served fewer blocks than requested"
            );
        }
        for payload in response.payloads {
            let seq_num = payload.seq_num;
            if let Err(e) = self.buffer.push(payload) {
                self.stats.payloads_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(seq_num, error = %e, "Discarding state response payload");
            }
        }
    }

    /// Route an inbound state response to its pending request.
    ///
    /// A response whose nonce matches no outstanding request is discarded.
    pub(crate) fn route_response(&self, nonce: u64, response: RemoteStateResponse) {
        match self.pending.remove(&nonce) {
            Some((_, tx)) => {
                let _ = tx.send(response);
            }
            None => debug!(nonce, "Discarding state response with no matching request"),
        }
    }

    /// Members of the channel with a decodable metastate.
    fn peers_with_height(&self) -> Vec<(NetworkMember, u64)> {
        self.adapter
            .peers_of_channel(&self.channel)
            .into_iter()
            .filter_map(|member| {
                NodeMetastate::from_bytes(&member.metadata)
                    .ok()
                    .map(|metastate| (member, metastate.ledger_height))
            })
            .collect()
    }

    /// Highest ledger height advertised by any peer.
    fn max_available_height(&self) -> u64 {
        self.peers_with_height()
            .iter()
            .map(|(_, height)| *height)
            .max()
            .unwrap_or(0)
    }

    /// Pick, uniformly at random, a peer able to serve block `last_needed`.
    fn select_peer(&self, last_needed: u64) -> Option<RemotePeer> {
        let candidates: Vec<RemotePeer> = self
            .peers_with_height()
            .into_iter()
            .filter(|(_, height)| *height > last_needed)
            .map(|(member, _)| RemotePeer::from(&member))
            .collect();
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }
}
