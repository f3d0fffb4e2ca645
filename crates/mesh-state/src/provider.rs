//! The gossip state provider: receive, deliver, reconcile.
//!
//! The provider owns the payload buffer and the long-running tasks that feed
//! and drain it:
//! 1. data receiver: block broadcasts from the overlay
//! 2. direct receiver: dispatches state requests and responses
//! 3. request server: answers authorized peers from the local ledger
//! 4. deliver loop: commits contiguous blocks in sequence order
//! 5. anti-entropy loop: pulls missing ranges from ahead peers
//! 6. metadata advertiser: publishes the local ledger height

use crate::advertiser::MetadataAdvertiser;
use crate::antientropy::{AntiEntropyEngine, AntiEntropySnapshot, AntiEntropyStats};
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::payload_buffer::PayloadBuffer;
use crate::server::StateRequestServer;
use crate::{NodeMetastate, StateConfig, StateError, StateResult};
use mesh_gossip::{GossipAdapter, MessageCryptoService, ReceivedMessage};
use mesh_proto::{Block, ChannelId, GossipContent, GossipMessage, Payload, PvtDataCollections};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Commit attempts per block before the deliver loop gives up on it.
const COMMIT_ATTEMPTS: u32 = 3;

/// Pause between commit attempts.
const COMMIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Callback invoked on every failed commit attempt with the block sequence
/// and the committer's error. The policy surface for deployments that must
/// halt or alert instead of skipping.
pub type CommitFailureHook = Arc<dyn Fn(u64, &CoordinatorError) + Send + Sync>;

/// The overlay-facing collaborators the provider consumes.
#[derive(Clone)]
pub struct ServicesMediator {
    /// Gossip overlay.
    pub adapter: Arc<dyn GossipAdapter>,
    /// Channel-scoped authorization.
    pub crypto: Arc<dyn MessageCryptoService>,
}

struct ProviderCore {
    channel: ChannelId,
    adapter: Arc<dyn GossipAdapter>,
    coordinator: Arc<dyn Coordinator>,
    buffer: Arc<PayloadBuffer>,
    config: StateConfig,
    server: StateRequestServer,
    antientropy: Arc<AntiEntropyEngine>,
    stats: Arc<AntiEntropyStats>,
    /// Hand-off queue from the direct receiver to the request server task.
    request_tx: mpsc::Sender<Box<dyn ReceivedMessage>>,
    stopped: AtomicBool,
    commit_failure_hook: Option<CommitFailureHook>,
}

/// Keeps the local ledger converging toward the highest sequence known to
/// any authorized peer of the channel.
pub struct GossipStateProvider {
    core: Arc<ProviderCore>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipStateProvider {
    /// Create a provider and start its background tasks.
    ///
    /// Must be called from within a tokio runtime. Fails when the committer
    /// cannot report the ledger height.
    ///
    /// # Panics
    ///
    /// Panics when the reported height is zero: the ledger must hold at
    /// least the genesis block before state transfer can run.
    pub fn new(
        channel: ChannelId,
        services: ServicesMediator,
        coordinator: Arc<dyn Coordinator>,
        config: StateConfig,
    ) -> StateResult<Self> {
        Self::build(channel, services, coordinator, config, None)
    }

    /// Like [`new`](Self::new), with a hook observing failed commit attempts.
    pub fn with_commit_failure_hook(
        channel: ChannelId,
        services: ServicesMediator,
        coordinator: Arc<dyn Coordinator>,
        config: StateConfig,
        hook: CommitFailureHook,
    ) -> StateResult<Self> {
        Self::build(channel, services, coordinator, config, Some(hook))
    }

    fn build(
        channel: ChannelId,
        services: ServicesMediator,
        coordinator: Arc<dyn Coordinator>,
        config: StateConfig,
        commit_failure_hook: Option<CommitFailureHook>,
    ) -> StateResult<Self> {
        let height = coordinator
            .ledger_height()
            .map_err(|e| StateError::LedgerUnavailable(e.to_string()))?;
        if height == 0 {
            panic!("Ledger height cannot be zero, ledger should include at least one block (genesis block)");
        }

        let broadcast_rx = {
            let channel = channel.clone();
            services
                .adapter
                .accept_broadcast(Arc::new(move |msg: &GossipMessage| {
                    msg.data_payload().is_some() && msg.channel == channel
                }))
        };
        let direct_rx = services
            .adapter
            .accept_direct(Arc::new(|msg: &GossipMessage| msg.is_remote_state_message()));

        let buffer = Arc::new(PayloadBuffer::new(height, config.max_block_distance));
        let stats = Arc::new(AntiEntropyStats::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (request_tx, request_rx) = mpsc::channel(config.channel_buffer_size);

        let antientropy = Arc::new(AntiEntropyEngine::new(
            channel.clone(),
            services.adapter.clone(),
            coordinator.clone(),
            buffer.clone(),
            config.clone(),
            stats.clone(),
            stop_rx.clone(),
        ));
        let server = StateRequestServer::new(
            channel.clone(),
            services.crypto.clone(),
            coordinator.clone(),
            config.anti_entropy_batch_size,
        );
        let advertiser = MetadataAdvertiser::new(
            channel.clone(),
            services.adapter.clone(),
            coordinator.clone(),
            config.publish_state_info_interval,
        );

        let core = Arc::new(ProviderCore {
            channel,
            adapter: services.adapter,
            coordinator,
            buffer,
            config,
            server,
            antientropy: antientropy.clone(),
            stats,
            request_tx,
            stopped: AtomicBool::new(false),
            commit_failure_hook,
        });

        // Advertise the starting height before anyone asks for it
        core.publish_metastate();

        let tasks = vec![
            tokio::spawn(Self::receive_data(
                core.clone(),
                broadcast_rx,
                stop_rx.clone(),
            )),
            tokio::spawn(Self::receive_direct(core.clone(), direct_rx, stop_rx.clone())),
            tokio::spawn(Self::process_state_requests(
                core.clone(),
                request_rx,
                stop_rx.clone(),
            )),
            tokio::spawn(Self::deliver_payloads(core.clone(), stop_rx.clone())),
            tokio::spawn(antientropy.run()),
            tokio::spawn(advertiser.run(stop_rx)),
        ];

        info!(channel = %core.channel, height, "State provider started");
        Ok(Self {
            core,
            stop_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Insert a block payload delivered outside the overlay (e.g. by the
    /// ordering service's delivery client).
    pub fn add_payload(&self, payload: Payload) -> StateResult<()> {
        if self.core.stopped.load(Ordering::SeqCst) {
            return Err(StateError::Stopped);
        }
        self.core.enqueue(payload)
    }

    /// Read a committed block, `None` when the ledger does not hold it.
    pub fn get_block(&self, seq_num: u64) -> Option<Block> {
        if self.core.stopped.load(Ordering::SeqCst) {
            return None;
        }
        self.core.coordinator.get_block_by_num(seq_num).ok()
    }

    /// Replication counters.
    pub fn stats(&self) -> AntiEntropySnapshot {
        self.core.stats.snapshot()
    }

    /// Number of payloads currently buffered ahead of the commit cursor.
    pub fn buffer_size(&self) -> usize {
        self.core.buffer.size()
    }

    /// Stop all background tasks cooperatively.
    ///
    /// Blocks until the deliver loop has flushed the block it is currently
    /// committing. Afterwards every public operation reports `Stopped`.
    pub async fn stop(&self) {
        if self.core.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(channel = %self.core.channel, "Stopping state provider");
        let _ = self.stop_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.core.coordinator.close();
    }

    async fn receive_data(
        core: Arc<ProviderCore>,
        mut rx: mpsc::Receiver<GossipMessage>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => core.queue_new_message(msg),
                    None => {
                        debug!("Broadcast subscription closed");
                        return;
                    }
                },
                _ = stop.changed() => return,
            }
        }
    }

    async fn receive_direct(
        core: Arc<ProviderCore>,
        mut rx: mpsc::Receiver<Box<dyn ReceivedMessage>>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => core.direct_message(msg),
                    None => {
                        debug!("Direct subscription closed");
                        return;
                    }
                },
                _ = stop.changed() => return,
            }
        }
    }

    async fn process_state_requests(
        core: Arc<ProviderCore>,
        mut rx: mpsc::Receiver<Box<dyn ReceivedMessage>>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => core.server.handle(msg.as_ref()),
                    None => return,
                },
                _ = stop.changed() => return,
            }
        }
    }

    async fn deliver_payloads(core: Arc<ProviderCore>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = core.buffer.ready() => {
                    loop {
                        if *stop.borrow() {
                            return;
                        }
                        match core.buffer.pop() {
                            Some(payload) => core.commit_payload(payload).await,
                            None => break,
                        }
                    }
                }
                _ = stop.changed() => {
                    debug!("Deliver loop stopped");
                    return;
                }
            }
        }
    }
}

impl ProviderCore {
    /// Validate and buffer a payload against the current ledger height.
    fn enqueue(&self, payload: Payload) -> StateResult<()> {
        if payload.data.is_empty() {
            return Err(StateError::NilPayload);
        }
        let height = self
            .coordinator
            .ledger_height()
            .map_err(|e| StateError::LedgerUnavailable(e.to_string()))?;
        if payload.seq_num >= height.saturating_add(self.config.max_block_distance) {
            return Err(StateError::OutOfRange(format!(
                "ledger height is at {}, cannot enqueue block with sequence {}",
                height, payload.seq_num
            )));
        }
        self.buffer.push(payload)
    }

    /// Handle one gossiped broadcast message.
    fn queue_new_message(&self, msg: GossipMessage) {
        if msg.channel != self.channel {
            warn!(
                channel = %msg.channel,
                own = %self.channel,
                "Dropping message addressed to another channel"
            );
            return;
        }
        let Some(payload) = msg.data_payload() else {
            debug!("Ignoring non-data message on the broadcast channel");
            return;
        };
        if let Err(e) = self.enqueue(payload.clone()) {
            debug!(seq_num = payload.seq_num, error = %e, "Dropping gossiped payload");
        }
    }

    /// Dispatch one directed message.
    fn direct_message(&self, msg: Box<dyn ReceivedMessage>) {
        let routed_response = {
            let gossip_msg = msg.gossip_message();
            if gossip_msg.channel != self.channel {
                warn!(
                    channel = %gossip_msg.channel,
                    own = %self.channel,
                    "Dropping directed message addressed to another channel"
                );
                return;
            }
            match &gossip_msg.content {
                GossipContent::StateRequest(_) => None,
                GossipContent::StateResponse(response) => {
                    Some((gossip_msg.nonce, response.clone()))
                }
                GossipContent::DataMsg(_) => {
                    debug!("Ignoring broadcast payload on the direct channel");
                    return;
                }
            }
        };
        match routed_response {
            Some((nonce, response)) => self.antientropy.route_response(nonce, response),
            None => {
                if let Err(e) = self.request_tx.try_send(msg) {
                    // Receive side must drop, not block, when the server lags
                    warn!(error = %e, "State request queue is full, dropping request");
                }
            }
        }
    }

    /// Commit one popped payload, retrying transient failures.
    async fn commit_payload(&self, payload: Payload) {
        let seq_num = payload.seq_num;
        let block = match Block::decode(&payload.data) {
            Ok(block) => block,
            Err(e) => {
                error!(seq_num, error = %e, "Cannot decode block, skipping");
                return;
            }
        };
        let pvt_data = match PvtDataCollections::unmarshal(&payload.private_data) {
            Ok(pvt_data) => pvt_data,
            Err(e) => {
                error!(seq_num, error = %e, "Cannot decode private data, committing block without it");
                PvtDataCollections::empty()
            }
        };

        for attempt in 1..=COMMIT_ATTEMPTS {
            match self.coordinator.store_block(block.clone(), pvt_data.clone()) {
                Ok(missing) => {
                    if !missing.is_empty() {
                        warn!(
                            seq_num,
                            missing = missing.len(),
                            "Committed block lacks private data for some transactions"
                        );
                    }
                    trace!(seq_num, "Block committed");
                    self.publish_metastate();
                    return;
                }
                Err(e) => {
                    error!(seq_num, attempt, error = %e, "Commit failed");
                    if let Some(hook) = &self.commit_failure_hook {
                        hook(seq_num, &e);
                    }
                    if attempt < COMMIT_ATTEMPTS {
                        tokio::time::sleep(COMMIT_RETRY_DELAY).await;
                    }
                }
            }
        }
        error!(
            seq_num,
            attempts = COMMIT_ATTEMPTS,
            "Giving up on block commit"
        );
    }

    /// Push the current ledger height into channel metadata.
    fn publish_metastate(&self) {
        match self.coordinator.ledger_height() {
            Ok(height) => {
                self.adapter
                    .update_channel_metadata(NodeMetastate::new(height).to_bytes(), &self.channel);
            }
            Err(e) => debug!(error = %e, "Cannot refresh metastate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::{Committer, LedgerError};
    use crate::coordinator::LedgerCoordinator;
    use mesh_gossip::{GossipError, MessagePredicate, NetworkMember, PeerIdentity, RemotePeer};

    /// Adapter whose subscriptions never deliver anything.
    struct NullAdapter;

    impl GossipAdapter for NullAdapter {
        fn accept_broadcast(&self, _predicate: MessagePredicate) -> mpsc::Receiver<GossipMessage> {
            mpsc::channel(1).1
        }

        fn accept_direct(
            &self,
            _predicate: MessagePredicate,
        ) -> mpsc::Receiver<Box<dyn ReceivedMessage>> {
            mpsc::channel(1).1
        }

        fn gossip(&self, _msg: GossipMessage) {}
        fn send(&self, _msg: GossipMessage, _peer: &RemotePeer) {}

        fn peers_of_channel(&self, _channel: &ChannelId) -> Vec<NetworkMember> {
            Vec::new()
        }

        fn update_channel_metadata(&self, _metadata: Vec<u8>, _channel: &ChannelId) {}
        fn join_channel(&self, _join_msg: &mesh_gossip::JoinChannelMessage, _channel: &ChannelId) {}
        fn close(&self) {}
    }

    struct NullCrypto;

    impl MessageCryptoService for NullCrypto {
        fn verify_by_channel(
            &self,
            _channel: &ChannelId,
            _identity: &PeerIdentity,
            _signature: &[u8],
            _message: &[u8],
        ) -> Result<(), GossipError> {
            Ok(())
        }
    }

    /// Committer whose height report can be reprogrammed mid-test.
    struct SwitchableCommitter {
        height: Mutex<Result<u64, String>>,
    }

    impl SwitchableCommitter {
        fn new(height: u64) -> Self {
            Self {
                height: Mutex::new(Ok(height)),
            }
        }

        fn fail_with(&self, reason: &str) {
            *self.height.lock() = Err(reason.to_string());
        }
    }

    impl Committer for SwitchableCommitter {
        fn commit(&self, _block: &Block) -> Result<(), LedgerError> {
            Ok(())
        }

        fn ledger_height(&self) -> Result<u64, LedgerError> {
            self.height.lock().clone().map_err(LedgerError)
        }

        fn get_blocks(&self, _seq_nums: &[u64]) -> Vec<Block> {
            Vec::new()
        }

        fn close(&self) {}
    }

    fn services() -> ServicesMediator {
        ServicesMediator {
            adapter: Arc::new(NullAdapter),
            crypto: Arc::new(NullCrypto),
        }
    }

    fn provider_over(committer: Arc<SwitchableCommitter>) -> StateResult<GossipStateProvider> {
        GossipStateProvider::new(
            ChannelId::new("testchannel"),
            services(),
            Arc::new(LedgerCoordinator::new(committer)),
            StateConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_construction_fails_when_ledger_unavailable() {
        let committer = Arc::new(SwitchableCommitter::new(1));
        committer.fail_with("Failed accessing ledger");

        let err = provider_over(committer).err().unwrap();
        assert!(err.to_string().contains("Failed obtaining ledger height"));
    }

    #[tokio::test]
    #[should_panic(expected = "genesis")]
    async fn test_construction_aborts_on_zero_height() {
        let _ = provider_over(Arc::new(SwitchableCommitter::new(0)));
    }

    #[tokio::test]
    async fn test_add_payload_rejects_nil_block_bytes() {
        let provider = provider_over(Arc::new(SwitchableCommitter::new(1))).unwrap();

        let err = provider.add_payload(Payload::new(1, Vec::new())).unwrap_err();
        assert!(err.to_string().contains("nil"));

        provider.stop().await;
    }

    #[tokio::test]
    async fn test_add_payload_surfaces_ledger_failure() {
        let committer = Arc::new(SwitchableCommitter::new(1));
        let provider = provider_over(committer.clone()).unwrap();

        committer.fail_with("cannot query ledger");
        let err = provider
            .add_payload(Payload::new(1, Block::new(1, Vec::new()).encode()))
            .unwrap_err();
        assert!(err.to_string().contains("Failed obtaining ledger height"));
        assert!(err.to_string().contains("cannot query ledger"));

        provider.stop().await;
    }

    #[tokio::test]
    async fn test_operations_after_stop() {
        let provider = provider_over(Arc::new(SwitchableCommitter::new(1))).unwrap();
        provider.stop().await;

        let err = provider
            .add_payload(Payload::new(1, Block::new(1, Vec::new()).encode()))
            .unwrap_err();
        assert!(matches!(err, StateError::Stopped));
        assert!(provider.get_block(1).is_none());

        // A second stop is a no-op
        provider.stop().await;
    }
}
