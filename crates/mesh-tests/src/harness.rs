//! Test harness for state replication integration tests.
//!
//! Provides an in-process loopback overlay connecting several peers, a
//! scripted adapter for single-peer protocol tests, and instrumented
//! committer/coordinator/crypto doubles.

use mesh_gossip::{
    AuthInfo, ConnectionInfo, GossipAdapter, GossipError, JoinChannelMessage, MessageCryptoService,
    MessagePredicate, NetworkMember, PeerIdentity, PkiId, ReceivedMessage, RemotePeer,
};
use mesh_proto::{Block, ChannelId, GossipContent, GossipMessage, PvtDataCollections};
use mesh_state::{
    Committer, Coordinator, CoordinatorError, GossipStateProvider, LedgerCoordinator, LedgerError,
    PvtDataFilter, ServicesMediator, StateConfig,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Capacity of every harness hand-off channel.
const HARNESS_CHANNEL_CAPACITY: usize = 256;

/// The channel all harness peers replicate.
pub fn test_channel() -> ChannelId {
    ChannelId::new("testchannel")
}

/// Fast-cycle configuration so integration tests converge in milliseconds.
pub fn test_config() -> StateConfig {
    StateConfig {
        // Wide enough apart that commits from one round always settle
        // before the next round derives its gap.
        anti_entropy_interval: Duration::from_secs(1),
        anti_entropy_response_timeout: Duration::from_millis(500),
        publish_state_info_interval: Duration::from_millis(100),
        ..StateConfig::default()
    }
}

/// Install a test logger; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `predicate` until it holds or `timeout` expires.
pub async fn wait_until(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

// ============================================================================
// Loopback overlay
// ============================================================================

struct BroadcastSub {
    predicate: MessagePredicate,
    tx: mpsc::Sender<GossipMessage>,
}

struct DirectSub {
    predicate: MessagePredicate,
    tx: mpsc::Sender<Box<dyn ReceivedMessage>>,
}

#[derive(Default)]
struct PeerSlot {
    endpoint: String,
    metadata: Vec<u8>,
    broadcast_subs: Vec<BroadcastSub>,
    direct_subs: Vec<DirectSub>,
    responses_delivered: Arc<AtomicU64>,
    joins: Vec<JoinChannelMessage>,
    closed: bool,
}

struct NetworkInner {
    peers: RwLock<HashMap<PkiId, PeerSlot>>,
}

impl NetworkInner {
    fn connection_info(&self, from: &PkiId) -> ConnectionInfo {
        let peers = self.peers.read();
        let endpoint = peers
            .get(from)
            .map(|slot| slot.endpoint.clone())
            .unwrap_or_default();
        ConnectionInfo {
            pki_id: from.clone(),
            identity: PeerIdentity::from_bytes(endpoint.as_bytes().to_vec()),
            endpoint,
            auth: Some(AuthInfo {
                signed_data: b"state-transfer".to_vec(),
                signature: b"signature".to_vec(),
            }),
        }
    }

}

fn deliver_direct(inner: &Arc<NetworkInner>, from: &PkiId, to: &PkiId, msg: GossipMessage) {
    let info = inner.connection_info(from);
    let peers = inner.peers.read();
    let Some(target) = peers.get(to) else {
        return;
    };
    if target.closed {
        return;
    }
    if matches!(msg.content, GossipContent::StateResponse(_)) {
        target.responses_delivered.fetch_add(1, Ordering::SeqCst);
    }
    for sub in &target.direct_subs {
        if (sub.predicate)(&msg) {
            let received: Box<dyn ReceivedMessage> = Box::new(LoopbackReceivedMessage {
                msg: msg.clone(),
                info: info.clone(),
                inner: inner.clone(),
                receiver: to.clone(),
                sender: from.clone(),
            });
            let _ = sub.tx.try_send(received);
        }
    }
}

/// A directed message travelling over the loopback overlay. `respond` routes
/// the reply back to the original sender over the same overlay.
struct LoopbackReceivedMessage {
    msg: GossipMessage,
    info: ConnectionInfo,
    inner: Arc<NetworkInner>,
    /// The peer this message was delivered to.
    receiver: PkiId,
    /// The peer that sent it.
    sender: PkiId,
}

impl ReceivedMessage for LoopbackReceivedMessage {
    fn gossip_message(&self) -> &GossipMessage {
        &self.msg
    }

    fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn respond(&self, msg: GossipMessage) {
        deliver_direct(&self.inner, &self.receiver, &self.sender, msg);
    }
}

/// In-process overlay connecting [`LoopbackAdapter`] peers.
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                peers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register peer `id`, reachable at `localhost:<5610 + id>`.
    pub fn register(&self, id: usize) -> Arc<LoopbackAdapter> {
        let pki_id = PkiId::from_bytes(vec![id as u8]);
        let endpoint = peer_endpoint(id);
        self.inner.peers.write().insert(
            pki_id.clone(),
            PeerSlot {
                endpoint: endpoint.clone(),
                ..PeerSlot::default()
            },
        );
        Arc::new(LoopbackAdapter {
            inner: self.inner.clone(),
            pki_id,
            endpoint,
        })
    }

    /// How many state responses were delivered to `pki_id` so far.
    pub fn state_responses_delivered(&self, pki_id: &PkiId) -> u64 {
        self.inner
            .peers
            .read()
            .get(pki_id)
            .map(|slot| slot.responses_delivered.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Channel joins recorded for `pki_id`.
    pub fn joins_of(&self, pki_id: &PkiId) -> Vec<JoinChannelMessage> {
        self.inner
            .peers
            .read()
            .get(pki_id)
            .map(|slot| slot.joins.clone())
            .unwrap_or_default()
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint assigned to harness peer `id`.
pub fn peer_endpoint(id: usize) -> String {
    format!("localhost:{}", 5610 + id)
}

/// One peer's view of the loopback overlay.
pub struct LoopbackAdapter {
    inner: Arc<NetworkInner>,
    pki_id: PkiId,
    endpoint: String,
}

impl LoopbackAdapter {
    pub fn pki_id(&self) -> &PkiId {
        &self.pki_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GossipAdapter for LoopbackAdapter {
    fn accept_broadcast(&self, predicate: MessagePredicate) -> mpsc::Receiver<GossipMessage> {
        let (tx, rx) = mpsc::channel(HARNESS_CHANNEL_CAPACITY);
        let mut peers = self.inner.peers.write();
        if let Some(slot) = peers.get_mut(&self.pki_id) {
            slot.broadcast_subs.push(BroadcastSub { predicate, tx });
        }
        rx
    }

    fn accept_direct(
        &self,
        predicate: MessagePredicate,
    ) -> mpsc::Receiver<Box<dyn ReceivedMessage>> {
        let (tx, rx) = mpsc::channel(HARNESS_CHANNEL_CAPACITY);
        let mut peers = self.inner.peers.write();
        if let Some(slot) = peers.get_mut(&self.pki_id) {
            slot.direct_subs.push(DirectSub { predicate, tx });
        }
        rx
    }

    fn gossip(&self, msg: GossipMessage) {
        let peers = self.inner.peers.read();
        for (pki_id, slot) in peers.iter() {
            if *pki_id == self.pki_id || slot.closed {
                continue;
            }
            for sub in &slot.broadcast_subs {
                if (sub.predicate)(&msg) {
                    let _ = sub.tx.try_send(msg.clone());
                }
            }
        }
    }

    fn send(&self, msg: GossipMessage, peer: &RemotePeer) {
        deliver_direct(&self.inner, &self.pki_id, &peer.pki_id, msg);
    }

    fn peers_of_channel(&self, _channel: &ChannelId) -> Vec<NetworkMember> {
        self.inner
            .peers
            .read()
            .iter()
            .filter(|(pki_id, slot)| **pki_id != self.pki_id && !slot.closed)
            .map(|(pki_id, slot)| NetworkMember {
                pki_id: pki_id.clone(),
                endpoint: slot.endpoint.clone(),
                metadata: slot.metadata.clone(),
            })
            .collect()
    }

    fn update_channel_metadata(&self, metadata: Vec<u8>, _channel: &ChannelId) {
        if let Some(slot) = self.inner.peers.write().get_mut(&self.pki_id) {
            slot.metadata = metadata;
        }
    }

    fn join_channel(&self, join_msg: &JoinChannelMessage, _channel: &ChannelId) {
        if let Some(slot) = self.inner.peers.write().get_mut(&self.pki_id) {
            slot.joins.push(join_msg.clone());
        }
    }

    fn close(&self) {
        if let Some(slot) = self.inner.peers.write().get_mut(&self.pki_id) {
            slot.closed = true;
        }
    }
}

// ============================================================================
// Scripted adapter (single-peer protocol tests)
// ============================================================================

type SendHandler = Box<dyn Fn(GossipMessage, RemotePeer) + Send + Sync>;

/// Adapter whose inbound channels are fed by the test itself, mirroring the
/// mock-driven protocol tests of the request/response flow. Subscription
/// predicates are deliberately not applied, so tests can feed messages the
/// overlay would normally filter.
pub struct ScriptedAdapter {
    broadcast_rx: Mutex<Option<mpsc::Receiver<GossipMessage>>>,
    broadcast_tx: mpsc::Sender<GossipMessage>,
    direct_rx: Mutex<Option<mpsc::Receiver<Box<dyn ReceivedMessage>>>>,
    direct_tx: mpsc::Sender<Box<dyn ReceivedMessage>>,
    members: Mutex<Vec<NetworkMember>>,
    send_handler: Mutex<Option<SendHandler>>,
    metadata: Mutex<Vec<u8>>,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(HARNESS_CHANNEL_CAPACITY);
        let (direct_tx, direct_rx) = mpsc::channel(HARNESS_CHANNEL_CAPACITY);
        Arc::new(Self {
            broadcast_rx: Mutex::new(Some(broadcast_rx)),
            broadcast_tx,
            direct_rx: Mutex::new(Some(direct_rx)),
            direct_tx,
            members: Mutex::new(Vec::new()),
            send_handler: Mutex::new(None),
            metadata: Mutex::new(Vec::new()),
        })
    }

    /// Sender feeding the provider's broadcast subscription.
    pub fn broadcast_tx(&self) -> mpsc::Sender<GossipMessage> {
        self.broadcast_tx.clone()
    }

    /// Sender feeding the provider's direct subscription.
    pub fn direct_tx(&self) -> mpsc::Sender<Box<dyn ReceivedMessage>> {
        self.direct_tx.clone()
    }

    /// Script the channel membership the provider observes.
    pub fn set_members(&self, members: Vec<NetworkMember>) {
        *self.members.lock() = members;
    }

    /// Intercept directed sends from the provider.
    pub fn on_send(&self, handler: impl Fn(GossipMessage, RemotePeer) + Send + Sync + 'static) {
        *self.send_handler.lock() = Some(Box::new(handler));
    }

    /// Latest metadata the provider published.
    pub fn metadata(&self) -> Vec<u8> {
        self.metadata.lock().clone()
    }
}

impl GossipAdapter for ScriptedAdapter {
    fn accept_broadcast(&self, _predicate: MessagePredicate) -> mpsc::Receiver<GossipMessage> {
        self.broadcast_rx
            .lock()
            .take()
            .expect("broadcast subscription already taken")
    }

    fn accept_direct(
        &self,
        _predicate: MessagePredicate,
    ) -> mpsc::Receiver<Box<dyn ReceivedMessage>> {
        self.direct_rx
            .lock()
            .take()
            .expect("direct subscription already taken")
    }

    fn gossip(&self, _msg: GossipMessage) {}

    fn send(&self, msg: GossipMessage, peer: &RemotePeer) {
        if let Some(handler) = self.send_handler.lock().as_ref() {
            handler(msg, peer.clone());
        }
    }

    fn peers_of_channel(&self, _channel: &ChannelId) -> Vec<NetworkMember> {
        self.members.lock().clone()
    }

    fn update_channel_metadata(&self, metadata: Vec<u8>, _channel: &ChannelId) {
        *self.metadata.lock() = metadata;
    }

    fn join_channel(&self, _join_msg: &JoinChannelMessage, _channel: &ChannelId) {}

    fn close(&self) {}
}

/// A hand-built directed message with a responder closure, for driving the
/// request server without an overlay.
pub struct TestReceivedMessage {
    msg: GossipMessage,
    info: ConnectionInfo,
    responder: Box<dyn Fn(GossipMessage) + Send + Sync>,
}

impl TestReceivedMessage {
    /// Create a message appearing to come from `endpoint`, whose identity is
    /// the endpoint itself.
    pub fn new(
        msg: GossipMessage,
        endpoint: &str,
        responder: impl Fn(GossipMessage) + Send + Sync + 'static,
    ) -> Self {
        Self {
            msg,
            info: ConnectionInfo {
                pki_id: PkiId::from_bytes(endpoint.as_bytes().to_vec()),
                identity: PeerIdentity::from_bytes(endpoint.as_bytes().to_vec()),
                endpoint: endpoint.to_string(),
                auth: Some(AuthInfo {
                    signed_data: b"state-transfer".to_vec(),
                    signature: b"signature".to_vec(),
                }),
            },
            responder: Box::new(responder),
        }
    }

    /// Strip the authentication material, as an unsigned transport would.
    pub fn without_auth(mut self) -> Self {
        self.info.auth = None;
        self
    }
}

impl ReceivedMessage for TestReceivedMessage {
    fn gossip_message(&self) -> &GossipMessage {
        &self.msg
    }

    fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn respond(&self, msg: GossipMessage) {
        (self.responder)(msg);
    }
}

// ============================================================================
// Instrumented collaborators
// ============================================================================

/// In-memory ledger whose height advances with every commit.
pub struct MemoryCommitter {
    blocks: Mutex<BTreeMap<u64, Block>>,
    commit_log: Mutex<Vec<u64>>,
}

impl MemoryCommitter {
    /// Create a ledger holding blocks `0..height`.
    pub fn with_height(height: u64) -> Arc<Self> {
        let mut blocks = BTreeMap::new();
        for seq_num in 0..height {
            blocks.insert(seq_num, Block::new(seq_num, Vec::new()));
        }
        Arc::new(Self {
            blocks: Mutex::new(blocks),
            commit_log: Mutex::new(Vec::new()),
        })
    }

    /// Sequences committed through this ledger, in commit order.
    pub fn committed(&self) -> Vec<u64> {
        self.commit_log.lock().clone()
    }
}

impl Committer for MemoryCommitter {
    fn commit(&self, block: &Block) -> Result<(), LedgerError> {
        self.blocks.lock().insert(block.number(), block.clone());
        self.commit_log.lock().push(block.number());
        Ok(())
    }

    fn ledger_height(&self) -> Result<u64, LedgerError> {
        Ok(self
            .blocks
            .lock()
            .last_key_value()
            .map(|(seq_num, _)| seq_num + 1)
            .unwrap_or(0))
    }

    fn get_blocks(&self, seq_nums: &[u64]) -> Vec<Block> {
        let blocks = self.blocks.lock();
        seq_nums
            .iter()
            .filter_map(|seq_num| blocks.get(seq_num).cloned())
            .collect()
    }

    fn close(&self) {}
}

/// Ledger double that records commits but keeps reporting a fixed height,
/// like a ledger whose height query is frozen for the test.
pub struct FixedHeightCommitter {
    height: u64,
    commit_log: Mutex<Vec<u64>>,
}

impl FixedHeightCommitter {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            height,
            commit_log: Mutex::new(Vec::new()),
        })
    }

    pub fn committed(&self) -> Vec<u64> {
        self.commit_log.lock().clone()
    }
}

impl Committer for FixedHeightCommitter {
    fn commit(&self, block: &Block) -> Result<(), LedgerError> {
        self.commit_log.lock().push(block.number());
        Ok(())
    }

    fn ledger_height(&self) -> Result<u64, LedgerError> {
        Ok(self.height)
    }

    fn get_blocks(&self, _seq_nums: &[u64]) -> Vec<Block> {
        Vec::new()
    }

    fn close(&self) {}
}

/// Coordinator double serving scripted blocks and recording every call.
pub struct MockCoordinator {
    height: u64,
    data: Mutex<HashMap<u64, (Block, PvtDataCollections)>>,
    fetch_log: Mutex<Vec<u64>>,
    store_log: Mutex<Vec<(Block, PvtDataCollections)>>,
    store_tx: Mutex<Option<mpsc::UnboundedSender<u64>>>,
}

impl MockCoordinator {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            height,
            data: Mutex::new(HashMap::new()),
            fetch_log: Mutex::new(Vec::new()),
            store_log: Mutex::new(Vec::new()),
            store_tx: Mutex::new(None),
        })
    }

    /// Script the block (and private data) served for `seq_num`.
    pub fn provide(&self, seq_num: u64, block: Block, pvt_data: PvtDataCollections) {
        self.data.lock().insert(seq_num, (block, pvt_data));
    }

    /// Receive the sequence of every `store_block` call.
    pub fn on_store(&self) -> mpsc::UnboundedReceiver<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.store_tx.lock() = Some(tx);
        rx
    }

    /// Sequences fetched through the read path.
    pub fn fetches(&self) -> Vec<u64> {
        self.fetch_log.lock().clone()
    }

    /// Blocks stored, in order.
    pub fn stores(&self) -> Vec<(Block, PvtDataCollections)> {
        self.store_log.lock().clone()
    }
}

impl Coordinator for MockCoordinator {
    fn store_block(
        &self,
        block: Block,
        pvt_data: PvtDataCollections,
    ) -> Result<Vec<String>, CoordinatorError> {
        let seq_num = block.number();
        self.store_log.lock().push((block, pvt_data));
        if let Some(tx) = self.store_tx.lock().as_ref() {
            let _ = tx.send(seq_num);
        }
        Ok(Vec::new())
    }

    fn get_pvt_data_and_block_by_num(
        &self,
        seq_num: u64,
        _filter: &PvtDataFilter,
    ) -> Result<(Block, PvtDataCollections), CoordinatorError> {
        self.fetch_log.lock().push(seq_num);
        self.data
            .lock()
            .get(&seq_num)
            .cloned()
            .ok_or(CoordinatorError::BlockNotFound(seq_num))
    }

    fn get_block_by_num(&self, seq_num: u64) -> Result<Block, CoordinatorError> {
        self.data
            .lock()
            .get(&seq_num)
            .map(|(block, _)| block.clone())
            .ok_or(CoordinatorError::BlockNotFound(seq_num))
    }

    fn ledger_height(&self) -> Result<u64, CoordinatorError> {
        Ok(self.height)
    }

    fn close(&self) {}
}

/// Crypto service whose authorization decision is a plain identity check.
pub struct AcceptorCrypto {
    acceptor: IdentityAcceptor,
}

/// Decides whether an identity may pull blocks.
pub type IdentityAcceptor = Arc<dyn Fn(&PeerIdentity) -> bool + Send + Sync>;

impl AcceptorCrypto {
    pub fn new(acceptor: IdentityAcceptor) -> Arc<Self> {
        Arc::new(Self { acceptor })
    }

    /// Accepts everyone.
    pub fn permissive() -> Arc<Self> {
        Self::new(Arc::new(|_| true))
    }
}

impl MessageCryptoService for AcceptorCrypto {
    fn verify_by_channel(
        &self,
        _channel: &ChannelId,
        identity: &PeerIdentity,
        _signature: &[u8],
        _message: &[u8],
    ) -> Result<(), GossipError> {
        if (self.acceptor)(identity) {
            Ok(())
        } else {
            Err(GossipError::AccessDenied(identity.to_string()))
        }
    }
}

// ============================================================================
// Peer node
// ============================================================================

/// A full peer wired over the loopback overlay: committer, coordinator and
/// state provider, simulating only the gossip and state transfer parts.
pub struct PeerNode {
    pub pki_id: PkiId,
    pub endpoint: String,
    pub adapter: Arc<LoopbackAdapter>,
    pub committer: Arc<MemoryCommitter>,
    pub provider: GossipStateProvider,
}

impl PeerNode {
    /// Start peer `id` with a ledger of `height` blocks.
    pub fn start(
        network: &LoopbackNetwork,
        id: usize,
        height: u64,
        acceptor: IdentityAcceptor,
    ) -> Self {
        let adapter = network.register(id);
        let committer = MemoryCommitter::with_height(height);
        let provider = GossipStateProvider::new(
            test_channel(),
            ServicesMediator {
                adapter: adapter.clone(),
                crypto: AcceptorCrypto::new(acceptor),
            },
            Arc::new(LedgerCoordinator::new(committer.clone())),
            test_config(),
        )
        .expect("state provider failed to start");
        Self {
            pki_id: adapter.pki_id().clone(),
            endpoint: adapter.endpoint().to_string(),
            adapter,
            committer,
            provider,
        }
    }

    /// Current ledger height.
    pub fn ledger_height(&self) -> u64 {
        self.committer.ledger_height().expect("height query")
    }

    /// Stop the provider and leave the overlay.
    pub async fn shutdown(self) {
        self.provider.stop().await;
        self.adapter.close();
    }
}
