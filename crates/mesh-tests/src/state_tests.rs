//! State provider tests: buffering, delivery and channel scoping.

use crate::generators::{block_payload, raw_block};
use crate::harness::{
    test_channel, test_config, wait_until, AcceptorCrypto, FixedHeightCommitter, LoopbackNetwork,
    MemoryCommitter, PeerNode, ScriptedAdapter, TestReceivedMessage,
};
use mesh_gossip::{AnchorPeer, GossipAdapter};
use mesh_proto::{Block, ChannelId, GossipMessage, PvtDataCollections};
use mesh_state::{
    ChannelConfiguration, Committer, ConfigEventer, Coordinator, CoordinatorError,
    GossipStateProvider, JoinChannelReceiver, LedgerCoordinator, NodeMetastate, PvtDataFilter,
    ServicesMediator,
};
use std::collections::BTreeMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn scripted_services(adapter: &Arc<ScriptedAdapter>) -> ServicesMediator {
    ServicesMediator {
        adapter: adapter.clone(),
        crypto: AcceptorCrypto::permissive(),
    }
}

#[tokio::test]
async fn test_over_population() {
    // Blocks ahead of the window must be rejected while gaps inside the
    // window are tolerated, and only the contiguous prefix is committed.
    let adapter = ScriptedAdapter::new();
    let committer = FixedHeightCommitter::new(1);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer.clone())),
        test_config(),
    )
    .unwrap();

    let max_distance = test_config().max_block_distance;

    // Sequential prefix is accepted
    for seq_num in 1..=4u64 {
        provider.add_payload(block_payload(seq_num)).unwrap();
    }

    // A gap of [5, 9] does not block acceptance inside the window
    for seq_num in 10..=max_distance {
        provider.add_payload(block_payload(seq_num)).unwrap();
    }

    // Everything past the window is rejected
    for seq_num in (max_distance + 1)..=(max_distance * 10) {
        assert!(
            provider.add_payload(block_payload(seq_num)).is_err(),
            "sequence {} should have been rejected",
            seq_num
        );
    }

    assert!(
        wait_until(|| committer.committed().len() == 4, Duration::from_secs(10)).await,
        "expected the contiguous prefix to commit"
    );
    // Give the deliver loop a chance to (incorrectly) commit more
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(committer.committed(), vec![1, 2, 3, 4]);
    assert!(provider.buffer_size() < max_distance as usize);

    provider.stop().await;
}

#[tokio::test]
async fn test_wrong_channel_messages_are_dropped() {
    let adapter = ScriptedAdapter::new();
    let committer = MemoryCommitter::with_height(1);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer.clone())),
        test_config(),
    )
    .unwrap();

    let broadcast = adapter.broadcast_tx();
    broadcast
        .send(GossipMessage::data_msg(
            ChannelId::new("AAA"),
            block_payload(1),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        committer.committed().is_empty(),
        "a wrong-channel payload must not commit"
    );

    broadcast
        .send(GossipMessage::data_msg(test_channel(), block_payload(1)))
        .await
        .unwrap();

    assert!(
        wait_until(|| committer.committed() == vec![1], Duration::from_secs(10)).await,
        "the same payload on the right channel must commit"
    );

    provider.stop().await;
}

#[tokio::test]
async fn test_commit_order_is_contiguous_regardless_of_arrival_order() {
    let adapter = ScriptedAdapter::new();
    let committer = MemoryCommitter::with_height(1);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer.clone())),
        test_config(),
    )
    .unwrap();

    // Arrivals shuffled and duplicated
    for seq_num in [4u64, 2, 7, 1, 3, 2, 6, 5, 7, 8] {
        let _ = provider.add_payload(block_payload(seq_num));
    }

    assert!(
        wait_until(|| committer.committed().len() == 8, Duration::from_secs(10)).await,
        "all blocks should commit once the gaps close"
    );
    assert_eq!(committer.committed(), (1..=8).collect::<Vec<_>>());

    provider.stop().await;
}

#[tokio::test]
async fn test_response_with_unknown_nonce_is_discarded() {
    let adapter = ScriptedAdapter::new();
    let committer = MemoryCommitter::with_height(1);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer.clone())),
        test_config(),
    )
    .unwrap();

    let response = GossipMessage::state_response(test_channel(), 999, vec![block_payload(1)]);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            response,
            "localhost:5611",
            |_| {},
        )))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(committer.committed().is_empty());
    assert_eq!(provider.stats().responses_received, 0);

    provider.stop().await;
}

#[tokio::test]
async fn test_metastate_refreshed_after_commit() {
    let adapter = ScriptedAdapter::new();
    let committer = MemoryCommitter::with_height(1);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer.clone())),
        test_config(),
    )
    .unwrap();

    // The starting height is advertised right away
    let metastate = NodeMetastate::from_bytes(&adapter.metadata()).unwrap();
    assert_eq!(metastate.ledger_height, 1);

    provider.add_payload(block_payload(1)).unwrap();

    assert!(
        wait_until(
            || {
                NodeMetastate::from_bytes(&adapter.metadata())
                    .map(|m| m.ledger_height == 2)
                    .unwrap_or(false)
            },
            Duration::from_secs(10)
        )
        .await,
        "commit should refresh the advertised height"
    );

    provider.stop().await;
}

/// Coordinator whose commits always fail.
struct RejectingCoordinator {
    height: u64,
}

impl Coordinator for RejectingCoordinator {
    fn store_block(
        &self,
        block: Block,
        _pvt_data: PvtDataCollections,
    ) -> Result<Vec<String>, CoordinatorError> {
        Err(CoordinatorError::Ledger(mesh_state::LedgerError(format!(
            "rejecting block {}",
            block.number()
        ))))
    }

    fn get_pvt_data_and_block_by_num(
        &self,
        seq_num: u64,
        _filter: &PvtDataFilter,
    ) -> Result<(Block, PvtDataCollections), CoordinatorError> {
        Err(CoordinatorError::BlockNotFound(seq_num))
    }

    fn get_block_by_num(&self, seq_num: u64) -> Result<Block, CoordinatorError> {
        Err(CoordinatorError::BlockNotFound(seq_num))
    }

    fn ledger_height(&self) -> Result<u64, CoordinatorError> {
        Ok(self.height)
    }

    fn close(&self) {}
}

#[tokio::test]
async fn test_commit_failure_hook_observes_rejected_block() {
    let adapter = ScriptedAdapter::new();
    let observed: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let hook_log = observed.clone();

    let provider = GossipStateProvider::with_commit_failure_hook(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(RejectingCoordinator { height: 1 }),
        test_config(),
        Arc::new(move |seq_num, error| {
            hook_log.lock().push((seq_num, error.to_string()));
        }),
    )
    .unwrap();

    provider.add_payload(block_payload(1)).unwrap();

    assert!(
        wait_until(|| !observed.lock().is_empty(), Duration::from_secs(10)).await,
        "the hook should observe the failed commit"
    );
    let (seq_num, error) = observed.lock()[0].clone();
    assert_eq!(seq_num, 1);
    assert!(error.contains("rejecting block 1"));

    provider.stop().await;
}

#[tokio::test]
async fn test_get_block_reads_through_coordinator() {
    let adapter = ScriptedAdapter::new();
    let committer = MemoryCommitter::with_height(3);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer)),
        test_config(),
    )
    .unwrap();

    assert_eq!(provider.get_block(2).map(|b| b.number()), Some(2));
    assert!(provider.get_block(7).is_none());

    provider.stop().await;

    // After stop, reads report nothing
    assert!(provider.get_block(2).is_none());
}

#[tokio::test]
async fn test_gossip_broadcast_replicates_to_overlay_peers() {
    let network = LoopbackNetwork::new();
    let sender = PeerNode::start(&network, 0, 1, Arc::new(|_| true));
    let receiver = PeerNode::start(&network, 1, 1, Arc::new(|_| true));

    sender
        .adapter
        .gossip(GossipMessage::data_msg(test_channel(), block_payload(1)));

    assert!(
        wait_until(
            || receiver.committer.committed() == vec![1],
            Duration::from_secs(10)
        )
        .await,
        "a broadcast block should reach the other peer"
    );

    receiver.shutdown().await;
    sender.shutdown().await;
}

#[tokio::test]
async fn test_config_update_rejoins_channel_with_new_anchors() {
    let network = LoopbackNetwork::new();
    let adapter = network.register(0);
    let eventer = ConfigEventer::new(Arc::new(JoinChannelReceiver::new(adapter.clone())));

    let mut organizations = BTreeMap::new();
    organizations.insert(
        "org1".to_string(),
        vec![AnchorPeer {
            host: "peer0".to_string(),
            port: 7051,
        }],
    );
    let config = ChannelConfiguration {
        channel: test_channel(),
        sequence: 3,
        organizations,
    };

    eventer.process_config_update(&config);
    // Replaying the same configuration must not re-join
    eventer.process_config_update(&config);

    let joins = network.joins_of(adapter.pki_id());
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].sequence_number, 3);
    assert_eq!(joins[0].anchor_peers[0].host, "peer0");
}

#[tokio::test]
async fn test_gossiped_payload_reaches_committer() {
    let adapter = ScriptedAdapter::new();
    let committer = MemoryCommitter::with_height(1);
    let provider = GossipStateProvider::new(
        test_channel(),
        scripted_services(&adapter),
        Arc::new(LedgerCoordinator::new(committer.clone())),
        test_config(),
    )
    .unwrap();

    adapter
        .broadcast_tx()
        .send(GossipMessage::data_msg(test_channel(), block_payload(1)))
        .await
        .unwrap();

    assert!(
        wait_until(|| committer.committed() == vec![1], Duration::from_secs(10)).await,
        "a gossiped block should commit"
    );
    let block = raw_block(1);
    assert_eq!(committer.get_blocks(&[1]), vec![block]);

    provider.stop().await;
}
