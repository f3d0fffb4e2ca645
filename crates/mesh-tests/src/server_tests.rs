//! State request server tests: authorization, clamping, round trips.

use crate::generators::{linked_block, single_collection_pvt_data};
use crate::harness::{
    test_channel, test_config, wait_until, AcceptorCrypto, MemoryCommitter, MockCoordinator,
    ScriptedAdapter, TestReceivedMessage,
};
use mesh_proto::{Block, GossipMessage, PvtDataCollections};
use mesh_state::{Coordinator, GossipStateProvider, LedgerCoordinator, ServicesMediator};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn provider_with(
    adapter: &Arc<ScriptedAdapter>,
    coordinator: Arc<MockCoordinator>,
    crypto: Arc<AcceptorCrypto>,
) -> GossipStateProvider {
    GossipStateProvider::new(
        test_channel(),
        ServicesMediator {
            adapter: adapter.clone(),
            crypto,
        },
        coordinator,
        test_config(),
    )
    .unwrap()
}

fn captured() -> (Arc<Mutex<Vec<GossipMessage>>>, impl Fn(GossipMessage) + Send + Sync) {
    let responses: Arc<Mutex<Vec<GossipMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = responses.clone();
    (responses, move |msg| sink.lock().push(msg))
}

#[tokio::test]
async fn test_state_request_round_trip_with_private_data() {
    let adapter = ScriptedAdapter::new();
    let coordinator = MockCoordinator::new(5);

    let block2 = linked_block(2, vec![0, 0, 0, 1], vec![0, 1, 1, 1], vec![vec![1], vec![2], vec![3]]);
    let pvt2 = single_collection_pvt_data(0, "myCC:v1", "mySecretCollection", vec![1, 2, 3, 4, 5]);
    let block3 = linked_block(3, vec![0, 1, 1, 1], vec![1, 1, 1, 1], vec![vec![4], vec![5], vec![6]]);
    let pvt3 = single_collection_pvt_data(2, "otherCC:v1", "topClassified", vec![0, 0, 0, 4, 2]);
    coordinator.provide(2, block2.clone(), pvt2.clone());
    coordinator.provide(3, block3.clone(), pvt3.clone());

    let provider = provider_with(&adapter, coordinator.clone(), AcceptorCrypto::permissive());

    let (responses, sink) = captured();
    let request = GossipMessage::state_request(test_channel(), 1, 2, 3);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            request,
            "localhost:5611",
            sink,
        )))
        .await
        .unwrap();

    assert!(
        wait_until(|| !responses.lock().is_empty(), Duration::from_secs(10)).await,
        "the server should respond"
    );

    let response = responses.lock()[0].clone();
    assert_eq!(response.nonce, 1);
    let body = response.state_response_body().unwrap();
    assert_eq!(body.payloads.len(), 2);

    for payload in &body.payloads {
        let block = Block::decode(&payload.data).unwrap();
        let (expected_block, expected_pvt) = match block.number() {
            2 => (&block2, &pvt2),
            3 => (&block3, &pvt3),
            other => panic!("unexpected block {} in response", other),
        };
        assert_eq!(&block, expected_block);
        let pvt_data = PvtDataCollections::unmarshal(&payload.private_data).unwrap();
        assert_eq!(&pvt_data, expected_pvt);
    }

    provider.stop().await;
}

#[tokio::test]
async fn test_round_trip_serves_private_data_stored_through_ledger_coordinator() {
    // Same round trip over the shipped coordinator: collections stored with
    // the block must come back to an authorized requester.
    let adapter = ScriptedAdapter::new();
    let coordinator = Arc::new(LedgerCoordinator::new(MemoryCommitter::with_height(2)));

    let block = linked_block(2, vec![0, 0, 0, 1], vec![0, 1, 1, 1], vec![vec![1]]);
    let pvt_data = single_collection_pvt_data(0, "myCC:v1", "mySecretCollection", vec![1, 2, 3, 4, 5]);
    coordinator
        .store_block(block.clone(), pvt_data.clone())
        .unwrap();

    let provider = GossipStateProvider::new(
        test_channel(),
        ServicesMediator {
            adapter: adapter.clone(),
            crypto: AcceptorCrypto::permissive(),
        },
        coordinator,
        test_config(),
    )
    .unwrap();

    let (responses, sink) = captured();
    let request = GossipMessage::state_request(test_channel(), 4, 2, 2);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            request,
            "localhost:5611",
            sink,
        )))
        .await
        .unwrap();

    assert!(wait_until(|| !responses.lock().is_empty(), Duration::from_secs(10)).await);
    let response = responses.lock()[0].clone();
    let body = response.state_response_body().unwrap();
    assert_eq!(body.payloads.len(), 1);
    assert_eq!(Block::decode(&body.payloads[0].data).unwrap(), block);
    assert_eq!(
        PvtDataCollections::unmarshal(&body.payloads[0].private_data).unwrap(),
        pvt_data
    );

    provider.stop().await;
}

#[tokio::test]
async fn test_inverted_range_yields_empty_response() {
    let adapter = ScriptedAdapter::new();
    let coordinator = MockCoordinator::new(1);
    let provider = provider_with(&adapter, coordinator.clone(), AcceptorCrypto::permissive());

    let (responses, sink) = captured();
    let request = GossipMessage::state_request(test_channel(), 7, 10, 8);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            request,
            "localhost:5611",
            sink,
        )))
        .await
        .unwrap();

    assert!(wait_until(|| !responses.lock().is_empty(), Duration::from_secs(10)).await);
    let response = responses.lock()[0].clone();
    assert_eq!(response.nonce, 7);
    assert!(response.state_response_body().unwrap().payloads.is_empty());
    assert!(coordinator.fetches().is_empty());

    provider.stop().await;
}

#[tokio::test]
async fn test_range_is_clamped_to_batch_size_and_height() {
    let adapter = ScriptedAdapter::new();
    let coordinator = MockCoordinator::new(100);
    for seq_num in 1..=20 {
        coordinator.provide(seq_num, Block::new(seq_num, Vec::new()), PvtDataCollections::empty());
    }
    let provider = provider_with(&adapter, coordinator.clone(), AcceptorCrypto::permissive());

    let (responses, sink) = captured();
    let batch_size = test_config().anti_entropy_batch_size;
    let request = GossipMessage::state_request(test_channel(), 3, 1, 50);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            request,
            "localhost:5611",
            sink,
        )))
        .await
        .unwrap();

    assert!(wait_until(|| !responses.lock().is_empty(), Duration::from_secs(10)).await);
    let response = responses.lock()[0].clone();
    let body = response.state_response_body().unwrap();
    assert_eq!(body.payloads.len(), batch_size as usize);
    let served: Vec<u64> = body.payloads.iter().map(|p| p.seq_num).collect();
    assert_eq!(served, (1..=batch_size).collect::<Vec<_>>());

    provider.stop().await;
}

#[tokio::test]
async fn test_missing_blocks_are_omitted_from_response() {
    let adapter = ScriptedAdapter::new();
    let coordinator = MockCoordinator::new(10);
    // Only blocks 2 and 4 exist locally
    coordinator.provide(2, Block::new(2, Vec::new()), PvtDataCollections::empty());
    coordinator.provide(4, Block::new(4, Vec::new()), PvtDataCollections::empty());
    let provider = provider_with(&adapter, coordinator.clone(), AcceptorCrypto::permissive());

    let (responses, sink) = captured();
    let request = GossipMessage::state_request(test_channel(), 5, 2, 4);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            request,
            "localhost:5611",
            sink,
        )))
        .await
        .unwrap();

    assert!(wait_until(|| !responses.lock().is_empty(), Duration::from_secs(10)).await);
    let response = responses.lock()[0].clone();
    let served: Vec<u64> = response
        .state_response_body()
        .unwrap()
        .payloads
        .iter()
        .map(|p| p.seq_num)
        .collect();
    assert_eq!(served, vec![2, 4]);

    provider.stop().await;
}

#[tokio::test]
async fn test_unauthorized_request_is_dropped_before_any_fetch() {
    let adapter = ScriptedAdapter::new();
    let coordinator = MockCoordinator::new(5);
    coordinator.provide(2, Block::new(2, Vec::new()), PvtDataCollections::empty());
    let crypto = AcceptorCrypto::new(Arc::new(|identity| {
        identity.to_string() == "localhost:5610"
    }));
    let provider = provider_with(&adapter, coordinator.clone(), crypto);

    let (responses, sink) = captured();
    let request = GossipMessage::state_request(test_channel(), 1, 2, 3);
    adapter
        .direct_tx()
        .send(Box::new(TestReceivedMessage::new(
            request,
            "localhost:9999",
            sink,
        )))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    // Denial is silent and nothing was read from the ledger
    assert!(responses.lock().is_empty());
    assert!(coordinator.fetches().is_empty());

    provider.stop().await;
}

#[tokio::test]
async fn test_request_without_auth_material_is_dropped() {
    let adapter = ScriptedAdapter::new();
    let coordinator = MockCoordinator::new(5);
    let provider = provider_with(&adapter, coordinator.clone(), AcceptorCrypto::permissive());

    let (responses, sink) = captured();
    let request = GossipMessage::state_request(test_channel(), 1, 2, 3);
    adapter
        .direct_tx()
        .send(Box::new(
            TestReceivedMessage::new(request, "localhost:5611", sink).without_auth(),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(responses.lock().is_empty());
    assert!(coordinator.fetches().is_empty());

    provider.stop().await;
}
