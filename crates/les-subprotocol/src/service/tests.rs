//! Handler state machine tests against the in-memory adapters.

use super::*;
use crate::adapters::{InMemoryKVStore, KvChainStore, RecordingTransport};
use crate::domain::{
    AnnounceMessage, BlockHeaderQuery, Direction, GetBlockBodiesMessage, GetBlockHeadersMessage,
    GetReceiptsMessage, HandshakeRejection, HeaderOrigin,
};
use shared_types::{
    Block, BlockBody, ChainStoreError, Hash, Transaction, TransactionReceipt, H256, U256,
};

type TestHandler = LesSubProtocolHandler<RecordingTransport, KvChainStore<InMemoryKVStore>>;

struct Fixture {
    handler: TestHandler,
    transport: Arc<RecordingTransport>,
    chain: Arc<KvChainStore<InMemoryKVStore>>,
    blocks: Vec<Block>,
}

fn block(number: u64, parent: Hash) -> Block {
    let header = BlockHeader {
        parent_hash: parent,
        number: U256::from(number),
        difficulty: U256::from(100),
        timestamp: 1_000 + number,
        ..Default::default()
    };
    let body = BlockBody {
        transactions: vec![Transaction {
            nonce: U256::from(number),
            value: U256::from(1),
            v: 27,
            ..Default::default()
        }],
        ommers: vec![],
    };
    Block::new(header, body)
}

/// Handler over a canonical chain of `len` blocks.
async fn fixture_with(config: LesConfig, len: u64) -> Fixture {
    let genesis = block(0, H256::zero());
    let chain = KvChainStore::init(InMemoryKVStore::new(), &genesis).await.unwrap();
    let mut blocks = vec![genesis];
    for n in 1..len {
        let next = block(n, blocks[n as usize - 1].hash());
        chain.store_block(&next).await.unwrap();
        blocks.push(next);
    }

    let transport = Arc::new(RecordingTransport::new());
    let chain = Arc::new(chain);
    let handler = LesSubProtocolHandler::new(config, Arc::clone(&transport), Arc::clone(&chain));
    Fixture {
        handler,
        transport,
        chain,
        blocks,
    }
}

async fn fixture() -> Fixture {
    fixture_with(LesConfig::for_testing(), 1).await
}

fn peer_status(genesis_hash: Hash) -> StatusMessage {
    StatusMessage {
        protocol_version: 2,
        network_id: 1,
        head_td: U256::from(23),
        head_hash: H256::repeat_byte(0x5a),
        head_number: U256::from(3443),
        genesis_hash,
        serve_headers: true,
        serve_chain_since: Some(U256::from(333)),
        serve_state_since: Some(U256::from(453)),
        tx_relay: true,
        flow_control_buffer_limit: U256::from(3),
        flow_control_maximum_request_cost_table: U256::from(4),
        flow_control_minimum_rate_of_recharge: U256::from(5),
        announce_type: 0,
    }
}

fn random_hash() -> Hash {
    H256::from(rand::random::<[u8; 32]>())
}

fn id(s: &str) -> ConnectionId {
    ConnectionId::from(s)
}

impl Fixture {
    fn genesis_hash(&self) -> Hash {
        self.blocks[0].hash()
    }

    async fn send(&self, connection: &str, message: LesMessage) -> Result<(), LesError> {
        self.handler
            .handle(&id(connection), message.code(), &codec::encode(&message))
            .await
    }

    /// Connect and complete the handshake.
    async fn ready(&self, connection: &str) {
        self.handler
            .handle_new_peer_connection(&id(connection))
            .await
            .unwrap();
        self.send(connection, LesMessage::Status(peer_status(self.genesis_hash())))
            .await
            .unwrap();
    }

    fn last_reply(&self, connection: &str) -> LesMessage {
        self.transport
            .last_sent(&id(connection))
            .expect("no reply sent")
            .decode()
            .unwrap()
    }

    fn assert_breach(&self, connection: &str, result: Result<(), LesError>) -> BreachKind {
        assert_eq!(
            self.transport.disconnects(),
            vec![(id(connection), DisconnectReason::BreachOfProtocol)]
        );
        match result {
            Err(LesError::ProtocolBreach { connection_id, kind }) => {
                assert_eq!(connection_id, id(connection));
                kind
            }
            other => panic!("expected protocol breach, got {:?}", other),
        }
    }
}

fn headers_request(request_id: u64, origin: HeaderOrigin, max: u64, skip: u64, direction: Direction) -> LesMessage {
    LesMessage::GetBlockHeaders(GetBlockHeadersMessage {
        request_id,
        query: BlockHeaderQuery {
            origin,
            max_headers: max,
            skip,
            direction,
        },
    })
}

// =============================================================================
// TEST GROUP 1: New connections
// =============================================================================

#[tokio::test]
async fn test_new_connection_sends_status() {
    let f = fixture_with(LesConfig::default(), 1).await;
    f.handler.handle_new_peer_connection(&id("abc")).await.unwrap();

    let sent = f.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].protocol, SubProtocolIdentifier::new("les", 2));
    assert_eq!(sent[0].message_type, MessageType::Status.code());

    let LesMessage::Status(status) = sent[0].decode().unwrap() else {
        panic!("expected status");
    };
    assert_eq!(status.protocol_version, 2);
    assert_eq!(status.flow_control_buffer_limit, U256::zero());
    assert_eq!(status.genesis_hash, f.blocks[0].header.hash());
    assert_eq!(status.head_hash, f.genesis_hash());
    assert_eq!(status.head_td, U256::from(100));
    assert!(!status.serve_headers);

    assert_eq!(f.handler.connection_phase(&id("abc")).await, Some(Phase::AwaitingStatus));
}

#[tokio::test]
async fn test_status_reflects_chain_head_and_config() {
    let f = fixture_with(LesConfig::for_testing(), 4).await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();

    let LesMessage::Status(status) = f.last_reply("a") else {
        panic!("expected status");
    };
    assert_eq!(status.head_number, U256::from(3));
    assert_eq!(status.head_hash, f.blocks[3].hash());
    assert_eq!(status.head_td, U256::from(400));
    assert!(status.serve_headers);
    assert_eq!(status.flow_control_buffer_limit, U256::from(1_000));
    assert_eq!(status.flow_control_maximum_request_cost_table, U256::from(100));
}

#[tokio::test]
async fn test_duplicate_new_connection_rejected() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();
    let result = f.handler.handle_new_peer_connection(&id("a")).await;

    assert_eq!(result, Err(LesError::DuplicateConnection(id("a"))));
    assert_eq!(f.transport.sent().len(), 1);
    assert_eq!(f.handler.connection_count(), 1);
}

#[tokio::test]
async fn test_status_send_failure_untracks_connection() {
    let f = fixture().await;
    f.transport.set_fail_sends(true);

    let result = f.handler.handle_new_peer_connection(&id("a")).await;
    assert!(matches!(result, Err(LesError::Transport(_))));
    assert!(!f.handler.is_tracked(&id("a")));
}

#[tokio::test]
async fn test_uninitialized_chain_fails_new_connection() {
    let chain = Arc::new(KvChainStore::new(InMemoryKVStore::new()));
    let transport = Arc::new(RecordingTransport::new());
    let handler = LesSubProtocolHandler::new(LesConfig::default(), Arc::clone(&transport), chain);

    let result = handler.handle_new_peer_connection(&id("a")).await;
    assert_eq!(
        result,
        Err(LesError::ChainStore(ChainStoreError::NotInitialized))
    );
    assert!(transport.sent().is_empty());
    assert_eq!(handler.connection_count(), 0);
}

// =============================================================================
// TEST GROUP 2: Handshake
// =============================================================================

#[tokio::test]
async fn test_valid_status_completes_handshake() {
    let f = fixture().await;
    f.ready("a").await;

    let state = f.handler.connection_state(&id("a")).await.unwrap();
    assert_eq!(state.phase, Phase::Ready);
    assert_eq!(state.peer_protocol_version(), Some(2));
    assert_eq!(state.peer_genesis_hash(), Some(f.genesis_hash()));
    assert_eq!(state.peer_head.map(|h| h.number), Some(U256::from(3443)));
    // Our Status is the only thing sent
    assert_eq!(f.transport.sent().len(), 1);
}

#[tokio::test]
async fn test_second_status_is_breach() {
    let f = fixture().await;
    f.ready("abc").await;

    let result = f
        .send("abc", LesMessage::Status(peer_status(f.genesis_hash())))
        .await;

    assert_eq!(f.assert_breach("abc", result), BreachKind::DuplicateStatus);
    assert_eq!(f.handler.connection_phase(&id("abc")).await, Some(Phase::Closed));
}

#[tokio::test]
async fn test_second_status_breach_even_if_garbage() {
    let f = fixture().await;
    f.ready("a").await;

    let result = f.handler.handle(&id("a"), 0, &[0xff, 0x00]).await;
    assert_eq!(f.assert_breach("a", result), BreachKind::DuplicateStatus);
}

#[tokio::test]
async fn test_request_before_status_is_breach() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();

    let request = headers_request(1, HeaderOrigin::Number(0), 1, 0, Direction::Forwards);
    let result = f.send("a", request).await;

    assert_eq!(f.assert_breach("a", result), BreachKind::MessageBeforeStatus(2));
    // Nothing was served
    assert_eq!(f.transport.sent().len(), 1);
}

#[tokio::test]
async fn test_random_bytes_before_status_is_breach() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();

    let result = f.handler.handle(&id("a"), 2, &[0x13, 0x37]).await;
    assert_eq!(f.assert_breach("a", result), BreachKind::MessageBeforeStatus(2));
}

#[tokio::test]
async fn test_genesis_mismatch_is_breach() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();

    let result = f
        .send("a", LesMessage::Status(peer_status(H256::repeat_byte(0x99))))
        .await;
    assert_eq!(
        f.assert_breach("a", result),
        BreachKind::StatusRejected(HandshakeRejection::GenesisMismatch)
    );
}

#[tokio::test]
async fn test_network_mismatch_is_breach() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();

    let mut status = peer_status(f.genesis_hash());
    status.network_id = 3;
    let result = f.send("a", LesMessage::Status(status)).await;
    assert_eq!(
        f.assert_breach("a", result),
        BreachKind::StatusRejected(HandshakeRejection::NetworkIdMismatch { ours: 1, theirs: 3 })
    );
}

#[tokio::test]
async fn test_version_mismatch_is_breach() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();

    let mut status = peer_status(f.genesis_hash());
    status.protocol_version = 1;
    let result = f.send("a", LesMessage::Status(status)).await;
    assert!(matches!(
        f.assert_breach("a", result),
        BreachKind::StatusRejected(HandshakeRejection::ProtocolVersionMismatch { .. })
    ));
}

#[tokio::test]
async fn test_closed_connection_rejects_messages() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();
    let _ = f.handler.handle(&id("a"), 3, &[0xc0]).await;

    let result = f
        .send("a", LesMessage::Status(peer_status(f.genesis_hash())))
        .await;
    assert_eq!(result, Err(LesError::ConnectionClosed(id("a"))));
    // Still exactly one disconnect
    assert_eq!(f.transport.disconnects().len(), 1);
}

// =============================================================================
// TEST GROUP 3: Serving requests
// =============================================================================

#[tokio::test]
async fn test_unknown_anchor_replies_empty_headers() {
    let f = fixture().await;
    f.ready("abc").await;

    let request = headers_request(1, HeaderOrigin::Hash(random_hash()), 3, 0, Direction::Backwards);
    f.send("abc", request).await.unwrap();

    let LesMessage::BlockHeaders(reply) = f.last_reply("abc") else {
        panic!("expected block headers");
    };
    assert_eq!(reply.request_id, 1);
    assert!(reply.headers.is_empty());
}

#[tokio::test]
async fn test_headers_served_backwards_from_hash() {
    let f = fixture_with(LesConfig::for_testing(), 8).await;
    f.ready("a").await;

    let request = headers_request(7, HeaderOrigin::Hash(f.blocks[7].hash()), 3, 1, Direction::Backwards);
    f.send("a", request).await.unwrap();

    let LesMessage::BlockHeaders(reply) = f.last_reply("a") else {
        panic!("expected block headers");
    };
    let numbers: Vec<u64> = reply.headers.iter().map(|h| h.number.as_u64()).collect();
    assert_eq!(numbers, vec![7, 5, 3]);
    assert_eq!(reply.headers[0], f.blocks[7].header);
}

#[tokio::test]
async fn test_headers_capped_by_config() {
    let f = fixture_with(LesConfig::for_testing(), 40).await;
    f.ready("a").await;

    let request = headers_request(1, HeaderOrigin::Number(0), 1_000, 0, Direction::Forwards);
    f.send("a", request).await.unwrap();

    let LesMessage::BlockHeaders(reply) = f.last_reply("a") else {
        panic!("expected block headers");
    };
    assert_eq!(reply.headers.len() as u64, f.handler.config().max_headers_per_request);
}

#[tokio::test]
async fn test_buffer_value_drains_per_request() {
    let f = fixture().await;
    f.ready("a").await;

    let mut values = Vec::new();
    for request_id in 0..3 {
        let request = headers_request(request_id, HeaderOrigin::Number(0), 1, 0, Direction::Forwards);
        f.send("a", request).await.unwrap();
        let LesMessage::BlockHeaders(reply) = f.last_reply("a") else {
            panic!("expected block headers");
        };
        values.push(reply.buffer_value);
    }
    // MRR is zero in the testing config, so nothing recharges
    assert_eq!(values, vec![U256::from(900), U256::from(800), U256::from(700)]);
}

#[tokio::test]
async fn test_serves_even_when_not_advertising() {
    let f = fixture_with(LesConfig::default(), 2).await;
    f.ready("a").await;

    let request = headers_request(5, HeaderOrigin::Number(1), 1, 0, Direction::Forwards);
    f.send("a", request).await.unwrap();

    let LesMessage::BlockHeaders(reply) = f.last_reply("a") else {
        panic!("expected block headers");
    };
    assert_eq!(reply.headers, vec![f.blocks[1].header.clone()]);
    assert_eq!(reply.buffer_value, U256::zero());
}

#[tokio::test]
async fn test_bodies_served_and_misses_omitted() {
    let f = fixture_with(LesConfig::for_testing(), 3).await;
    f.ready("a").await;

    let request = LesMessage::GetBlockBodies(GetBlockBodiesMessage {
        request_id: 9,
        hashes: vec![f.blocks[2].hash(), random_hash(), f.blocks[1].hash()],
    });
    f.send("a", request).await.unwrap();

    let LesMessage::BlockBodies(reply) = f.last_reply("a") else {
        panic!("expected block bodies");
    };
    assert_eq!(reply.request_id, 9);
    assert_eq!(reply.bodies, vec![f.blocks[2].body.clone(), f.blocks[1].body.clone()]);
}

#[tokio::test]
async fn test_unknown_bodies_reply_empty() {
    let f = fixture().await;
    f.ready("a").await;

    let request = LesMessage::GetBlockBodies(GetBlockBodiesMessage {
        request_id: 1,
        hashes: vec![random_hash()],
    });
    f.send("a", request).await.unwrap();

    let LesMessage::BlockBodies(reply) = f.last_reply("a") else {
        panic!("expected block bodies");
    };
    assert!(reply.bodies.is_empty());
}

#[tokio::test]
async fn test_receipts_served() {
    let f = fixture().await;
    let receipts = vec![TransactionReceipt {
        state_root_or_status: vec![1],
        cumulative_gas_used: U256::from(21_000),
        ..Default::default()
    }];
    f.chain
        .store_transaction_receipts(&f.genesis_hash(), &receipts)
        .await
        .unwrap();
    f.ready("a").await;

    let request = LesMessage::GetReceipts(GetReceiptsMessage {
        request_id: 4,
        hashes: vec![random_hash(), f.genesis_hash()],
    });
    f.send("a", request).await.unwrap();

    let LesMessage::Receipts(reply) = f.last_reply("a") else {
        panic!("expected receipts");
    };
    assert_eq!(reply.request_id, 4);
    assert_eq!(reply.receipts, vec![receipts]);
}

#[tokio::test]
async fn test_unknown_receipts_reply_empty() {
    let f = fixture().await;
    f.ready("a").await;

    let request = LesMessage::GetReceipts(GetReceiptsMessage {
        request_id: 1,
        hashes: vec![random_hash()],
    });
    f.send("a", request).await.unwrap();

    let LesMessage::Receipts(reply) = f.last_reply("a") else {
        panic!("expected receipts");
    };
    assert!(reply.receipts.is_empty());
}

#[tokio::test]
async fn test_chain_failure_is_not_a_breach() {
    let f = fixture().await;
    f.ready("a").await;
    f.chain.store().set_fail_reads(true);

    let request = headers_request(1, HeaderOrigin::Number(0), 1, 0, Direction::Forwards);
    let result = f.send("a", request).await;

    assert!(matches!(result, Err(LesError::ChainStore(ChainStoreError::Storage(_)))));
    assert!(f.transport.disconnects().is_empty());
    assert_eq!(f.handler.connection_phase(&id("a")).await, Some(Phase::Ready));
}

#[tokio::test]
async fn test_reply_send_failure_propagates() {
    let f = fixture().await;
    f.ready("a").await;
    f.transport.set_fail_sends(true);

    let request = headers_request(1, HeaderOrigin::Number(0), 1, 0, Direction::Forwards);
    let result = f.send("a", request).await;
    assert!(matches!(result, Err(LesError::Transport(_))));
    assert!(f.transport.disconnects().is_empty());
}

// =============================================================================
// TEST GROUP 4: Inbound data
// =============================================================================

#[tokio::test]
async fn test_block_headers_are_imported() {
    let f = fixture().await;
    f.ready("a").await;
    let sent_before = f.transport.sent().len();

    let new_header = block(1, f.genesis_hash()).header;
    let response = LesMessage::BlockHeaders(BlockHeadersMessage {
        request_id: 1,
        buffer_value: U256::from(2),
        headers: vec![new_header.clone(), f.blocks[0].header.clone()],
    });
    f.send("a", response).await.unwrap();

    assert_eq!(
        f.chain.retrieve_block_header(&new_header.hash()).await.unwrap(),
        Some(new_header)
    );
    // No reply to a response
    assert_eq!(f.transport.sent().len(), sent_before);
}

#[tokio::test]
async fn test_announce_updates_peer_head() {
    let f = fixture().await;
    f.ready("a").await;

    let announce = LesMessage::Announce(AnnounceMessage {
        head_hash: H256::repeat_byte(0x42),
        head_number: U256::from(3444),
        head_td: U256::from(24),
        reorg_depth: U256::zero(),
    });
    f.send("a", announce).await.unwrap();

    let head = f.handler.connection_state(&id("a")).await.unwrap().peer_head.unwrap();
    assert_eq!(head.hash, H256::repeat_byte(0x42));
    assert_eq!(head.number, U256::from(3444));
}

#[tokio::test]
async fn test_unsolicited_bodies_are_dropped() {
    let f = fixture().await;
    f.ready("a").await;

    let bodies = LesMessage::BlockBodies(BlockBodiesMessage {
        request_id: 3,
        buffer_value: U256::zero(),
        bodies: vec![BlockBody::default()],
    });
    f.send("a", bodies).await.unwrap();
    assert_eq!(f.transport.sent().len(), 1);
    assert_eq!(f.handler.connection_phase(&id("a")).await, Some(Phase::Ready));
}

#[tokio::test]
async fn test_malformed_payload_after_handshake_is_breach() {
    let f = fixture().await;
    f.ready("a").await;

    let result = f.handler.handle(&id("a"), 2, &[0xc2, 0x01]).await;
    assert!(matches!(
        f.assert_breach("a", result),
        BreachKind::Malformed(_)
    ));
}

#[tokio::test]
async fn test_unknown_code_after_handshake_is_breach() {
    let f = fixture().await;
    f.ready("a").await;

    let result = f.handler.handle(&id("a"), 0x0f, &[0xc0]).await;
    assert_eq!(
        f.assert_breach("a", result),
        BreachKind::Malformed(crate::codec::DecodeError::UnknownMessageType(0x0f))
    );
}

// =============================================================================
// TEST GROUP 5: Lifecycle
// =============================================================================

#[tokio::test]
async fn test_unknown_connection_touches_nothing() {
    let f = fixture().await;

    let result = f.handler.handle(&id("ghost"), 2, &[0x13, 0x37]).await;
    assert_eq!(result, Err(LesError::UnknownConnection(id("ghost"))));
    assert!(f.transport.sent().is_empty());
    assert!(f.transport.disconnects().is_empty());
}

#[tokio::test]
async fn test_close_purges_connection() {
    let f = fixture().await;
    f.ready("a").await;

    f.handler.handle_connection_closed(&id("a")).await.unwrap();

    assert!(!f.handler.is_tracked(&id("a")));
    let request = headers_request(1, HeaderOrigin::Number(0), 1, 0, Direction::Forwards);
    assert_eq!(f.send("a", request).await, Err(LesError::UnknownConnection(id("a"))));
    // The id can be reused by a fresh connection
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();
    assert_eq!(f.handler.connection_phase(&id("a")).await, Some(Phase::AwaitingStatus));
}

#[tokio::test]
async fn test_close_of_untracked_connection_is_noop() {
    let f = fixture().await;
    assert!(f.handler.handle_connection_closed(&id("nobody")).await.is_ok());
}

#[tokio::test]
async fn test_close_after_breach_purges() {
    let f = fixture().await;
    f.handler.handle_new_peer_connection(&id("a")).await.unwrap();
    let _ = f.handler.handle(&id("a"), 2, &[0xc0]).await;
    assert!(f.handler.is_tracked(&id("a")));

    f.handler.handle_connection_closed(&id("a")).await.unwrap();
    assert_eq!(f.handler.connection_count(), 0);
}

#[tokio::test]
async fn test_stop_disconnects_everyone() {
    let f = fixture().await;
    f.ready("a").await;
    f.handler.handle_new_peer_connection(&id("b")).await.unwrap();

    f.handler.stop().await.unwrap();

    let mut disconnects = f.transport.disconnects();
    disconnects.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(
        disconnects,
        vec![
            (id("a"), DisconnectReason::ClientQuitting),
            (id("b"), DisconnectReason::ClientQuitting),
        ]
    );
    assert_eq!(f.handler.connection_count(), 0);
}

#[tokio::test]
async fn test_connections_are_independent() {
    let f = fixture().await;
    f.ready("good").await;
    f.handler.handle_new_peer_connection(&id("bad")).await.unwrap();

    let _ = f.handler.handle(&id("bad"), 4, &[0xc0]).await;

    let request = headers_request(1, HeaderOrigin::Number(0), 1, 0, Direction::Forwards);
    f.send("good", request).await.unwrap();
    assert_eq!(f.handler.connection_phase(&id("good")).await, Some(Phase::Ready));
    assert_eq!(f.handler.connection_phase(&id("bad")).await, Some(Phase::Closed));
}

// =============================================================================
// TEST GROUP: Close while a chain lookup is in flight
// =============================================================================

mod in_flight {
    use super::*;
    use crate::ports::ChainHead;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Notify, Semaphore};

    /// Chain store whose next lookup parks until released.
    struct GatedChain {
        inner: KvChainStore<InMemoryKVStore>,
        gate_by_number: AtomicBool,
        gate_by_hash: AtomicBool,
        entered: Notify,
        release: Semaphore,
    }

    impl GatedChain {
        async fn pass(&self, gate: &AtomicBool) {
            if gate.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.acquire().await.unwrap().forget();
            }
        }
    }

    #[async_trait]
    impl ChainStore for GatedChain {
        async fn retrieve_block_header(
            &self,
            hash: &Hash,
        ) -> Result<Option<BlockHeader>, ChainStoreError> {
            self.pass(&self.gate_by_hash).await;
            self.inner.retrieve_block_header(hash).await
        }

        async fn retrieve_block_header_by_number(
            &self,
            number: U256,
        ) -> Result<Option<BlockHeader>, ChainStoreError> {
            self.pass(&self.gate_by_number).await;
            self.inner.retrieve_block_header_by_number(number).await
        }

        async fn retrieve_block_body(
            &self,
            hash: &Hash,
        ) -> Result<Option<BlockBody>, ChainStoreError> {
            self.inner.retrieve_block_body(hash).await
        }

        async fn retrieve_transaction_receipts(
            &self,
            hash: &Hash,
        ) -> Result<Option<Vec<TransactionReceipt>>, ChainStoreError> {
            self.inner.retrieve_transaction_receipts(hash).await
        }

        async fn store_block_header(&self, header: &BlockHeader) -> Result<(), ChainStoreError> {
            self.inner.store_block_header(header).await
        }

        async fn chain_head(&self) -> Result<ChainHead, ChainStoreError> {
            self.inner.chain_head().await
        }

        async fn genesis_hash(&self) -> Result<Hash, ChainStoreError> {
            self.inner.genesis_hash().await
        }
    }

    struct Gated {
        handler: LesSubProtocolHandler<RecordingTransport, GatedChain>,
        transport: Arc<RecordingTransport>,
        chain: Arc<GatedChain>,
        blocks: Vec<Block>,
    }

    async fn gated(len: u64) -> Gated {
        let genesis = block(0, H256::zero());
        let inner = KvChainStore::init(InMemoryKVStore::new(), &genesis).await.unwrap();
        let mut blocks = vec![genesis];
        for n in 1..len {
            let next = block(n, blocks[n as usize - 1].hash());
            inner.store_block(&next).await.unwrap();
            blocks.push(next);
        }
        let chain = Arc::new(GatedChain {
            inner,
            gate_by_number: AtomicBool::new(false),
            gate_by_hash: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        let transport = Arc::new(RecordingTransport::new());
        let handler = LesSubProtocolHandler::new(
            LesConfig::for_testing(),
            Arc::clone(&transport),
            Arc::clone(&chain),
        );

        handler.handle_new_peer_connection(&id("a")).await.unwrap();
        let status = LesMessage::Status(peer_status(blocks[0].hash()));
        handler
            .handle(&id("a"), status.code(), &codec::encode(&status))
            .await
            .unwrap();

        Gated {
            handler,
            transport,
            chain,
            blocks,
        }
    }

    impl Gated {
        /// Deliver `message` and report the connection closed while the
        /// handler is parked in the chain store.
        async fn deliver_then_close(&self, message: LesMessage) -> Result<(), LesError> {
            let payload = codec::encode(&message);
            let closing = async {
                self.chain.entered.notified().await;
                self.handler.handle_connection_closed(&id("a")).await.unwrap();
                self.chain.release.add_permits(1);
            };
            let peer = id("a");
            let (result, ()) = tokio::join!(
                self.handler.handle(&peer, message.code(), &payload),
                closing
            );
            result
        }
    }

    #[tokio::test]
    async fn test_reply_dropped_when_closed_during_lookup() {
        let g = gated(3).await;
        g.chain.gate_by_number.store(true, Ordering::SeqCst);

        let request = headers_request(1, HeaderOrigin::Number(0), 3, 0, Direction::Forwards);
        let result = g.deliver_then_close(request).await;

        assert_eq!(result, Ok(()));
        // Only our Status ever went out
        assert_eq!(g.transport.sent_to(&id("a")).len(), 1);
        assert!(g.transport.disconnects().is_empty());
        assert!(!g.handler.is_tracked(&id("a")));
    }

    #[tokio::test]
    async fn test_import_stopped_when_closed_during_lookup() {
        let g = gated(1).await;
        g.chain.gate_by_hash.store(true, Ordering::SeqCst);

        let first = block(1, g.blocks[0].hash()).header;
        let second = block(2, first.hash()).header;
        let response = LesMessage::BlockHeaders(BlockHeadersMessage {
            request_id: 1,
            buffer_value: U256::zero(),
            headers: vec![first.clone(), second.clone()],
        });
        let result = g.deliver_then_close(response).await;

        assert_eq!(result, Ok(()));
        for header in [first, second] {
            assert_eq!(
                g.chain.inner.retrieve_block_header(&header.hash()).await.unwrap(),
                None
            );
        }
        assert_eq!(g.transport.sent_to(&id("a")).len(), 1);
    }
}
