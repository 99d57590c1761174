//! # Outbound Ports
//!
//! Traits for external dependencies: the multiplexed transport, the chain
//! store and the key-value layer beneath it.

use std::net::SocketAddr;

use async_trait::async_trait;
use shared_types::{BlockBody, BlockHeader, ChainStoreError, Hash, TransactionReceipt, U256};

use crate::domain::{
    ConnectionId, DisconnectReason, KvStoreError, SubProtocolIdentifier, TransportError,
};

/// Multiplexed peer transport - outbound port.
///
/// The handler only calls `send` and `disconnect`.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Send one message to one connection.
    async fn send(
        &self,
        protocol: &SubProtocolIdentifier,
        message_type: u8,
        connection_id: &ConnectionId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Send one message to every connection speaking `protocol`.
    async fn broadcast(
        &self,
        protocol: &SubProtocolIdentifier,
        message_type: u8,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    async fn disconnect(
        &self,
        connection_id: &ConnectionId,
        reason: DisconnectReason,
    ) -> Result<(), TransportError>;

    /// Dial a peer by public key and address.
    async fn connect_to(&self, peer_key: &[u8], address: SocketAddr)
        -> Result<(), TransportError>;

    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;
}

/// Best block of the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub hash: Hash,
    pub number: U256,
    pub total_difficulty: U256,
}

/// Chain store - outbound port.
///
/// Lookups return `None` for unknown data; only I/O problems are errors.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn retrieve_block_header(&self, hash: &Hash)
        -> Result<Option<BlockHeader>, ChainStoreError>;

    /// Canonical header at `number`.
    async fn retrieve_block_header_by_number(
        &self,
        number: U256,
    ) -> Result<Option<BlockHeader>, ChainStoreError>;

    async fn retrieve_block_body(&self, hash: &Hash) -> Result<Option<BlockBody>, ChainStoreError>;

    /// Receipts of every transaction of the block, in order.
    async fn retrieve_transaction_receipts(
        &self,
        hash: &Hash,
    ) -> Result<Option<Vec<TransactionReceipt>>, ChainStoreError>;

    async fn store_block_header(&self, header: &BlockHeader) -> Result<(), ChainStoreError>;

    async fn chain_head(&self) -> Result<ChainHead, ChainStoreError>;

    async fn genesis_hash(&self) -> Result<Hash, ChainStoreError>;
}

/// Key-value persistence - outbound port of the chain store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError>;

    /// Apply every operation or none.
    async fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), KvStoreError>;
}

/// One write of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}
