//! # Key-Value Chain Store
//!
//! [`ChainStore`] over any [`KeyValueStore`]. Entities are stored as RLP.
//!
//! ## Key Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `h` + hash | header |
//! | `b` + hash | body |
//! | `r` + hash | receipt list |
//! | `t` + hash | total difficulty |
//! | `n` + number (32 bytes BE) | canonical hash |
//! | `m:head` | head hash |
//! | `m:genesis` | genesis hash |
//!
//! The head moves only when a full block with a greater total difficulty is
//! stored. Headers stored on their own are indexed by number only if that
//! slot is still free.

use async_trait::async_trait;
use rlp::Decodable;
use shared_types::{
    Block, BlockBody, BlockHeader, ChainStoreError, Hash, TransactionReceipt, H256, U256,
};
use tokio::sync::Mutex;

use crate::ports::{BatchOperation, ChainHead, ChainStore, KeyValueStore};

const HEADER_PREFIX: &[u8] = b"h";
const BODY_PREFIX: &[u8] = b"b";
const RECEIPTS_PREFIX: &[u8] = b"r";
const TOTAL_DIFFICULTY_PREFIX: &[u8] = b"t";
const CANONICAL_PREFIX: &[u8] = b"n";
const HEAD_KEY: &[u8] = b"m:head";
const GENESIS_KEY: &[u8] = b"m:genesis";

fn hash_key(prefix: &[u8], hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 32);
    key.extend_from_slice(prefix);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn number_key(number: U256) -> Vec<u8> {
    let mut be = [0u8; 32];
    number.to_big_endian(&mut be);
    let mut key = Vec::with_capacity(CANONICAL_PREFIX.len() + 32);
    key.extend_from_slice(CANONICAL_PREFIX);
    key.extend_from_slice(&be);
    key
}

fn corrupt(key: &[u8], reason: impl ToString) -> ChainStoreError {
    ChainStoreError::Corrupt {
        key: hex::encode(key),
        reason: reason.to_string(),
    }
}

pub struct KvChainStore<S: KeyValueStore> {
    store: S,
    /// Serialises head updates.
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> KvChainStore<S> {
    /// Wrap a store. Until [`KvChainStore::init`] has run on it, head and
    /// genesis lookups fail with `NotInitialized`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Wrap a store and write `genesis` as block zero and head.
    pub async fn init(store: S, genesis: &Block) -> Result<Self, ChainStoreError> {
        let chain = Self::new(store);
        let hash = genesis.hash();

        let mut batch = Self::block_operations(genesis, hash, genesis.header.difficulty);
        batch.push(BatchOperation::put(number_key(genesis.header.number), hash.as_bytes()));
        batch.push(BatchOperation::put(HEAD_KEY, hash.as_bytes()));
        batch.push(BatchOperation::put(GENESIS_KEY, hash.as_bytes()));
        chain.store.write_batch(batch).await?;

        tracing::info!("[les] Chain store initialized with genesis {:?}", hash);
        Ok(chain)
    }

    /// The underlying key-value store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store a full block and move the head if it is heavier.
    pub async fn store_block(&self, block: &Block) -> Result<(), ChainStoreError> {
        let _guard = self.write_lock.lock().await;

        let hash = block.hash();
        let parent_td = self
            .total_difficulty(&block.header.parent_hash)
            .await?
            .unwrap_or_default();
        let td = parent_td.saturating_add(block.header.difficulty);

        let mut batch = Self::block_operations(block, hash, td);
        let head = self.chain_head().await?;
        if td > head.total_difficulty {
            batch.extend(self.canonical_operations(&block.header, hash, head.number).await?);
            batch.push(BatchOperation::put(HEAD_KEY, hash.as_bytes()));
            tracing::debug!(
                number = %block.header.number,
                total_difficulty = %td,
                "[les] New chain head {:?}",
                hash
            );
        }
        self.store.write_batch(batch).await?;
        Ok(())
    }

    /// Store the receipts of a block's transactions.
    pub async fn store_transaction_receipts(
        &self,
        block_hash: &Hash,
        receipts: &[TransactionReceipt],
    ) -> Result<(), ChainStoreError> {
        let mut s = rlp::RlpStream::new();
        s.append_list::<TransactionReceipt, _>(receipts);
        self.store
            .put(&hash_key(RECEIPTS_PREFIX, block_hash), &s.out())
            .await?;
        Ok(())
    }

    /// Total difficulty of the chain ending at `hash`, if known.
    pub async fn total_difficulty(&self, hash: &Hash) -> Result<Option<U256>, ChainStoreError> {
        self.get_decoded(hash_key(TOTAL_DIFFICULTY_PREFIX, hash)).await
    }

    fn block_operations(block: &Block, hash: Hash, td: U256) -> Vec<BatchOperation> {
        vec![
            BatchOperation::put(hash_key(HEADER_PREFIX, &hash), rlp::encode(&block.header).to_vec()),
            BatchOperation::put(hash_key(BODY_PREFIX, &hash), rlp::encode(&block.body).to_vec()),
            BatchOperation::put(hash_key(TOTAL_DIFFICULTY_PREFIX, &hash), rlp::encode(&td).to_vec()),
        ]
    }

    /// Index `header` as canonical, rewriting ancestors that were not, and
    /// dropping entries above it left over from a longer old chain.
    async fn canonical_operations(
        &self,
        header: &BlockHeader,
        hash: Hash,
        old_head_number: U256,
    ) -> Result<Vec<BatchOperation>, ChainStoreError> {
        let mut operations = vec![BatchOperation::put(number_key(header.number), hash.as_bytes())];

        let mut stale = header.number.saturating_add(U256::one());
        while stale <= old_head_number {
            operations.push(BatchOperation::delete(number_key(stale)));
            stale = stale.saturating_add(U256::one());
        }

        let mut number = header.number;
        let mut ancestor = header.parent_hash;
        while let Some(parent_number) = number.checked_sub(U256::one()) {
            if self.canonical_hash(parent_number).await? == Some(ancestor) {
                break;
            }
            operations.push(BatchOperation::put(number_key(parent_number), ancestor.as_bytes()));
            match self.retrieve_block_header(&ancestor).await? {
                Some(parent) => {
                    number = parent_number;
                    ancestor = parent.parent_hash;
                }
                None => break,
            }
        }
        Ok(operations)
    }

    async fn canonical_hash(&self, number: U256) -> Result<Option<Hash>, ChainStoreError> {
        self.get_hash(&number_key(number)).await
    }

    async fn get_hash(&self, key: &[u8]) -> Result<Option<Hash>, ChainStoreError> {
        match self.store.get(key).await? {
            Some(bytes) if bytes.len() == 32 => Ok(Some(H256::from_slice(&bytes))),
            Some(bytes) => Err(corrupt(key, format!("hash of {} bytes", bytes.len()))),
            None => Ok(None),
        }
    }

    async fn get_decoded<T: Decodable>(&self, key: Vec<u8>) -> Result<Option<T>, ChainStoreError> {
        match self.store.get(&key).await? {
            Some(bytes) => rlp::decode(&bytes).map(Some).map_err(|e| corrupt(&key, format!("{:?}", e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> ChainStore for KvChainStore<S> {
    async fn retrieve_block_header(
        &self,
        hash: &Hash,
    ) -> Result<Option<BlockHeader>, ChainStoreError> {
        self.get_decoded(hash_key(HEADER_PREFIX, hash)).await
    }

    async fn retrieve_block_header_by_number(
        &self,
        number: U256,
    ) -> Result<Option<BlockHeader>, ChainStoreError> {
        match self.canonical_hash(number).await? {
            Some(hash) => self.retrieve_block_header(&hash).await,
            None => Ok(None),
        }
    }

    async fn retrieve_block_body(&self, hash: &Hash) -> Result<Option<BlockBody>, ChainStoreError> {
        self.get_decoded(hash_key(BODY_PREFIX, hash)).await
    }

    async fn retrieve_transaction_receipts(
        &self,
        hash: &Hash,
    ) -> Result<Option<Vec<TransactionReceipt>>, ChainStoreError> {
        let key = hash_key(RECEIPTS_PREFIX, hash);
        match self.store.get(&key).await? {
            Some(bytes) => rlp::Rlp::new(&bytes)
                .as_list::<TransactionReceipt>()
                .map(Some)
                .map_err(|e| corrupt(&key, format!("{:?}", e))),
            None => Ok(None),
        }
    }

    async fn store_block_header(&self, header: &BlockHeader) -> Result<(), ChainStoreError> {
        let _guard = self.write_lock.lock().await;

        let hash = header.hash();
        let header_key = hash_key(HEADER_PREFIX, &hash);
        if self.store.get(&header_key).await?.is_some() {
            return Ok(());
        }

        let mut batch = vec![BatchOperation::put(header_key, rlp::encode(header).to_vec())];
        if let Some(parent_td) = self.total_difficulty(&header.parent_hash).await? {
            let td = parent_td.saturating_add(header.difficulty);
            batch.push(BatchOperation::put(
                hash_key(TOTAL_DIFFICULTY_PREFIX, &hash),
                rlp::encode(&td).to_vec(),
            ));
        }
        if self.canonical_hash(header.number).await?.is_none() {
            batch.push(BatchOperation::put(number_key(header.number), hash.as_bytes()));
        }
        self.store.write_batch(batch).await?;
        Ok(())
    }

    async fn chain_head(&self) -> Result<ChainHead, ChainStoreError> {
        let hash = self
            .get_hash(HEAD_KEY)
            .await?
            .ok_or(ChainStoreError::NotInitialized)?;
        let header = self
            .retrieve_block_header(&hash)
            .await?
            .ok_or_else(|| corrupt(&hash_key(HEADER_PREFIX, &hash), "head header missing"))?;
        let total_difficulty = self
            .total_difficulty(&hash)
            .await?
            .ok_or_else(|| corrupt(&hash_key(TOTAL_DIFFICULTY_PREFIX, &hash), "head difficulty missing"))?;
        Ok(ChainHead {
            hash,
            number: header.number,
            total_difficulty,
        })
    }

    async fn genesis_hash(&self) -> Result<Hash, ChainStoreError> {
        self.get_hash(GENESIS_KEY)
            .await?
            .ok_or(ChainStoreError::NotInitialized)
    }
}
