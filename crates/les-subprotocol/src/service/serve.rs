//! Answering data requests from the chain store.
//!
//! Misses are left out of replies, never reported as errors. Only chain
//! store failures propagate.

use shared_types::{BlockBody, BlockHeader, ChainStoreError, Hash, TransactionReceipt, U256};

use crate::domain::{BlockHeaderQuery, Direction, HeaderOrigin};
use crate::ports::ChainStore;

/// Walk the chain as `query` asks, returning at most `limit` headers.
///
/// The anchor is resolved by hash or canonical number; every following
/// header is the canonical one `skip + 1` numbers further in `direction`.
/// The walk stops early at genesis, at overflow or at the first unknown
/// number.
pub(crate) async fn collect_headers<C: ChainStore + ?Sized>(
    chain: &C,
    query: &BlockHeaderQuery,
    limit: u64,
) -> Result<Vec<BlockHeader>, ChainStoreError> {
    let max = query.max_headers.min(limit);
    if max == 0 {
        return Ok(Vec::new());
    }

    let anchor = match query.origin {
        HeaderOrigin::Hash(hash) => chain.retrieve_block_header(&hash).await?,
        HeaderOrigin::Number(number) => {
            chain
                .retrieve_block_header_by_number(U256::from(number))
                .await?
        },
    };
    let Some(anchor) = anchor else {
        return Ok(Vec::new());
    };

    let step = U256::from(query.skip).saturating_add(U256::one());
    let mut number = anchor.number;
    let mut headers = vec![anchor];

    while (headers.len() as u64) < max {
        let next = match query.direction {
            Direction::Forwards => number.checked_add(step),
            Direction::Backwards => number.checked_sub(step),
        };
        let Some(next) = next else {
            break;
        };
        match chain.retrieve_block_header_by_number(next).await? {
            Some(header) => headers.push(header),
            None => break,
        }
        number = next;
    }

    Ok(headers)
}

/// Bodies of the first `limit` requested blocks that we have.
pub(crate) async fn collect_bodies<C: ChainStore + ?Sized>(
    chain: &C,
    hashes: &[Hash],
    limit: usize,
) -> Result<Vec<BlockBody>, ChainStoreError> {
    let mut bodies = Vec::new();
    for hash in hashes.iter().take(limit) {
        if let Some(body) = chain.retrieve_block_body(hash).await? {
            bodies.push(body);
        }
    }
    Ok(bodies)
}

/// Receipt lists of the first `limit` requested blocks that we have.
pub(crate) async fn collect_receipts<C: ChainStore + ?Sized>(
    chain: &C,
    hashes: &[Hash],
    limit: usize,
) -> Result<Vec<Vec<TransactionReceipt>>, ChainStoreError> {
    let mut receipts = Vec::new();
    for hash in hashes.iter().take(limit) {
        if let Some(list) = chain.retrieve_transaction_receipts(hash).await? {
            receipts.push(list);
        }
    }
    Ok(receipts)
}
