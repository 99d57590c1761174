//! Wire forms of everything except Status.
//!
//! ```text
//! Announce         [headHash, headNumber, headTd, reorgDepth, [kv...]]
//! GetBlockHeaders  [reqID, [origin, maxHeaders, skip, reverse]]
//! GetBlockBodies   [reqID, [hash...]]
//! GetReceipts      [reqID, [hash...]]
//! BlockHeaders     [reqID, BV, [header...]]
//! BlockBodies      [reqID, BV, [body...]]
//! Receipts         [reqID, BV, [[receipt...]...]]
//! ```

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use super::{list_items, list_of};

use crate::domain::{
    AnnounceMessage, BlockBodiesMessage, BlockHeaderQuery, BlockHeadersMessage, Direction,
    GetBlockBodiesMessage, GetBlockHeadersMessage, GetReceiptsMessage, HeaderOrigin,
    ReceiptsMessage,
};

/// Length of a hash origin; anything else must be a `u64` block number.
const HASH_LEN: usize = 32;

fn expect_list(rlp: &Rlp, expected: usize) -> Result<(), DecoderError> {
    if list_items(rlp)?.len() != expected {
        return Err(DecoderError::RlpIncorrectListLen);
    }
    Ok(())
}

/// Decode the list at `index`, refusing a data item in its place.
fn strict_list_at<T: Decodable>(rlp: &Rlp, index: usize) -> Result<Vec<T>, DecoderError> {
    list_of(&rlp.at(index)?)
}

// =============================================================================
// ANNOUNCE
// =============================================================================

impl Encodable for AnnounceMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.head_hash);
        s.append(&self.head_number);
        s.append(&self.head_td);
        s.append(&self.reorg_depth);
        s.begin_list(0);
    }
}

impl Decodable for AnnounceMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        // The trailing key/value list is optional and its entries are ignored
        let count = list_items(rlp)?.len();
        if count != 4 && count != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            head_hash: rlp.val_at(0)?,
            head_number: rlp.val_at(1)?,
            head_td: rlp.val_at(2)?,
            reorg_depth: rlp.val_at(3)?,
        })
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

impl Encodable for BlockHeaderQuery {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        match &self.origin {
            HeaderOrigin::Hash(hash) => s.append(hash),
            HeaderOrigin::Number(number) => s.append(number),
        };
        s.append(&self.max_headers);
        s.append(&self.skip);
        s.append(&(self.direction == Direction::Backwards));
    }
}

impl Decodable for BlockHeaderQuery {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 4)?;
        let origin = rlp.at(0)?;
        if !origin.is_data() {
            return Err(DecoderError::RlpExpectedToBeData);
        }
        let origin = if origin.size() == HASH_LEN {
            HeaderOrigin::Hash(origin.as_val()?)
        } else {
            HeaderOrigin::Number(origin.as_val()?)
        };
        let reverse: bool = rlp.val_at(3)?;
        Ok(Self {
            origin,
            max_headers: rlp.val_at(1)?,
            skip: rlp.val_at(2)?,
            direction: if reverse {
                Direction::Backwards
            } else {
                Direction::Forwards
            },
        })
    }
}

impl Encodable for GetBlockHeadersMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.request_id);
        s.append(&self.query);
    }
}

impl Decodable for GetBlockHeadersMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 2)?;
        Ok(Self {
            request_id: rlp.val_at(0)?,
            query: rlp.val_at(1)?,
        })
    }
}

impl Encodable for GetBlockBodiesMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.request_id);
        s.append_list(&self.hashes);
    }
}

impl Decodable for GetBlockBodiesMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 2)?;
        Ok(Self {
            request_id: rlp.val_at(0)?,
            hashes: strict_list_at(rlp, 1)?,
        })
    }
}

impl Encodable for GetReceiptsMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.request_id);
        s.append_list(&self.hashes);
    }
}

impl Decodable for GetReceiptsMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 2)?;
        Ok(Self {
            request_id: rlp.val_at(0)?,
            hashes: strict_list_at(rlp, 1)?,
        })
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

impl Encodable for BlockHeadersMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.request_id);
        s.append(&self.buffer_value);
        s.append_list(&self.headers);
    }
}

impl Decodable for BlockHeadersMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 3)?;
        Ok(Self {
            request_id: rlp.val_at(0)?,
            buffer_value: rlp.val_at(1)?,
            headers: strict_list_at(rlp, 2)?,
        })
    }
}

impl Encodable for BlockBodiesMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.request_id);
        s.append(&self.buffer_value);
        s.append_list(&self.bodies);
    }
}

impl Decodable for BlockBodiesMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 3)?;
        Ok(Self {
            request_id: rlp.val_at(0)?,
            buffer_value: rlp.val_at(1)?,
            bodies: strict_list_at(rlp, 2)?,
        })
    }
}

impl Encodable for ReceiptsMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.request_id);
        s.append(&self.buffer_value);
        s.begin_list(self.receipts.len());
        for block_receipts in &self.receipts {
            s.append_list(block_receipts);
        }
    }
}

impl Decodable for ReceiptsMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list(rlp, 3)?;
        let receipts = list_items(&rlp.at(2)?)?
            .iter()
            .map(list_of)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            request_id: rlp.val_at(0)?,
            buffer_value: rlp.val_at(1)?,
            receipts,
        })
    }
}
