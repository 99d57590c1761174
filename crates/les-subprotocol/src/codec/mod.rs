//! # Message Codec
//!
//! RLP encoding of the LES/2 message set. Pure and stateless.
//!
//! `decode` is strict: the payload must be exactly one RLP item with no
//! trailing bytes, and every list must have the expected shape. Any failure
//! is a [`DecodeError`], never a panic.

mod messages;
pub mod status;

use rlp::{DecoderError, Rlp};

pub use crate::domain::DecodeError;
use crate::domain::{LesMessage, MessageType};

/// Decode the payload of a message with the given code.
pub fn decode(code: u8, bytes: &[u8]) -> Result<LesMessage, DecodeError> {
    let message_type = MessageType::from_code(code).ok_or(DecodeError::UnknownMessageType(code))?;

    let rlp = Rlp::new(bytes);
    let total = rlp.payload_info()?.total();
    if total > bytes.len() {
        return Err(DecoderError::RlpIsTooShort.into());
    }
    if total < bytes.len() {
        return Err(DecoderError::RlpInconsistentLengthAndData.into());
    }

    let message = match message_type {
        MessageType::Status => LesMessage::Status(status::decode_status(&rlp)?),
        MessageType::Announce => LesMessage::Announce(rlp.as_val()?),
        MessageType::GetBlockHeaders => LesMessage::GetBlockHeaders(rlp.as_val()?),
        MessageType::BlockHeaders => LesMessage::BlockHeaders(rlp.as_val()?),
        MessageType::GetBlockBodies => LesMessage::GetBlockBodies(rlp.as_val()?),
        MessageType::BlockBodies => LesMessage::BlockBodies(rlp.as_val()?),
        MessageType::GetReceipts => LesMessage::GetReceipts(rlp.as_val()?),
        MessageType::Receipts => LesMessage::Receipts(rlp.as_val()?),
    };
    Ok(message)
}

/// Items of a list, failing unless its payload splits exactly into whole
/// items. `Rlp::iter` and `Rlp::item_count` stop quietly at the first bad
/// item, so trailing garbage would otherwise pass.
fn list_items<'a>(rlp: &Rlp<'a>) -> Result<Vec<Rlp<'a>>, DecoderError> {
    if !rlp.is_list() {
        return Err(DecoderError::RlpExpectedToBeList);
    }
    let mut rest = rlp.data()?;
    let mut items = Vec::new();
    while !rest.is_empty() {
        // payload_info checks the item fits in `rest`
        let len = Rlp::new(rest).payload_info()?.total();
        let (item, tail) = rest.split_at(len);
        items.push(Rlp::new(item));
        rest = tail;
    }
    Ok(items)
}

/// Decode every item of a list.
fn list_of<T: rlp::Decodable>(rlp: &Rlp) -> Result<Vec<T>, DecoderError> {
    list_items(rlp)?.iter().map(|item| item.as_val()).collect()
}

/// Encode a message payload. The code travels separately; see [`LesMessage::code`].
pub fn encode(message: &LesMessage) -> Vec<u8> {
    let bytes = match message {
        LesMessage::Status(m) => rlp::encode(m),
        LesMessage::Announce(m) => rlp::encode(m),
        LesMessage::GetBlockHeaders(m) => rlp::encode(m),
        LesMessage::BlockHeaders(m) => rlp::encode(m),
        LesMessage::GetBlockBodies(m) => rlp::encode(m),
        LesMessage::BlockBodies(m) => rlp::encode(m),
        LesMessage::GetReceipts(m) => rlp::encode(m),
        LesMessage::Receipts(m) => rlp::encode(m),
    };
    bytes.to_vec()
}
