//! # Protocol Messages
//!
//! The LES/2 message set as immutable values. [`LesMessage`] is the closed
//! union the handler dispatches on; the RLP wire forms live in `codec`.

use shared_types::{BlockBody, BlockHeader, Hash, TransactionReceipt, U256};

// =============================================================================
// MESSAGE TYPE CODES
// =============================================================================

/// LES/2 message codes, relative to the subprotocol's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Status = 0x00,
    Announce = 0x01,
    GetBlockHeaders = 0x02,
    BlockHeaders = 0x03,
    GetBlockBodies = 0x04,
    BlockBodies = 0x05,
    GetReceipts = 0x06,
    Receipts = 0x07,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use MessageType::*;
        let message_type = match code {
            0x00 => Status,
            0x01 => Announce,
            0x02 => GetBlockHeaders,
            0x03 => BlockHeaders,
            0x04 => GetBlockBodies,
            0x05 => BlockBodies,
            0x06 => GetReceipts,
            0x07 => Receipts,
            _ => return None,
        };
        Some(message_type)
    }

    /// Stable label for logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Status => "status",
            MessageType::Announce => "announce",
            MessageType::GetBlockHeaders => "get_block_headers",
            MessageType::BlockHeaders => "block_headers",
            MessageType::GetBlockBodies => "get_block_bodies",
            MessageType::BlockBodies => "block_bodies",
            MessageType::GetReceipts => "get_receipts",
            MessageType::Receipts => "receipts",
        }
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Handshake payload. Each side sends exactly one per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub protocol_version: u32,
    pub network_id: u64,
    /// Total difficulty of the sender's best block.
    pub head_td: U256,
    pub head_hash: Hash,
    pub head_number: U256,
    pub genesis_hash: Hash,
    /// Sender serves header requests.
    pub serve_headers: bool,
    /// Oldest block whose bodies and receipts the sender serves.
    pub serve_chain_since: Option<U256>,
    /// Oldest block whose state the sender serves.
    pub serve_state_since: Option<U256>,
    /// Sender relays transactions.
    pub tx_relay: bool,
    /// Buffer limit (BL).
    pub flow_control_buffer_limit: U256,
    /// Maximum request cost (MRC).
    pub flow_control_maximum_request_cost_table: U256,
    /// Minimum rate of recharge (MRR).
    pub flow_control_minimum_rate_of_recharge: U256,
    pub announce_type: u32,
}

/// Unsolicited notification of a new head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub head_hash: Hash,
    pub head_number: U256,
    pub head_td: U256,
    /// How many blocks were rolled back to reach the new head.
    pub reorg_depth: U256,
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Anchor of a header query.
///
/// Numbers travel as RLP integers of at most eight bytes, so they can never
/// be mistaken for a 32-byte hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOrigin {
    Hash(Hash),
    Number(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards higher block numbers.
    Forwards,
    /// Towards genesis.
    Backwards,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderQuery {
    pub origin: HeaderOrigin,
    pub max_headers: u64,
    /// Blocks left out between two consecutive returned headers.
    pub skip: u64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockHeadersMessage {
    pub request_id: u64,
    pub query: BlockHeaderQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockBodiesMessage {
    pub request_id: u64,
    pub hashes: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetReceiptsMessage {
    pub request_id: u64,
    pub hashes: Vec<Hash>,
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeadersMessage {
    pub request_id: u64,
    /// Remaining flow-control buffer of the requester.
    pub buffer_value: U256,
    pub headers: Vec<BlockHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBodiesMessage {
    pub request_id: u64,
    pub buffer_value: U256,
    pub bodies: Vec<BlockBody>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptsMessage {
    pub request_id: u64,
    pub buffer_value: U256,
    /// One receipt list per requested block.
    pub receipts: Vec<Vec<TransactionReceipt>>,
}

// =============================================================================
// UNION
// =============================================================================

/// Every message a LES/2 peer may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LesMessage {
    Status(StatusMessage),
    Announce(AnnounceMessage),
    GetBlockHeaders(GetBlockHeadersMessage),
    BlockHeaders(BlockHeadersMessage),
    GetBlockBodies(GetBlockBodiesMessage),
    BlockBodies(BlockBodiesMessage),
    GetReceipts(GetReceiptsMessage),
    Receipts(ReceiptsMessage),
}

impl LesMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            LesMessage::Status(_) => MessageType::Status,
            LesMessage::Announce(_) => MessageType::Announce,
            LesMessage::GetBlockHeaders(_) => MessageType::GetBlockHeaders,
            LesMessage::BlockHeaders(_) => MessageType::BlockHeaders,
            LesMessage::GetBlockBodies(_) => MessageType::GetBlockBodies,
            LesMessage::BlockBodies(_) => MessageType::BlockBodies,
            LesMessage::GetReceipts(_) => MessageType::GetReceipts,
            LesMessage::Receipts(_) => MessageType::Receipts,
        }
    }

    /// Wire code of the message.
    pub fn code(&self) -> u8 {
        self.message_type().code()
    }
}
