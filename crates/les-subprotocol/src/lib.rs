//! # LES Subprotocol
//!
//! Light Ethereum Subprotocol, version 2, over a multiplexed RLPx-style
//! transport.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Serve light clients from a local chain store:
//! - Status handshake per connection (version, network, genesis)
//! - Block headers, bodies and receipts on request
//! - Import of block headers pushed by peers
//! - Disconnect on protocol breach
//!
//! ## Message Codes
//!
//! | Code | Message | Direction |
//! |------|---------|-----------|
//! | 0x00 | Status | both, once |
//! | 0x01 | Announce | server to client |
//! | 0x02 | GetBlockHeaders | request |
//! | 0x03 | BlockHeaders | response |
//! | 0x04 | GetBlockBodies | request |
//! | 0x05 | BlockBodies | response |
//! | 0x06 | GetReceipts | request |
//! | 0x07 | Receipts | response |
//!
//! ## Module Structure
//!
//! ```text
//! les-subprotocol/
//! ├── domain/          # Messages, connection state, handshake, flow control, errors
//! ├── codec/           # RLP wire forms
//! ├── ports/           # SubProtocolHandler (inbound) + transport/chain/kv traits (outbound)
//! ├── service/         # LesSubProtocolHandler, InboundDispatcher
//! ├── adapters/        # In-memory key-value store, chain store, recording transport
//! ├── subprotocol.rs   # LesSubprotocol descriptor
//! └── config.rs        # LesConfig
//! ```

#![warn(clippy::all)]

pub mod adapters;
pub mod codec;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;
pub mod subprotocol;

// Re-exports
pub use adapters::{InMemoryKVStore, KvChainStore, RecordingTransport, SentMessage};
pub use codec::{decode, encode, DecodeError};
pub use config::{ConfigError, LesConfig, LES_PROTOCOL_VERSION};
pub use domain::{
    AnnounceMessage, BlockBodiesMessage, BlockHeaderQuery, BlockHeadersMessage, BreachKind,
    ConnectionId, ConnectionState, Direction, DisconnectReason, FlowControlBuffer,
    GetBlockBodiesMessage, GetBlockHeadersMessage, GetReceiptsMessage, HandshakeRejection,
    HandshakeRequirements, HeaderOrigin, KvStoreError, LesError, LesMessage, MessageType,
    PeerHead, Phase, ReceiptsMessage, StatusMessage, SubProtocolIdentifier, TransportError,
};
pub use ports::{
    BatchOperation, ChainHead, ChainStore, KeyValueStore, SubProtocolHandler, TransportAdapter,
};
pub use service::{Completion, InboundDispatcher, LesSubProtocolHandler};
pub use subprotocol::{LesSubprotocol, LES_MESSAGE_RANGE, LES_PROTOCOL_NAME};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
