//! # Domain Errors
//!
//! Error types for the LES subprotocol.

use shared_types::ChainStoreError;
use thiserror::Error;

use super::handshake::HandshakeRejection;
use super::value_objects::ConnectionId;

/// A payload that is not a well-formed LES/2 message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Bad RLP or a structurally wrong item.
    #[error("RLP decoding failed: {0}")]
    Rlp(#[from] rlp::DecoderError),

    /// Code outside the LES/2 message table.
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Status without one of its mandatory keys.
    #[error("Status is missing mandatory key {0}")]
    MissingStatusField(&'static str),

    /// Well-formed RLP carrying a value the message cannot hold.
    #[error("Invalid field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// Why a peer was disconnected for breach of protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreachKind {
    /// A non-Status message arrived before the handshake completed.
    #[error("message type {0:#04x} before status")]
    MessageBeforeStatus(u8),

    /// A second Status arrived on a ready connection.
    #[error("duplicate status")]
    DuplicateStatus,

    /// The peer's Status failed validation.
    #[error("status rejected: {0}")]
    StatusRejected(HandshakeRejection),

    /// The payload did not decode.
    #[error("malformed payload: {0}")]
    Malformed(DecodeError),
}

impl BreachKind {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BreachKind::MessageBeforeStatus(_) => "message_before_status",
            BreachKind::DuplicateStatus => "duplicate_status",
            BreachKind::StatusRejected(_) => "status_rejected",
            BreachKind::Malformed(_) => "malformed",
        }
    }
}

/// Transport adapter failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Transport not running")]
    NotRunning,
}

/// Key-value layer failures beneath the chain store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvStoreError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

impl From<KvStoreError> for ChainStoreError {
    fn from(err: KvStoreError) -> Self {
        ChainStoreError::Storage(err.to_string())
    }
}

/// Errors returned by the handler's entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LesError {
    /// The peer was disconnected with `BreachOfProtocol`.
    #[error("Protocol breach by {connection_id}: {kind}")]
    ProtocolBreach {
        /// Offending connection
        connection_id: ConnectionId,
        /// What it did
        kind: BreachKind,
    },

    /// No table entry for the connection.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A second "new peer connection" event for a tracked id.
    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// The connection was closed after a breach.
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    #[error("Chain store error: {0}")]
    ChainStore(#[from] ChainStoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
