//! # Connection State
//!
//! Per-peer state owned by the handler. Lifecycle:
//!
//! ```text
//! AwaitingStatus ──Status ok──▶ Ready
//!       │                        │
//!       └──────breach────────────┴──▶ Closed
//! ```
//!
//! `Closed` is terminal. The table entry itself is removed when the transport
//! reports the connection gone.

use shared_types::{Hash, U256};

use super::flow_control::FlowControlBuffer;
use super::messages::{AnnounceMessage, StatusMessage};
use super::value_objects::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Our Status is sent, theirs has not arrived.
    AwaitingStatus,
    /// Handshake complete; requests are served.
    Ready,
    /// Disconnected after a breach; nothing more is processed.
    Closed,
}

/// Latest head a peer told us about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHead {
    pub hash: Hash,
    pub number: U256,
    pub total_difficulty: U256,
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub connection_id: ConnectionId,
    pub phase: Phase,
    /// The peer's Status, once accepted.
    pub peer_status: Option<StatusMessage>,
    pub peer_head: Option<PeerHead>,
    /// Our accounting of the peer's request budget.
    pub flow_control: FlowControlBuffer,
}

impl ConnectionState {
    pub fn new(connection_id: ConnectionId, flow_control: FlowControlBuffer) -> Self {
        Self {
            connection_id,
            phase: Phase::AwaitingStatus,
            peer_status: None,
            peer_head: None,
            flow_control,
        }
    }

    pub fn handshake_complete(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn peer_protocol_version(&self) -> Option<u32> {
        self.peer_status.as_ref().map(|s| s.protocol_version)
    }

    pub fn peer_genesis_hash(&self) -> Option<Hash> {
        self.peer_status.as_ref().map(|s| s.genesis_hash)
    }

    /// Record an accepted Status and move to `Ready`.
    pub fn complete_handshake(&mut self, status: StatusMessage) {
        self.peer_head = Some(PeerHead {
            hash: status.head_hash,
            number: status.head_number,
            total_difficulty: status.head_td,
        });
        self.peer_status = Some(status);
        self.phase = Phase::Ready;
    }

    pub fn record_announce(&mut self, announce: &AnnounceMessage) {
        self.peer_head = Some(PeerHead {
            hash: announce.head_hash,
            number: announce.head_number,
            total_difficulty: announce.head_td,
        });
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }
}
