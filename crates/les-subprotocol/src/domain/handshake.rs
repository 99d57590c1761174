//! # Status Handshake
//!
//! A peer's Status is accepted only if it speaks our protocol version, is on
//! our network and shares our genesis block.
//!
//! Checks run in this order:
//! 1. Protocol version (exact match)
//! 2. Network id
//! 3. Genesis hash

use std::fmt;

use shared_types::Hash;

use super::messages::StatusMessage;

/// What a remote Status must agree with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequirements {
    pub protocol_version: u32,
    pub network_id: u64,
    pub genesis_hash: Hash,
}

/// Reasons for rejecting a Status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRejection {
    ProtocolVersionMismatch { ours: u32, theirs: u32 },
    NetworkIdMismatch { ours: u64, theirs: u64 },
    GenesisMismatch,
}

impl fmt::Display for HandshakeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeRejection::ProtocolVersionMismatch { ours, theirs } => {
                write!(f, "protocol version {} != {}", theirs, ours)
            }
            HandshakeRejection::NetworkIdMismatch { ours, theirs } => {
                write!(f, "network id {} != {}", theirs, ours)
            }
            HandshakeRejection::GenesisMismatch => f.write_str("genesis hash mismatch"),
        }
    }
}

/// Verify a peer's Status against our requirements.
pub fn validate_status(
    required: &HandshakeRequirements,
    theirs: &StatusMessage,
) -> Result<(), HandshakeRejection> {
    if theirs.protocol_version != required.protocol_version {
        return Err(HandshakeRejection::ProtocolVersionMismatch {
            ours: required.protocol_version,
            theirs: theirs.protocol_version,
        });
    }

    if theirs.network_id != required.network_id {
        return Err(HandshakeRejection::NetworkIdMismatch {
            ours: required.network_id,
            theirs: theirs.network_id,
        });
    }

    if theirs.genesis_hash != required.genesis_hash {
        return Err(HandshakeRejection::GenesisMismatch);
    }

    Ok(())
}
