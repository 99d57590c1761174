//! # Shared Types Crate
//!
//! Chain entities used by every LES crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: headers, bodies, transactions and receipts
//!   are defined once, here.
//! - **Canonical Encoding**: every entity carries its RLP encoding as
//!   `rlp::Encodable` / `rlp::Decodable`, so the wire codec and the storage
//!   layer agree byte for byte.
//! - **Content Addressing**: header and transaction hashes are Keccak-256 of
//!   the RLP encoding.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
