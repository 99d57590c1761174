//! # Ports Layer
//!
//! Hexagonal architecture ports for the LES handler.
//!
//! - **Inbound**: `SubProtocolHandler`, driven by the transport
//! - **Outbound**: `TransportAdapter`, `ChainStore`, `KeyValueStore`

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
