//! # Adapters Layer
//!
//! Implementations of the outbound ports.
//!
//! - `InMemoryKVStore`: `KeyValueStore` over a `HashMap`
//! - `KvChainStore`: `ChainStore` over any `KeyValueStore`
//! - `RecordingTransport`: `TransportAdapter` that records instead of sending

pub mod chain_store;
pub mod memory_kv;
pub mod transport;

pub use chain_store::KvChainStore;
pub use memory_kv::InMemoryKVStore;
pub use transport::{RecordingTransport, SentMessage};
