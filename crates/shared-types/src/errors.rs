//! # Error Types
//!
//! Errors raised by chain storage collaborators.

use thiserror::Error;

/// Errors that can occur while reading or writing chain data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainStoreError {
    /// The underlying key-value layer failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored value could not be decoded.
    #[error("Corrupt entry for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The store has no genesis block yet.
    #[error("Chain store not initialized")]
    NotInitialized,
}
