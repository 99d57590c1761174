//! # LES Configuration
//!
//! What we advertise in our Status and how much we serve per request.
//!
//! ## File Format
//!
//! ```toml
//! protocol_version = 2
//! network_id = 1
//! serve_headers = true
//! serve_chain_since = "0x0"
//! flow_control_buffer_limit = "0x11e1a300"
//! flow_control_max_request_cost = "0x249f0"
//! flow_control_min_recharge = "0xc350"
//! max_headers_per_request = 192
//! ```
//!
//! Missing keys take their default. 256-bit values are hex strings.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use shared_types::{Hash, U256};
use thiserror::Error;

use crate::domain::HandshakeRequirements;

/// The only protocol version this handler speaks.
pub const LES_PROTOCOL_VERSION: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LesConfig {
    /// Version we advertise and require from peers.
    pub protocol_version: u32,
    pub network_id: u64,

    // Capabilities advertised in our Status
    pub serve_headers: bool,
    pub serve_chain_since: Option<U256>,
    pub serve_state_since: Option<U256>,
    pub tx_relay: bool,
    pub announce_type: u32,

    /// Buffer limit (BL).
    pub flow_control_buffer_limit: U256,
    /// Maximum request cost (MRC).
    pub flow_control_max_request_cost: U256,
    /// Minimum rate of recharge per millisecond (MRR).
    pub flow_control_min_recharge: U256,

    /// Upper bound on headers returned for one GetBlockHeaders.
    pub max_headers_per_request: u64,
    pub max_bodies_per_request: usize,
    pub max_receipts_per_request: usize,
}

impl Default for LesConfig {
    fn default() -> Self {
        Self {
            protocol_version: LES_PROTOCOL_VERSION,
            network_id: 1,
            serve_headers: false,
            serve_chain_since: None,
            serve_state_since: None,
            tx_relay: false,
            announce_type: 0,
            flow_control_buffer_limit: U256::zero(),
            flow_control_max_request_cost: U256::zero(),
            flow_control_min_recharge: U256::zero(),
            max_headers_per_request: 192,
            max_bodies_per_request: 32,
            max_receipts_per_request: 128,
        }
    }
}

impl LesConfig {
    /// Create a config for testing (small caps, real flow control).
    pub fn for_testing() -> Self {
        Self {
            serve_headers: true,
            flow_control_buffer_limit: U256::from(1_000),
            flow_control_max_request_cost: U256::from(100),
            flow_control_min_recharge: U256::zero(),
            max_headers_per_request: 16,
            max_bodies_per_request: 4,
            max_receipts_per_request: 4,
            ..Self::default()
        }
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_version != LES_PROTOCOL_VERSION {
            return Err(ConfigError::Invalid(format!(
                "protocol_version must be {}, got {}",
                LES_PROTOCOL_VERSION, self.protocol_version
            )));
        }
        if self.max_headers_per_request == 0 {
            return Err(ConfigError::Invalid("max_headers_per_request must be > 0".into()));
        }
        if self.max_bodies_per_request == 0 {
            return Err(ConfigError::Invalid("max_bodies_per_request must be > 0".into()));
        }
        if self.max_receipts_per_request == 0 {
            return Err(ConfigError::Invalid("max_receipts_per_request must be > 0".into()));
        }
        Ok(())
    }

    /// What a peer's Status must match, given our genesis.
    pub fn handshake_requirements(&self, genesis_hash: Hash) -> HandshakeRequirements {
        HandshakeRequirements {
            protocol_version: self.protocol_version,
            network_id: self.network_id,
            genesis_hash,
        }
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
