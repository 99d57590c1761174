//! LES as a multiplexed subprotocol: its identifier, its share of the
//! message code space and the factory for its handler.

use std::sync::Arc;

use crate::config::LesConfig;
use crate::domain::SubProtocolIdentifier;
use crate::ports::{ChainStore, TransportAdapter};
use crate::service::LesSubProtocolHandler;

/// Name LES registers under on the transport.
pub const LES_PROTOCOL_NAME: &str = "les";

/// Message codes LES/2 reserves on the transport.
pub const LES_MESSAGE_RANGE: u8 = 0x16;

#[derive(Debug, Clone)]
pub struct LesSubprotocol {
    config: LesConfig,
}

impl LesSubprotocol {
    pub fn new(config: LesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LesConfig {
        &self.config
    }

    pub fn id(&self) -> SubProtocolIdentifier {
        SubProtocolIdentifier::new(LES_PROTOCOL_NAME, self.config.protocol_version)
    }

    /// Whether a remote capability is one we can speak.
    pub fn supports(&self, identifier: &SubProtocolIdentifier) -> bool {
        identifier.name == LES_PROTOCOL_NAME && identifier.version == self.config.protocol_version
    }

    pub fn message_range(&self) -> u8 {
        LES_MESSAGE_RANGE
    }

    pub fn create_handler<T, C>(&self, transport: Arc<T>, chain: Arc<C>) -> LesSubProtocolHandler<T, C>
    where
        T: TransportAdapter,
        C: ChainStore,
    {
        LesSubProtocolHandler::new(self.config.clone(), transport, chain)
    }
}

impl Default for LesSubprotocol {
    fn default() -> Self {
        Self::new(LesConfig::default())
    }
}
