//! # Inbound Ports
//!
//! What the transport drives: lifecycle events and raw message delivery.

use async_trait::async_trait;

use crate::domain::{ConnectionId, LesError};

/// Subprotocol handler - inbound port.
///
/// All calls for one connection must be made in delivery order; calls for
/// different connections may run concurrently.
#[async_trait]
pub trait SubProtocolHandler: Send + Sync {
    /// A connection speaking this subprotocol was established.
    ///
    /// Sends our Status and starts tracking the connection.
    async fn handle_new_peer_connection(&self, connection_id: &ConnectionId)
        -> Result<(), LesError>;

    /// A message arrived on a tracked connection.
    async fn handle(
        &self,
        connection_id: &ConnectionId,
        message_type: u8,
        payload: &[u8],
    ) -> Result<(), LesError>;

    /// The connection is gone, whoever closed it. Purges its state.
    async fn handle_connection_closed(&self, connection_id: &ConnectionId) -> Result<(), LesError>;

    /// Disconnect every tracked peer and forget them.
    async fn stop(&self) -> Result<(), LesError>;
}
