//! # LES Subprotocol Handler
//!
//! The per-connection state machine of LES/2.
//!
//! ## Flow
//!
//! ```text
//! new connection ──▶ send our Status ──▶ AwaitingStatus
//!                                           │ peer Status (valid)
//!                                           ▼
//!                                         Ready ◀─┐ requests served,
//!                                           │     │ headers imported,
//!                                           │     └ announces recorded
//!                          breach ──────────┴──▶ Closed
//! ```
//!
//! ## Protocol Breaches
//!
//! Each of these disconnects the peer with `BreachOfProtocol` and returns
//! [`LesError::ProtocolBreach`]:
//! 1. Any message other than Status before the handshake
//! 2. A second Status
//! 3. A Status for another version, network or genesis
//! 4. A payload that does not decode
//!
//! ## Concurrency
//!
//! Each connection's state sits behind its own async mutex, held for the
//! whole of one message. Different connections never contend. When the
//! transport reports a connection gone, its slot is flagged closed; work
//! still running for it stops before sending or storing anything more.

mod dispatcher;
mod serve;
mod table;

#[cfg(test)]
mod tests;

pub use dispatcher::{Completion, InboundDispatcher};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use les_telemetry::{
    metric_inc, CONNECTIONS_ACTIVE, HANDSHAKES_COMPLETED, HEADERS_IMPORTED, MESSAGES_RECEIVED,
    MESSAGES_SENT, PROTOCOL_BREACHES,
};
use shared_types::BlockHeader;

use crate::codec;
use crate::config::LesConfig;
use crate::domain::{
    validate_status, BlockBodiesMessage, BlockHeadersMessage, BreachKind, ConnectionId,
    ConnectionState, DisconnectReason, FlowControlBuffer, LesError, LesMessage, MessageType,
    Phase, ReceiptsMessage, StatusMessage, SubProtocolIdentifier,
};
use crate::ports::{ChainStore, SubProtocolHandler, TransportAdapter};

use table::{ConnectionSlot, ConnectionTable};

/// LES/2 handler.
///
/// ## Dependencies
///
/// - `T: TransportAdapter` - sends replies and disconnects peers
/// - `C: ChainStore` - answers requests, stores imported headers
pub struct LesSubProtocolHandler<T, C>
where
    T: TransportAdapter,
    C: ChainStore,
{
    config: LesConfig,
    protocol: SubProtocolIdentifier,
    transport: Arc<T>,
    chain: Arc<C>,
    connections: ConnectionTable,
}

impl<T, C> LesSubProtocolHandler<T, C>
where
    T: TransportAdapter,
    C: ChainStore,
{
    pub fn new(config: LesConfig, transport: Arc<T>, chain: Arc<C>) -> Self {
        let protocol = SubProtocolIdentifier::new(crate::LES_PROTOCOL_NAME, config.protocol_version);
        Self {
            config,
            protocol,
            transport,
            chain,
            connections: ConnectionTable::new(),
        }
    }

    pub fn config(&self) -> &LesConfig {
        &self.config
    }

    pub fn protocol(&self) -> &SubProtocolIdentifier {
        &self.protocol
    }

    /// Number of tracked connections, closed ones included.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_tracked(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains(connection_id)
    }

    /// Current phase of a tracked connection.
    ///
    /// Waits for any message being handled on it.
    pub async fn connection_phase(&self, connection_id: &ConnectionId) -> Option<Phase> {
        let slot = self.connections.get(connection_id)?;
        let phase = slot.state().lock().await.phase;
        Some(phase)
    }

    /// Snapshot of a tracked connection's state.
    pub async fn connection_state(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        let slot = self.connections.get(connection_id)?;
        let state = slot.state().lock().await.clone();
        Some(state)
    }

    fn new_flow_control(&self) -> FlowControlBuffer {
        FlowControlBuffer::new(
            self.config.flow_control_buffer_limit,
            self.config.flow_control_max_request_cost,
            self.config.flow_control_min_recharge,
            Instant::now(),
        )
    }

    /// Our Status, from the chain head and the configuration.
    async fn local_status(&self) -> Result<StatusMessage, LesError> {
        let head = self.chain.chain_head().await?;
        let genesis_hash = self.chain.genesis_hash().await?;
        Ok(StatusMessage {
            protocol_version: self.config.protocol_version,
            network_id: self.config.network_id,
            head_td: head.total_difficulty,
            head_hash: head.hash,
            head_number: head.number,
            genesis_hash,
            serve_headers: self.config.serve_headers,
            serve_chain_since: self.config.serve_chain_since,
            serve_state_since: self.config.serve_state_since,
            tx_relay: self.config.tx_relay,
            flow_control_buffer_limit: self.config.flow_control_buffer_limit,
            flow_control_maximum_request_cost_table: self.config.flow_control_max_request_cost,
            flow_control_minimum_rate_of_recharge: self.config.flow_control_min_recharge,
            announce_type: self.config.announce_type,
        })
    }

    async fn send(&self, connection_id: &ConnectionId, message: LesMessage) -> Result<(), LesError> {
        let message_type = message.message_type();
        self.transport
            .send(
                &self.protocol,
                message_type.code(),
                connection_id,
                codec::encode(&message),
            )
            .await?;
        metric_inc!(MESSAGES_SENT, &[message_type.name()]);
        tracing::debug!(
            connection_id = %connection_id,
            message_type = message_type.name(),
            "[les] Sent message"
        );
        Ok(())
    }

    /// Send a reply unless the connection went away while it was built.
    async fn reply(
        &self,
        slot: &ConnectionSlot,
        connection_id: &ConnectionId,
        message: LesMessage,
    ) -> Result<(), LesError> {
        if slot.is_closed() {
            tracing::debug!(
                connection_id = %connection_id,
                "[les] Connection closed, dropping {} reply",
                message.message_type().name()
            );
            return Ok(());
        }
        self.send(connection_id, message).await
    }

    /// Close the connection and disconnect the peer for a breach.
    async fn breach(
        &self,
        slot: &ConnectionSlot,
        state: &mut ConnectionState,
        kind: BreachKind,
    ) -> LesError {
        state.close();
        slot.mark_closed();
        metric_inc!(PROTOCOL_BREACHES, &[kind.label()]);
        tracing::warn!(
            connection_id = %state.connection_id,
            "[les] Protocol breach: {}",
            kind
        );

        if let Err(e) = self
            .transport
            .disconnect(&state.connection_id, DisconnectReason::BreachOfProtocol)
            .await
        {
            tracing::warn!(
                connection_id = %state.connection_id,
                "[les] Disconnect after breach failed: {}",
                e
            );
        }

        LesError::ProtocolBreach {
            connection_id: state.connection_id.clone(),
            kind,
        }
    }

    async fn on_status(
        &self,
        slot: &ConnectionSlot,
        state: &mut ConnectionState,
        status: StatusMessage,
    ) -> Result<(), LesError> {
        let genesis_hash = self.chain.genesis_hash().await?;
        let required = self.config.handshake_requirements(genesis_hash);
        if let Err(rejection) = validate_status(&required, &status) {
            return Err(self
                .breach(slot, state, BreachKind::StatusRejected(rejection))
                .await);
        }
        if slot.is_closed() {
            return Ok(());
        }

        tracing::info!(
            connection_id = %state.connection_id,
            head_number = %status.head_number,
            serve_headers = status.serve_headers,
            "[les] Handshake complete"
        );
        state.complete_handshake(status);
        state.flow_control = self.new_flow_control();
        metric_inc!(HANDSHAKES_COMPLETED);
        Ok(())
    }

    /// Store every header we do not have yet.
    async fn import_headers(
        &self,
        slot: &ConnectionSlot,
        connection_id: &ConnectionId,
        headers: &[BlockHeader],
    ) -> Result<(), LesError> {
        let mut imported = 0u64;
        for header in headers {
            if self.chain.retrieve_block_header(&header.hash()).await?.is_some() {
                continue;
            }
            if slot.is_closed() {
                break;
            }
            self.chain.store_block_header(header).await?;
            imported += 1;
        }

        HEADERS_IMPORTED.inc_by(imported as f64);
        tracing::debug!(
            connection_id = %connection_id,
            received = headers.len(),
            imported,
            "[les] Imported block headers"
        );
        Ok(())
    }

    /// Handle a decoded message on a ready connection.
    async fn on_message(
        &self,
        slot: &ConnectionSlot,
        state: &mut ConnectionState,
        message: LesMessage,
    ) -> Result<(), LesError> {
        let connection_id = state.connection_id.clone();

        match message {
            // Phase checks run before decoding; Status never reaches here.
            LesMessage::Status(_) => Ok(()),

            LesMessage::Announce(announce) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    head_number = %announce.head_number,
                    "[les] Peer announced new head"
                );
                state.record_announce(&announce);
                Ok(())
            }

            LesMessage::GetBlockHeaders(request) => {
                let headers = serve::collect_headers(
                    self.chain.as_ref(),
                    &request.query,
                    self.config.max_headers_per_request,
                )
                .await?;
                let buffer_value = state.flow_control.charge(Instant::now());
                let reply = LesMessage::BlockHeaders(BlockHeadersMessage {
                    request_id: request.request_id,
                    buffer_value,
                    headers,
                });
                self.reply(slot, &connection_id, reply).await
            }

            LesMessage::GetBlockBodies(request) => {
                let bodies = serve::collect_bodies(
                    self.chain.as_ref(),
                    &request.hashes,
                    self.config.max_bodies_per_request,
                )
                .await?;
                let buffer_value = state.flow_control.charge(Instant::now());
                let reply = LesMessage::BlockBodies(BlockBodiesMessage {
                    request_id: request.request_id,
                    buffer_value,
                    bodies,
                });
                self.reply(slot, &connection_id, reply).await
            }

            LesMessage::GetReceipts(request) => {
                let receipts = serve::collect_receipts(
                    self.chain.as_ref(),
                    &request.hashes,
                    self.config.max_receipts_per_request,
                )
                .await?;
                let buffer_value = state.flow_control.charge(Instant::now());
                let reply = LesMessage::Receipts(ReceiptsMessage {
                    request_id: request.request_id,
                    buffer_value,
                    receipts,
                });
                self.reply(slot, &connection_id, reply).await
            }

            LesMessage::BlockHeaders(response) => {
                self.import_headers(slot, &connection_id, &response.headers)
                    .await
            }

            // Nothing requests these, so there is nothing to match them to.
            LesMessage::BlockBodies(response) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    request_id = response.request_id,
                    bodies = response.bodies.len(),
                    "[les] Ignoring unsolicited block bodies"
                );
                Ok(())
            }
            LesMessage::Receipts(response) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    request_id = response.request_id,
                    receipts = response.receipts.len(),
                    "[les] Ignoring unsolicited receipts"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<T, C> SubProtocolHandler for LesSubProtocolHandler<T, C>
where
    T: TransportAdapter,
    C: ChainStore,
{
    async fn handle_new_peer_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<(), LesError> {
        let slot = Arc::new(ConnectionSlot::new(ConnectionState::new(
            connection_id.clone(),
            self.new_flow_control(),
        )));
        // Held until our Status is out, so no message for this connection
        // is handled before it.
        let _state = slot.state().lock().await;
        self.connections
            .insert(connection_id.clone(), Arc::clone(&slot))?;
        CONNECTIONS_ACTIVE.inc();

        let sent = match self.local_status().await {
            Ok(status) => {
                self.reply(&slot, connection_id, LesMessage::Status(status))
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            slot.mark_closed();
            if self.connections.remove_slot(connection_id, &slot) {
                CONNECTIONS_ACTIVE.dec();
            }
            tracing::warn!(
                connection_id = %connection_id,
                "[les] Could not send status: {}",
                e
            );
            return Err(e);
        }

        tracing::info!(connection_id = %connection_id, "[les] New peer connection");
        Ok(())
    }

    async fn handle(
        &self,
        connection_id: &ConnectionId,
        message_type: u8,
        payload: &[u8],
    ) -> Result<(), LesError> {
        let slot = self
            .connections
            .get(connection_id)
            .ok_or_else(|| LesError::UnknownConnection(connection_id.clone()))?;
        let mut state = slot.state().lock().await;
        if slot.is_closed() || state.phase == Phase::Closed {
            return Err(LesError::ConnectionClosed(connection_id.clone()));
        }

        let label = MessageType::from_code(message_type)
            .map(MessageType::name)
            .unwrap_or("unknown");
        metric_inc!(MESSAGES_RECEIVED, &[label]);
        tracing::debug!(
            connection_id = %connection_id,
            message_type = label,
            size = payload.len(),
            "[les] Received message"
        );

        let is_status = message_type == MessageType::Status.code();
        match state.phase {
            Phase::AwaitingStatus if !is_status => {
                return Err(self
                    .breach(&slot, &mut state, BreachKind::MessageBeforeStatus(message_type))
                    .await);
            }
            Phase::Ready if is_status => {
                return Err(self
                    .breach(&slot, &mut state, BreachKind::DuplicateStatus)
                    .await);
            }
            _ => {}
        }

        let message = match codec::decode(message_type, payload) {
            Ok(message) => message,
            Err(e) => {
                return Err(self
                    .breach(&slot, &mut state, BreachKind::Malformed(e))
                    .await);
            }
        };

        match message {
            LesMessage::Status(status) => self.on_status(&slot, &mut state, status).await,
            other => self.on_message(&slot, &mut state, other).await,
        }
    }

    async fn handle_connection_closed(&self, connection_id: &ConnectionId) -> Result<(), LesError> {
        match self.connections.remove(connection_id) {
            Some(slot) => {
                slot.mark_closed();
                CONNECTIONS_ACTIVE.dec();
                tracing::info!(connection_id = %connection_id, "[les] Connection closed");
            }
            None => {
                tracing::debug!(
                    connection_id = %connection_id,
                    "[les] Close event for untracked connection"
                );
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), LesError> {
        let drained = self.connections.drain();
        let count = drained.len();

        for (connection_id, slot) in drained {
            slot.mark_closed();
            CONNECTIONS_ACTIVE.dec();
            if let Err(e) = self
                .transport
                .disconnect(&connection_id, DisconnectReason::ClientQuitting)
                .await
            {
                tracing::warn!(
                    connection_id = %connection_id,
                    "[les] Disconnect on stop failed: {}",
                    e
                );
            }
        }

        tracing::info!("[les] Handler stopped, {} connections dropped", count);
        Ok(())
    }
}
