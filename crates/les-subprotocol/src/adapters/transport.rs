//! Recording transport.
//!
//! Captures every outbound call instead of touching the network. Used by
//! the test suites and by embedders that drive the handler by hand.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::codec::{self, DecodeError};
use crate::domain::{
    ConnectionId, DisconnectReason, LesMessage, SubProtocolIdentifier, TransportError,
};
use crate::ports::TransportAdapter;

/// One message handed to [`TransportAdapter::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub protocol: SubProtocolIdentifier,
    pub message_type: u8,
    pub connection_id: ConnectionId,
    pub payload: Vec<u8>,
}

impl SentMessage {
    /// Decode the payload with the LES codec.
    pub fn decode(&self) -> Result<LesMessage, DecodeError> {
        codec::decode(self.message_type, &self.payload)
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    broadcasts: Mutex<Vec<(u8, Vec<u8>)>>,
    disconnects: Mutex<Vec<(ConnectionId, DisconnectReason)>>,
    dialed: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    running: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, connection_id: &ConnectionId) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| &m.connection_id == connection_id)
            .cloned()
            .collect()
    }

    pub fn last_sent(&self, connection_id: &ConnectionId) -> Option<SentMessage> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| &m.connection_id == connection_id)
            .cloned()
    }

    pub fn broadcasts(&self) -> Vec<(u8, Vec<u8>)> {
        self.broadcasts.lock().clone()
    }

    pub fn disconnects(&self) -> Vec<(ConnectionId, DisconnectReason)> {
        self.disconnects.lock().clone()
    }

    pub fn dialed(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.dialed.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.sent.lock().clear();
        self.broadcasts.lock().clear();
        self.disconnects.lock().clear();
        self.dialed.lock().clear();
    }
}

#[async_trait]
impl TransportAdapter for RecordingTransport {
    async fn send(
        &self,
        protocol: &SubProtocolIdentifier,
        message_type: u8,
        connection_id: &ConnectionId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send(format!("injected failure to {}", connection_id)));
        }
        self.sent.lock().push(SentMessage {
            protocol: protocol.clone(),
            message_type,
            connection_id: connection_id.clone(),
            payload,
        });
        Ok(())
    }

    async fn broadcast(
        &self,
        _protocol: &SubProtocolIdentifier,
        message_type: u8,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.broadcasts.lock().push((message_type, payload));
        Ok(())
    }

    async fn disconnect(
        &self,
        connection_id: &ConnectionId,
        reason: DisconnectReason,
    ) -> Result<(), TransportError> {
        self.disconnects.lock().push((connection_id.clone(), reason));
        Ok(())
    }

    async fn connect_to(&self, peer_key: &[u8], address: SocketAddr) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        self.dialed.lock().push((peer_key.to_vec(), address));
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
