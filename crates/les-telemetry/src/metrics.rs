//! Prometheus metrics for the LES subprotocol.
//!
//! All metrics follow the naming convention: `les_<area>_<metric>_<unit>`
//!
//! Metrics are usable before [`register_metrics`] is called; registration
//! only makes them visible to [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // MESSAGE METRICS
    // =========================================================================

    /// Inbound messages by message type
    pub static ref MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("les_messages_received_total", "LES messages received from peers"),
        &["message_type"]
    ).expect("metric creation failed");

    /// Outbound messages by message type
    pub static ref MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("les_messages_sent_total", "LES messages sent to peers"),
        &["message_type"]
    ).expect("metric creation failed");

    /// Headers written to the chain store from peer pushes
    pub static ref HEADERS_IMPORTED: Counter = Counter::new(
        "les_headers_imported_total",
        "Block headers received from peers and stored"
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTION METRICS
    // =========================================================================

    /// Connections currently tracked by the handler
    pub static ref CONNECTIONS_ACTIVE: Gauge = Gauge::new(
        "les_connections_active",
        "Number of peer connections tracked by the LES handler"
    ).expect("metric creation failed");

    /// Completed handshakes
    pub static ref HANDSHAKES_COMPLETED: Counter = Counter::new(
        "les_handshakes_completed_total",
        "Status exchanges that moved a connection to ready"
    ).expect("metric creation failed");

    /// Protocol breach disconnects by kind
    pub static ref PROTOCOL_BREACHES: CounterVec = CounterVec::new(
        Opts::new("les_protocol_breaches_total", "Peers disconnected for breach of protocol"),
        &["kind"]  // kind: message_before_status/duplicate_status/status_rejected/malformed
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Fails if called twice.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(MESSAGES_SENT.clone()),
        Box::new(HEADERS_IMPORTED.clone()),
        Box::new(CONNECTIONS_ACTIVE.clone()),
        Box::new(HANDSHAKES_COMPLETED.clone()),
        Box::new(PROTOCOL_BREACHES.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(())
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
