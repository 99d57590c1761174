//! # LES Telemetry
//!
//! Logging and metrics for the LES subprotocol crates.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters and gauges, text exposition via
//!   [`encode_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use les_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `les` | Service name in log lines |
//! | `LES_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `LES_JSON_LOGS` | `false` | JSON log lines (default true in containers) |
//! | `LES_CONSOLE_OUTPUT` | `true` | Emit log lines at all |
//! | `LES_NETWORK` | `mainnet` | Network name |

#![warn(missing_docs)]

mod config;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, CONNECTIONS_ACTIVE, HANDSHAKES_COMPLETED, HEADERS_IMPORTED,
    MESSAGES_RECEIVED, MESSAGES_SENT, PROTOCOL_BREACHES,
};
pub use tracing_setup::{env_filter, init_test_tracing, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The global subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    TracerInit(String),

    /// Metric registration or encoding failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// The configuration could not be interpreted.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_tracing(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
