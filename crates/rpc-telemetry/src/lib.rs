//! # RPC Telemetry
//!
//! Structured logging for broker-RPC requesters and responders.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpc_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _logger = init_telemetry(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RPC_SERVICE_NAME` | `broker-rpc` | Service name in log lines |
//! | `RPC_INSTANCE_ID` | unset | Instance suffix |
//! | `RPC_LOG_LEVEL` | `info` | Log level filter |
//! | `RPC_JSON_LOGS` | `false` | JSON output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging, StructuredLogger};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Initialize telemetry for a service.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    init_logging(config)
}

/// Span covering one RPC exchange.
///
/// ```rust,ignore
/// let _span = rpc_span!("send", action = "orders.create").entered();
/// ```
#[macro_export]
macro_rules! rpc_span {
    ($name:expr $(, $($field:tt)*)?) => {
        tracing::info_span!($name $(, $($field)*)?)
    };
}
