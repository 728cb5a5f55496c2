//! Structured logging.
//!
//! Every line carries the service name so logs from requesters and
//! responders can be merged and filtered by `correlation_key`.

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Handle returned once the global subscriber is installed.
#[derive(Debug)]
pub struct StructuredLogger {
    service_name: String,
    json: bool,
}

impl StructuredLogger {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn is_json(&self) -> bool {
        self.json
    }
}

/// Build the filter from the configured level.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter(e.to_string()))
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    let filter = env_filter(config)?;

    let result = if config.json_logs {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
    };
    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.full_service_name(),
        json_logs = config.json_logs,
        level = %config.log_level,
        "Logging initialized"
    );

    Ok(StructuredLogger {
        service_name: config.full_service_name(),
        json: config.json_logs,
    })
}

/// Log an RPC lifecycle event with the standard `correlation_key` field.
///
/// ```rust,ignore
/// log_rpc_event!(info, key, "Reply received", destination = "orders");
/// ```
#[macro_export]
macro_rules! log_rpc_event {
    ($level:ident, $key:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            correlation_key = %$key,
            $($($field)*,)?
            $msg
        )
    };
}
