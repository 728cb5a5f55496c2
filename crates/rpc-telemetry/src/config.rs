//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Instance identifier; distinguishes replicas of one service
    pub instance_id: Option<String>,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Include file and line in log lines
    pub source_location: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "broker-rpc".to_string(),
            instance_id: None,
            log_level: "info".to_string(),
            json_logs: false,
            source_location: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RPC_SERVICE_NAME`: Service name (default: broker-rpc)
    /// - `RPC_INSTANCE_ID`: Instance identifier (default: none)
    /// - `RPC_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `RPC_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `RPC_LOG_SOURCE`: Include file/line (default: false)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("RPC_SERVICE_NAME")
                .unwrap_or_else(|_| "broker-rpc".to_string()),

            instance_id: env::var("RPC_INSTANCE_ID").ok().filter(|v| !v.is_empty()),

            log_level: env::var("RPC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("RPC_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            source_location: env::var("RPC_LOG_SOURCE")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    /// Configuration for a named service.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }

    /// Service name with the instance suffix, if any.
    pub fn full_service_name(&self) -> String {
        match &self.instance_id {
            Some(id) => format!("{}-{}", self.service_name, id),
            None => self.service_name.clone(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
