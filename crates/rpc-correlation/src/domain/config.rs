//! RPC engine configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use shared_types::ContentType;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Largest accepted `consumer_concurrency`: fits a semaphore and a `u32`
/// permit count.
pub const MAX_CONSUMER_CONCURRENCY: usize = if (u32::MAX as usize) < Semaphore::MAX_PERMITS {
    u32::MAX as usize
} else {
    Semaphore::MAX_PERMITS
};

/// Configuration shared by the requester and responder sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout applied when a send does not override it.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Content type used when a request does not declare one.
    pub default_content_type: String,
    /// Reply destinations are named `<prefix>.<instance id>`.
    pub reply_destination_prefix: String,
    /// Fixed instance id; a fresh UUID is used when absent.
    pub instance_id: Option<String>,
    /// Only this process may consume the reply destination.
    pub reply_exclusive: bool,
    /// Broker removes the reply destination when its consumer goes away.
    pub reply_auto_delete: bool,
    /// Delete the reply destination explicitly during shutdown.
    pub delete_reply_on_shutdown: bool,
    /// Maximum requests a consumer handles at once.
    pub consumer_concurrency: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            default_content_type: ContentType::JSON.to_string(),
            reply_destination_prefix: "rpc.reply".to_string(),
            instance_id: None,
            reply_exclusive: true,
            reply_auto_delete: true,
            delete_reply_on_shutdown: true,
            consumer_concurrency: 16,
        }
    }
}

impl RpcConfig {
    /// Build from defaults overridden by `RPC_*` environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("RPC_DEFAULT_TIMEOUT_MS") {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Ok(content_type) = std::env::var("RPC_CONTENT_TYPE") {
            config.default_content_type = content_type;
        }
        if let Ok(prefix) = std::env::var("RPC_REPLY_PREFIX") {
            config.reply_destination_prefix = prefix;
        }
        if let Ok(id) = std::env::var("RPC_INSTANCE_ID") {
            if !id.is_empty() {
                config.instance_id = Some(id);
            }
        }
        if let Some(n) = env_parse::<usize>("RPC_CONSUMER_CONCURRENCY") {
            config.consumer_concurrency = n;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout must be positive".to_string(),
            ));
        }
        if !(1..=MAX_CONSUMER_CONCURRENCY).contains(&self.consumer_concurrency) {
            return Err(ConfigError::InvalidConcurrency {
                got: self.consumer_concurrency,
                max: MAX_CONSUMER_CONCURRENCY,
            });
        }
        if self.reply_destination_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyReplyPrefix);
        }
        self.content_type()?;
        Ok(())
    }

    /// Parsed default content type.
    pub fn content_type(&self) -> Result<ContentType, ConfigError> {
        ContentType::parse(&self.default_content_type)
            .map_err(|_| ConfigError::UnsupportedContentType(self.default_content_type.clone()))
    }

    /// Name of this instance's reply destination.
    pub fn reply_destination(&self) -> String {
        let id = self
            .instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        format!("{}.{}", self.reply_destination_prefix, id)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.default_content_type = content_type.to_string();
        self
    }

    pub fn with_consumer_concurrency(mut self, concurrency: usize) -> Self {
        self.consumer_concurrency = concurrency;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
