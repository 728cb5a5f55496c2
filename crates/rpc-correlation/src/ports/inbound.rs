//! Driving port: what callers use to issue RPCs.

use crate::error::RpcError;
use async_trait::async_trait;
use bytes::Bytes;
use shared_types::{ContentType, CorrelationKey};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A request body addressed to a destination.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub destination: String,
    pub action: String,
    pub payload: Bytes,
    /// Falls back to the configured default when `None`.
    pub content_type: Option<ContentType>,
}

impl OutboundRequest {
    pub fn new(
        destination: impl Into<String>,
        action: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            destination: destination.into(),
            action: action.into(),
            payload: payload.into(),
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// Per-send overrides.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    /// Caller-chosen key; a UUIDv7 is generated otherwise.
    pub correlation_key: Option<CorrelationKey>,
    /// Encoding for typed sends.
    pub content_type: Option<ContentType>,
}

impl SendOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub fn correlation_key(mut self, key: impl Into<CorrelationKey>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// Send a request and await the correlated reply bytes.
#[async_trait]
pub trait RpcRequester: Send + Sync {
    async fn send_request(
        &self,
        request: OutboundRequest,
        options: SendOptions,
    ) -> Result<Bytes, RpcError>;
}
