//! Error types for the RPC correlation engine.
//!
//! `RpcError` is what a caller awaiting a reply can observe. `DispatchError`
//! stays on the responder side and is turned into an error reply at the
//! transport boundary. `ConfigError` covers construction-time validation.

use shared_bus::TransportError;
use shared_types::{CodecError, CorrelationKey, RemoteErrorKind};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a pending request was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Caller,
    /// The reply channel is shutting down.
    Shutdown,
    /// The pending request was dropped without being resolved.
    Abandoned,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Caller => "canceled by caller",
            Self::Shutdown => "reply channel shutting down",
            Self::Abandoned => "pending request abandoned",
        };
        f.write_str(reason)
    }
}

/// Errors surfaced to a caller awaiting an RPC.
#[derive(Debug, Error, Clone)]
pub enum RpcError {
    /// Publishing the request failed; nothing is left registered.
    #[error("Failed to send request {correlation_key} to {destination}: {source}")]
    SendFailure {
        correlation_key: CorrelationKey,
        destination: String,
        source: TransportError,
    },

    /// No reply arrived within the configured window.
    #[error(
        "Request {correlation_key} to {destination} timed out after {}ms",
        .timeout.as_millis()
    )]
    Timeout {
        correlation_key: CorrelationKey,
        destination: String,
        timeout: Duration,
    },

    /// The request was canceled before a reply arrived.
    #[error("Request {correlation_key} canceled: {reason}")]
    Canceled {
        correlation_key: CorrelationKey,
        reason: CancelReason,
    },

    /// The responder replied with an error indicator.
    #[error("Remote error for request {correlation_key}: {message}")]
    RemoteError {
        correlation_key: CorrelationKey,
        kind: Option<RemoteErrorKind>,
        message: String,
    },

    /// Another request with the same key is already in flight.
    #[error("Correlation key {0} is already pending")]
    DuplicateKey(CorrelationKey),

    /// A caller-supplied key that would travel as no key at all.
    #[error("Correlation key {:?} is blank", .0.as_str())]
    InvalidCorrelationKey(CorrelationKey),

    /// The destination cannot receive requests.
    #[error("Destination {destination:?} is not publishable: {reason}")]
    InvalidDestination {
        destination: String,
        reason: &'static str,
    },

    /// No destination is routed for the command's action.
    #[error("No route registered for action {0}")]
    UnknownRoute(String),

    /// The outgoing command could not be encoded.
    #[error("Failed to encode request: {0}")]
    Serialization(CodecError),

    /// The reply payload did not decode into the declared result type.
    #[error("Failed to decode reply for request {correlation_key}: {source}")]
    ReplyDecode {
        correlation_key: CorrelationKey,
        source: CodecError,
    },

    /// The reply channel has not been started.
    #[error("Reply channel {0} is not listening")]
    NotStarted(String),

    /// The reply channel has been shut down.
    #[error("Reply channel {0} is closed")]
    ChannelClosed(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Entity lifecycle operation failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RpcError {
    /// Correlation key of the request this error belongs to, if any.
    pub fn correlation_key(&self) -> Option<&CorrelationKey> {
        match self {
            Self::SendFailure {
                correlation_key, ..
            }
            | Self::Timeout {
                correlation_key, ..
            }
            | Self::Canceled {
                correlation_key, ..
            }
            | Self::RemoteError {
                correlation_key, ..
            }
            | Self::ReplyDecode {
                correlation_key, ..
            } => Some(correlation_key),
            Self::DuplicateKey(key) | Self::InvalidCorrelationKey(key) => Some(key),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteError { .. })
    }

    #[must_use]
    pub fn is_send_failure(&self) -> bool {
        matches!(self, Self::SendFailure { .. })
    }
}

/// Responder-side failure while handling one request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("request carries no action header")]
    MissingAction,

    #[error("no handler registered for action '{action}'")]
    HandlerNotFound { action: String },

    #[error("cannot decode request for action '{action}': {source}")]
    Deserialization { action: String, source: CodecError },

    #[error("handler for action '{action}' failed: {message}")]
    HandlerFailed { action: String, message: String },

    #[error("handler for action '{action}' panicked")]
    HandlerPanicked { action: String },

    #[error("cannot encode response of action '{action}': {source}")]
    Serialization { action: String, source: CodecError },
}

impl DispatchError {
    /// Wire category for the error reply.
    #[must_use]
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            Self::MissingAction => RemoteErrorKind::MissingAction,
            Self::HandlerNotFound { .. } => RemoteErrorKind::HandlerNotFound,
            Self::Deserialization { .. } => RemoteErrorKind::Deserialization,
            Self::HandlerFailed { .. } => RemoteErrorKind::HandlerFailed,
            Self::HandlerPanicked { .. } => RemoteErrorKind::HandlerPanicked,
            Self::Serialization { .. } => RemoteErrorKind::Serialization,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("consumer_concurrency must be between 1 and {max}, got {got}")]
    InvalidConcurrency { got: usize, max: usize },

    #[error("reply_destination_prefix cannot be empty")]
    EmptyReplyPrefix,

    #[error("unsupported default content type: {0}")]
    UnsupportedContentType(String),

    #[error("handler for action '{0}' registered twice")]
    DuplicateHandler(String),

    #[error("action '{0}' routed twice")]
    DuplicateRoute(String),

    #[error("route for action '{0}' has an empty destination")]
    EmptyRouteDestination(String),
}
