//! # Transport Port
//!
//! The broker interface consumed by the correlation engine. Implementations
//! only deliver opaque `BrokerMessage`s; correlation, timeouts and error
//! replies live above this layer.

use crate::events::ConnectionEvent;
use crate::subscriber::Subscription;
use async_trait::async_trait;
use shared_types::BrokerMessage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The destination has not been declared (or was deleted).
    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    /// An exclusive destination already has a consumer.
    #[error("Destination {0} is exclusive and already has a consumer")]
    ExclusiveDestination(String),

    /// The broker refused or failed the publish.
    #[error("Publish to {destination} failed: {reason}")]
    PublishFailed { destination: String, reason: String },

    /// The broker connection is down.
    #[error("Broker connection lost")]
    Disconnected,

    /// The caller canceled the operation.
    #[error("Operation canceled")]
    Canceled,
}

/// Declaration of a broker destination (queue).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationSpec {
    /// Destination name.
    pub name: String,
    /// Only one consumer may subscribe.
    pub exclusive: bool,
    /// Deleted when its last consumer goes away.
    pub auto_delete: bool,
    /// Survives broker connection loss.
    pub durable: bool,
}

impl DestinationSpec {
    /// A shared, durable request destination.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exclusive: false,
            auto_delete: false,
            durable: true,
        }
    }

    /// An ephemeral reply destination owned by one requester.
    pub fn reply(name: impl Into<String>, exclusive: bool, auto_delete: bool) -> Self {
        Self {
            name: name.into(),
            exclusive,
            auto_delete,
            durable: false,
        }
    }
}

/// Callback for delivered messages.
///
/// Handlers cannot fail: whatever goes wrong while processing one message
/// must be dealt with inside `handle` so the receive loop keeps running.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BrokerMessage);
}

/// Broker transport.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Create a destination. Declaring an existing destination is a no-op.
    async fn declare_destination(&self, spec: &DestinationSpec) -> Result<(), TransportError>;

    /// Delete a destination. Deleting a missing destination is a no-op.
    async fn delete_destination(&self, name: &str) -> Result<(), TransportError>;

    /// Publish a message to a named destination.
    async fn publish(
        &self,
        destination: &str,
        message: BrokerMessage,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Start delivering messages of `destination` to `handler`.
    ///
    /// Once this returns, every message published afterwards is delivered.
    async fn subscribe(
        &self,
        destination: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, TransportError>;

    /// Stream of connection state changes.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}
