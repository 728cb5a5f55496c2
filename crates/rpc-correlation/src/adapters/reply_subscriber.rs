//! Receive path: matches replies on the reply destination to pending requests.

use crate::domain::registry::PendingRequestRegistry;
use async_trait::async_trait;
use shared_bus::MessageHandler;
use shared_types::{BrokerMessage, ReplyEnvelope, ReplyOutcome};
use std::sync::Arc;
use tracing::warn;

/// What happened to one delivered reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// Handed to the waiting caller.
    Delivered,
    /// No pending entry; late, duplicate or foreign reply.
    Orphaned,
    /// The message carried no correlation key.
    Uncorrelated,
}

/// Subscriber attached to a reply destination.
#[derive(Debug, Clone)]
pub struct ReplySubscriber {
    registry: Arc<PendingRequestRegistry>,
}

impl ReplySubscriber {
    pub fn new(registry: Arc<PendingRequestRegistry>) -> Self {
        Self { registry }
    }

    /// Route one reply to its pending request. Never fails.
    pub fn on_reply(&self, message: BrokerMessage) -> ReplyDisposition {
        let Some(reply) = ReplyEnvelope::from_message(message) else {
            warn!("Discarding reply without a correlation key");
            return ReplyDisposition::Uncorrelated;
        };

        let key = reply.correlation_key.as_str();
        let delivered = match reply.outcome {
            ReplyOutcome::Success { payload, .. } => self.registry.complete(key, payload),
            ReplyOutcome::Error { kind, message } => self.registry.fail(key, kind, message),
        };

        if delivered {
            ReplyDisposition::Delivered
        } else {
            ReplyDisposition::Orphaned
        }
    }
}

#[async_trait]
impl MessageHandler for ReplySubscriber {
    async fn handle(&self, message: BrokerMessage) {
        self.on_reply(message);
    }
}
