//! Send path: register, publish, await the correlated reply.

use crate::domain::config::RpcConfig;
use crate::domain::dispatch::RpcCommand;
use crate::domain::pending::PendingRequest;
use crate::domain::registry::PendingRequestRegistry;
use crate::domain::routes::RouteTable;
use crate::error::{CancelReason, RpcError};
use crate::ports::inbound::{OutboundRequest, RpcRequester, SendOptions};
use crate::service::reply_channel::ReplyChannel;
use async_trait::async_trait;
use bytes::Bytes;
use shared_bus::{MessageTransport, TransportError};
use shared_types::{ContentType, CorrelationKey, RequestEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Removes the registry entry if the send exits early, including when the
/// caller drops the future.
struct RegistrationGuard<'a> {
    registry: &'a PendingRequestRegistry,
    key: CorrelationKey,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if self.registry.try_remove(self.key.as_str()).is_some() {
            self.registry.record_canceled();
            debug!(correlation_key = %self.key, "Removed abandoned pending request");
        }
    }
}

/// Issues requests over a transport and correlates the replies.
pub struct RpcPublisher {
    transport: Arc<dyn MessageTransport>,
    channel: Arc<ReplyChannel>,
    routes: RouteTable,
    default_timeout: Duration,
    default_content_type: ContentType,
}

impl RpcPublisher {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        channel: Arc<ReplyChannel>,
        routes: RouteTable,
        config: &RpcConfig,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        Ok(Self {
            transport,
            channel,
            routes,
            default_timeout: config.default_timeout,
            default_content_type: config.content_type()?,
        })
    }

    pub fn channel(&self) -> &Arc<ReplyChannel> {
        &self.channel
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send a typed command to its routed destination.
    pub async fn send<C: RpcCommand>(&self, command: &C) -> Result<C::Reply, RpcError> {
        self.send_with(command, SendOptions::default()).await
    }

    /// Send a typed command with per-call options.
    pub async fn send_with<C: RpcCommand>(
        &self,
        command: &C,
        options: SendOptions,
    ) -> Result<C::Reply, RpcError> {
        let destination = self
            .routes
            .destination_for(C::ACTION)
            .ok_or_else(|| RpcError::UnknownRoute(C::ACTION.to_string()))?;
        let content_type = options.content_type.unwrap_or(self.default_content_type);
        let payload = content_type
            .encode(command)
            .map_err(RpcError::Serialization)?;

        let key = options
            .correlation_key
            .clone()
            .unwrap_or_else(CorrelationKey::generate);
        let options = SendOptions {
            correlation_key: Some(key.clone()),
            ..options
        };
        let request = OutboundRequest {
            destination: destination.to_string(),
            action: C::ACTION.to_string(),
            payload,
            content_type: Some(content_type),
        };

        let reply = self.exchange(request, options).await?;
        content_type
            .decode::<C::Reply>(&reply)
            .map_err(|source| RpcError::ReplyDecode {
                correlation_key: key,
                source,
            })
    }

    fn validate_destination(&self, destination: &str) -> Result<(), RpcError> {
        if destination.trim().is_empty() {
            return Err(RpcError::InvalidDestination {
                destination: destination.to_string(),
                reason: "destination is empty",
            });
        }
        if destination == self.channel.name() {
            return Err(RpcError::InvalidDestination {
                destination: destination.to_string(),
                reason: "destination is this instance's reply destination",
            });
        }
        Ok(())
    }

    async fn exchange(
        &self,
        request: OutboundRequest,
        options: SendOptions,
    ) -> Result<Bytes, RpcError> {
        self.validate_destination(&request.destination)?;
        self.channel.ensure_listening()?;

        let registry = self.channel.registry();
        let key = options
            .correlation_key
            .unwrap_or_else(CorrelationKey::generate);
        // A blank key is read as absent on the wire and the responder drops
        // the request.
        if key.as_str().trim().is_empty() {
            return Err(RpcError::InvalidCorrelationKey(key));
        }
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let content_type = request.content_type.unwrap_or(self.default_content_type);

        // Registered before publishing so a fast reply always finds its entry.
        let (pending, reply) = PendingRequest::create(
            key.clone(),
            request.destination.clone(),
            timeout,
            options.cancellation.clone(),
        );
        registry.register(pending)?;
        let _guard = RegistrationGuard {
            registry,
            key: key.clone(),
        };

        let message = RequestEnvelope {
            correlation_key: key.clone(),
            action: request.action.clone(),
            reply_to: self.channel.name().to_string(),
            content_type: content_type.as_str().to_string(),
            payload: request.payload,
        }
        .into_message();

        debug!(
            correlation_key = %key,
            destination = %request.destination,
            action = %request.action,
            timeout_ms = timeout.as_millis(),
            "Publishing request"
        );

        let publish_cancel = options.cancellation.unwrap_or_default();
        if let Err(err) = self
            .transport
            .publish(&request.destination, message, &publish_cancel)
            .await
        {
            // The watchdog may already have settled a canceled request.
            let removed = registry.try_remove(key.as_str()).is_some();
            if err == TransportError::Canceled {
                if removed {
                    registry.record_canceled();
                }
                return Err(RpcError::Canceled {
                    correlation_key: key,
                    reason: CancelReason::Caller,
                });
            }
            if removed {
                registry.record_send_failure();
            }
            warn!(
                correlation_key = %key,
                destination = %request.destination,
                error = %err,
                "Failed to publish request"
            );
            return Err(RpcError::SendFailure {
                correlation_key: key,
                destination: request.destination,
                source: err,
            });
        }

        let outcome = reply.wait().await;
        if matches!(outcome, Err(RpcError::Canceled { .. })) {
            registry.try_remove(key.as_str());
        }
        outcome
    }
}

#[async_trait]
impl RpcRequester for RpcPublisher {
    async fn send_request(
        &self,
        request: OutboundRequest,
        options: SendOptions,
    ) -> Result<Bytes, RpcError> {
        self.exchange(request, options).await
    }
}

impl std::fmt::Debug for RpcPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPublisher")
            .field("reply_to", &self.channel.name())
            .field("routes", &self.routes.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
