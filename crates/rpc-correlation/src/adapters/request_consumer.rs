//! Responder side: turns requests on a destination into handler calls and
//! publishes exactly one reply for each.

use crate::domain::config::MAX_CONSUMER_CONCURRENCY;
use crate::domain::dispatch::DispatchTable;
use crate::error::DispatchError;
use crate::metrics::{ConsumerSnapshot, ConsumerStats};
use async_trait::async_trait;
use shared_bus::{MessageHandler, MessageTransport};
use shared_types::{BrokerMessage, ContentType, CorrelationKey, ReplyEnvelope};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

struct ConsumerCore {
    transport: Arc<dyn MessageTransport>,
    dispatch: Arc<DispatchTable>,
    default_content_type: ContentType,
    stats: ConsumerStats,
}

/// Request consumer bound to a [`DispatchTable`].
///
/// Each request runs on its own task, at most `concurrency` at a time.
pub struct RpcConsumer {
    core: Arc<ConsumerCore>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl RpcConsumer {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        dispatch: Arc<DispatchTable>,
        default_content_type: ContentType,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.clamp(1, MAX_CONSUMER_CONCURRENCY);
        Self {
            core: Arc::new(ConsumerCore {
                transport,
                dispatch,
                default_content_type,
                stats: ConsumerStats::default(),
            }),
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn stats(&self) -> ConsumerSnapshot {
        self.core.stats.snapshot()
    }

    /// Requests currently being handled.
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Wait until every in-flight request has published its reply.
    pub async fn wait_idle(&self) {
        // Only fails once the semaphore is closed, which never happens here.
        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let _all = self.permits.acquire_many(permits).await;
    }
}

#[async_trait]
impl MessageHandler for RpcConsumer {
    async fn handle(&self, message: BrokerMessage) {
        let core = &self.core;
        core.stats.received.fetch_add(1, Ordering::Relaxed);

        let Some(reply_to) = message.properties.reply_destination().map(str::to_string) else {
            core.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                action = message.properties.action(),
                "Dropping request without reply destination"
            );
            return;
        };
        let Some(key) = message.properties.correlation_key() else {
            core.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(reply_to = %reply_to, "Dropping request without correlation key");
            return;
        };

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            core.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let core = Arc::clone(core);
        tokio::spawn(async move {
            let _permit = permit;
            core.process(key, reply_to, message).await;
        });
    }
}

impl ConsumerCore {
    #[instrument(
        name = "rpc_request",
        skip_all,
        fields(correlation_key = %key, reply_to = %reply_to)
    )]
    async fn process(&self, key: CorrelationKey, reply_to: String, message: BrokerMessage) {
        let BrokerMessage {
            payload,
            properties,
        } = message;
        let action = properties.action().map(str::to_string);

        let outcome = match properties.content_type.as_deref() {
            None => Ok(self.default_content_type),
            Some(value) => ContentType::parse(value).map_err(|source| {
                DispatchError::Deserialization {
                    action: action.clone().unwrap_or_default(),
                    source,
                }
            }),
        };
        let outcome = match outcome {
            Ok(content_type) => self
                .dispatch
                .dispatch(action.as_deref(), content_type, payload)
                .await
                .map(|body| (content_type, body)),
            Err(err) => Err(err),
        };

        let reply = match outcome {
            Ok((content_type, body)) => {
                debug!(correlation_key = %key, action = action.as_deref(), "Request handled");
                ReplyEnvelope::success(key.clone(), content_type.as_str(), body)
            }
            Err(err) => {
                warn!(
                    correlation_key = %key,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Request failed, sending error reply"
                );
                self.stats.error_replies.fetch_add(1, Ordering::Relaxed);
                ReplyEnvelope::error(key.clone(), err.kind(), err.to_string())
            }
        };

        // Reply publication failures are logged, never raised.
        let no_cancel = CancellationToken::new();
        match self
            .transport
            .publish(&reply_to, reply.into_message(), &no_cancel)
            .await
        {
            Ok(()) => {
                self.stats.replied.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats
                    .reply_publish_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    correlation_key = %key,
                    reply_to = %reply_to,
                    error = %err,
                    "Failed to publish reply"
                );
            }
        }
    }
}
