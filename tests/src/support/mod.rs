//! Shared fixtures for the integration suites.

use async_trait::async_trait;
use parking_lot::Mutex;
use rpc_correlation::{PendingRequestRegistry, RpcCommand};
use serde::{Deserialize, Serialize};
use shared_bus::{
    ConnectionEvent, DestinationSpec, InMemoryBroker, MessageHandler, MessageTransport,
    Subscription, TransportError,
};
use shared_types::{BrokerMessage, ContentType, ReplyEnvelope};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Destination the test responders consume.
pub const COMPUTE_QUEUE: &str = "compute";

/// `{"x": 42}` -> `{"y": 84}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compute {
    pub x: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computed {
    pub y: i64,
}

impl RpcCommand for Compute {
    const ACTION: &'static str = "compute.double";
    type Reply = Computed;
}

/// What the transport saw at the moment of one publish.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub destination: String,
    pub message: BrokerMessage,
    /// Whether the watched registry held the request's key at publish time.
    pub key_registered: Option<bool>,
}

/// In-memory broker with scripted publish failures and publish-time probes.
pub struct ScriptedTransport {
    inner: InMemoryBroker,
    failing: Mutex<HashSet<String>>,
    watched: Mutex<Option<Weak<PendingRequestRegistry>>>,
    published: Mutex<Vec<PublishRecord>>,
    subscribes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryBroker::new(),
            failing: Mutex::new(HashSet::new()),
            watched: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            subscribes: AtomicUsize::new(0),
        })
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.inner
    }

    /// Make every publish to `destination` fail.
    pub fn fail_publish_to(&self, destination: &str) {
        self.failing.lock().insert(destination.to_string());
    }

    /// Record registry membership of each request key at publish time.
    pub fn watch_registry(&self, registry: &Arc<PendingRequestRegistry>) {
        *self.watched.lock() = Some(Arc::downgrade(registry));
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.published.lock().clone()
    }

    /// Successful `subscribe` calls so far.
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn published_to(&self, destination: &str) -> usize {
        self.published
            .lock()
            .iter()
            .filter(|r| r.destination == destination)
            .count()
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn declare_destination(&self, spec: &DestinationSpec) -> Result<(), TransportError> {
        self.inner.declare_destination(spec).await
    }

    async fn delete_destination(&self, name: &str) -> Result<(), TransportError> {
        self.inner.delete_destination(name).await
    }

    async fn publish(
        &self,
        destination: &str,
        message: BrokerMessage,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let key_registered = {
            let watched = self.watched.lock();
            match (
                watched.as_ref().and_then(Weak::upgrade),
                message.properties.correlation_key(),
            ) {
                (Some(registry), Some(key)) => Some(registry.contains(key.as_str())),
                _ => None,
            }
        };
        self.published.lock().push(PublishRecord {
            destination: destination.to_string(),
            message: message.clone(),
            key_registered,
        });

        if self.failing.lock().contains(destination) {
            return Err(TransportError::PublishFailed {
                destination: destination.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.inner.publish(destination, message, cancel).await
    }

    async fn subscribe(
        &self,
        destination: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, TransportError> {
        let subscription = self.inner.subscribe(destination, handler).await?;
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(subscription)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connection_events()
    }
}

/// Hand-written responder: decodes `Compute` as raw JSON, doubles `x`,
/// replies on `reply_to` with the request's key.
pub struct EchoDoubler {
    transport: Arc<dyn MessageTransport>,
}

impl EchoDoubler {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Arc<Self> {
        Arc::new(Self { transport })
    }
}

#[async_trait]
impl MessageHandler for EchoDoubler {
    async fn handle(&self, message: BrokerMessage) {
        let (Some(key), Some(reply_to)) = (
            message.properties.correlation_key(),
            message.properties.reply_destination().map(str::to_string),
        ) else {
            return;
        };
        let request: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(v) => v,
            Err(_) => return,
        };
        let x = request["x"].as_i64().unwrap_or_default();
        let body = serde_json::json!({ "y": x * 2 }).to_string();
        let reply = ReplyEnvelope::success(key, ContentType::JSON, body).into_message();
        let _ = self
            .transport
            .publish(&reply_to, reply, &CancellationToken::new())
            .await;
    }
}

/// Responder that swallows every request.
pub struct BlackHole;

#[async_trait]
impl MessageHandler for BlackHole {
    async fn handle(&self, _message: BrokerMessage) {}
}

/// Declare `destination` and attach `handler` to it.
pub async fn serve(
    transport: &Arc<dyn MessageTransport>,
    destination: &str,
    handler: Arc<dyn MessageHandler>,
) -> Subscription {
    transport
        .declare_destination(&DestinationSpec::queue(destination))
        .await
        .expect("declare request destination");
    transport
        .subscribe(destination, handler)
        .await
        .expect("subscribe responder")
}
