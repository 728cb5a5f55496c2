//! # In-Memory Broker
//!
//! Queue-semantics implementation of `MessageTransport`.
//!
//! - Each destination is a queue; every message goes to exactly one consumer
//!   (round-robin across competing consumers).
//! - Messages published while a destination has no consumer are held in a
//!   bounded backlog and handed to the next subscriber.
//! - Exclusive destinations accept a single consumer; auto-delete
//!   destinations disappear with their last consumer.
//! - `disconnect()` / `reconnect()` simulate a connection loss: consumers are
//!   dropped, non-durable destinations vanish, and `ConnectionEvent`s are
//!   broadcast so owners can replay entity creation.
//!
//! Suitable for single-process operation and tests; a networked broker
//! adapter implements the same trait.

use crate::events::ConnectionEvent;
use crate::subscriber::{spawn_delivery_loop, Subscription};
use crate::transport::{DestinationSpec, MessageHandler, MessageTransport, TransportError};
use crate::{DEFAULT_BACKLOG_LIMIT, DEFAULT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::BrokerMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type DestinationMap = Arc<RwLock<HashMap<String, Destination>>>;

struct Consumer {
    id: u64,
    sender: mpsc::Sender<BrokerMessage>,
}

struct Destination {
    spec: DestinationSpec,
    consumers: Vec<Consumer>,
    backlog: VecDeque<BrokerMessage>,
    next_consumer: usize,
}

impl Destination {
    fn new(spec: DestinationSpec) -> Self {
        Self {
            spec,
            consumers: Vec::new(),
            backlog: VecDeque::new(),
            next_consumer: 0,
        }
    }

    /// Pick the next consumer's sender, round-robin.
    fn next_sender(&mut self) -> Option<mpsc::Sender<BrokerMessage>> {
        if self.consumers.is_empty() {
            return None;
        }
        let index = self.next_consumer % self.consumers.len();
        self.next_consumer = self.next_consumer.wrapping_add(1);
        Some(self.consumers[index].sender.clone())
    }
}

/// In-memory broker.
pub struct InMemoryBroker {
    /// Declared destinations by name.
    destinations: DestinationMap,

    /// Connection state notifications.
    events: broadcast::Sender<ConnectionEvent>,

    /// Whether publishes and subscribes are currently accepted.
    connected: AtomicBool,

    /// Subscription id source.
    next_subscription_id: AtomicU64,

    /// Total messages accepted.
    messages_published: AtomicU64,

    /// Per-consumer channel capacity.
    capacity: usize,

    /// Per-destination backlog limit.
    backlog_limit: usize,
}

impl InMemoryBroker {
    /// Create a broker with default capacities.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY, DEFAULT_BACKLOG_LIMIT)
    }

    /// Create a broker with explicit capacities.
    #[must_use]
    pub fn with_capacity(capacity: usize, backlog_limit: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            destinations: Arc::new(RwLock::new(HashMap::new())),
            events,
            connected: AtomicBool::new(true),
            next_subscription_id: AtomicU64::new(1),
            messages_published: AtomicU64::new(0),
            capacity: capacity.max(1),
            backlog_limit,
        }
    }

    /// Whether a destination is declared.
    #[must_use]
    pub fn destination_exists(&self, name: &str) -> bool {
        self.destinations.read().contains_key(name)
    }

    /// Declared flags of a destination.
    #[must_use]
    pub fn destination_spec(&self, name: &str) -> Option<DestinationSpec> {
        self.destinations.read().get(name).map(|d| d.spec.clone())
    }

    /// Number of consumers attached to a destination.
    #[must_use]
    pub fn consumer_count(&self, name: &str) -> usize {
        self.destinations
            .read()
            .get(name)
            .map_or(0, |d| d.consumers.len())
    }

    /// Number of messages waiting for a consumer.
    #[must_use]
    pub fn backlog_len(&self, name: &str) -> usize {
        self.destinations
            .read()
            .get(name)
            .map_or(0, |d| d.backlog.len())
    }

    /// Total messages accepted by `publish`.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Simulate losing the broker connection.
    ///
    /// Every consumer is dropped and non-durable destinations are deleted,
    /// as a broker does for connection-scoped entities.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut destinations = self.destinations.write();
            destinations.retain(|_, d| d.spec.durable);
            for destination in destinations.values_mut() {
                destination.consumers.clear();
            }
        }
        warn!("In-memory broker disconnected");
        let _ = self.events.send(ConnectionEvent::Disconnected);
    }

    /// Simulate the connection coming back.
    pub fn reconnect(&self) {
        if self.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("In-memory broker reconnected");
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    /// Disconnect and immediately reconnect.
    pub fn simulate_reconnect(&self) {
        self.disconnect();
        self.reconnect();
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    /// Queue a message that found no live consumer.
    fn enqueue_backlog(&self, name: &str, message: BrokerMessage) -> Result<(), TransportError> {
        let mut destinations = self.destinations.write();
        let destination = destinations
            .get_mut(name)
            .ok_or_else(|| TransportError::DestinationNotFound(name.to_string()))?;

        if destination.backlog.len() >= self.backlog_limit {
            return Err(TransportError::PublishFailed {
                destination: name.to_string(),
                reason: format!("backlog limit {} reached", self.backlog_limit),
            });
        }
        destination.backlog.push_back(message);
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove consumer `id` from `name`, deleting auto-delete destinations that
/// become empty.
fn detach_consumer(destinations: &DestinationMap, name: &str, id: u64) {
    let mut destinations = destinations.write();
    let Some(destination) = destinations.get_mut(name) else {
        return;
    };

    destination.consumers.retain(|c| c.id != id);
    if destination.consumers.is_empty() && destination.spec.auto_delete {
        destinations.remove(name);
        debug!(destination = %name, "Auto-deleted destination");
    }
}

/// Whether consumer `id` is still registered on `name`.
fn is_attached(destinations: &DestinationMap, name: &str, id: u64) -> bool {
    destinations
        .read()
        .get(name)
        .is_some_and(|d| d.consumers.iter().any(|c| c.id == id))
}

#[async_trait]
impl MessageTransport for InMemoryBroker {
    async fn declare_destination(&self, spec: &DestinationSpec) -> Result<(), TransportError> {
        self.ensure_connected()?;

        let mut destinations = self.destinations.write();
        if !destinations.contains_key(&spec.name) {
            destinations.insert(spec.name.clone(), Destination::new(spec.clone()));
            debug!(
                destination = %spec.name,
                exclusive = spec.exclusive,
                auto_delete = spec.auto_delete,
                "Declared destination"
            );
        }
        Ok(())
    }

    async fn delete_destination(&self, name: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;

        if let Some(destination) = self.destinations.write().remove(name) {
            debug!(
                destination = %name,
                dropped_backlog = destination.backlog.len(),
                "Deleted destination"
            );
        }
        Ok(())
    }

    async fn publish(
        &self,
        destination: &str,
        message: BrokerMessage,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }
        self.ensure_connected()?;

        let sender = {
            let mut destinations = self.destinations.write();
            let target = destinations
                .get_mut(destination)
                .ok_or_else(|| TransportError::DestinationNotFound(destination.to_string()))?;
            target.next_sender()
        };

        let outcome = match sender {
            Some(sender) => {
                tokio::select! {
                    sent = sender.send(message) => match sent {
                        Ok(()) => Ok(()),
                        // Consumer went away between pick and send.
                        Err(mpsc::error::SendError(message)) => {
                            self.enqueue_backlog(destination, message)
                        }
                    },
                    () = cancel.cancelled() => Err(TransportError::Canceled),
                }
            }
            None => self.enqueue_backlog(destination, message),
        };

        if outcome.is_ok() {
            self.messages_published.fetch_add(1, Ordering::Relaxed);
            debug!(destination = %destination, "Message published");
        }
        outcome
    }

    async fn subscribe(
        &self,
        destination: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;

        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (sender, inbox) = mpsc::channel(self.capacity);

        {
            let mut destinations = self.destinations.write();
            let target = destinations
                .get_mut(destination)
                .ok_or_else(|| TransportError::DestinationNotFound(destination.to_string()))?;

            if target.spec.exclusive && !target.consumers.is_empty() {
                return Err(TransportError::ExclusiveDestination(destination.to_string()));
            }

            while let Some(message) = target.backlog.pop_front() {
                if let Err(e) = sender.try_send(message) {
                    // Channel full: keep the rest for the next round.
                    let message = match e {
                        mpsc::error::TrySendError::Full(m)
                        | mpsc::error::TrySendError::Closed(m) => m,
                    };
                    target.backlog.push_front(message);
                    break;
                }
            }

            target.consumers.push(Consumer { id, sender });
        }

        let delivery = spawn_delivery_loop(destination.to_string(), inbox, handler);
        let destinations = Arc::clone(&self.destinations);
        let name = destination.to_string();
        let lookup = Arc::clone(&self.destinations);
        let lookup_name = name.clone();

        debug!(destination = %destination, subscription = id, "Subscribed");

        let subscription = Subscription::new(id, destination, delivery, move || {
            detach_consumer(&destinations, &name, id);
        })
        .with_attachment(move || is_attached(&lookup, &lookup_name, id));
        Ok(subscription)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
