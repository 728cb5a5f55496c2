//! # Subscriptions
//!
//! A `Subscription` is the handle returned by `MessageTransport::subscribe`.
//! Unsubscribing detaches it from the broker, lets the delivery loop drain
//! what was already handed to it, and waits for the loop to finish. Dropping
//! the handle detaches and aborts the loop.

use crate::transport::MessageHandler;
use futures::FutureExt;
use shared_types::BrokerMessage;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type DetachFn = Box<dyn FnOnce() + Send + Sync>;
type AttachedFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Handle for an active subscription.
pub struct Subscription {
    /// Broker-assigned identifier.
    id: u64,

    /// Destination being consumed.
    destination: String,

    /// Task pumping messages into the handler.
    delivery: Option<JoinHandle<()>>,

    /// Removes this consumer from the broker.
    detach: Option<DetachFn>,

    /// Asks the broker whether this consumer is still registered.
    attached: Option<AttachedFn>,
}

impl Subscription {
    /// Create a subscription handle.
    ///
    /// `detach` must stop the broker from handing new messages to the
    /// delivery loop; it runs at most once.
    pub fn new(
        id: u64,
        destination: impl Into<String>,
        delivery: JoinHandle<()>,
        detach: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            destination: destination.into(),
            delivery: Some(delivery),
            detach: Some(Box::new(detach)),
            attached: None,
        }
    }

    /// Let [`is_active`](Self::is_active) consult the broker's consumer list.
    ///
    /// Without it, a consumer the broker already dropped still reads as
    /// active until its delivery loop gets polled.
    #[must_use]
    pub fn with_attachment(mut self, attached: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.attached = Some(Box::new(attached));
        self
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether the delivery loop is still running.
    ///
    /// A loop stops when the broker drops the consumer (destination deleted,
    /// connection lost) or after `unsubscribe`. With an attachment check, a
    /// consumer the broker no longer lists is inactive right away.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let running = self.delivery.as_ref().is_some_and(|task| !task.is_finished());
        running && self.attached.as_ref().map_or(true, |attached| attached())
    }

    /// Stop listening and wait for in-progress deliveries to finish.
    pub async fn unsubscribe(mut self) {
        self.run_detach();

        if let Some(task) = self.delivery.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(destination = %self.destination, error = %e, "Delivery loop failed");
                }
            }
        }

        debug!(destination = %self.destination, subscription = self.id, "Unsubscribed");
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
        if let Some(task) = self.delivery.take() {
            task.abort();
            debug!(destination = %self.destination, subscription = self.id, "Subscription dropped");
        }
    }
}

/// Spawn the loop that hands each message of `inbox` to `handler`.
///
/// A panicking handler is logged and the loop continues with the next
/// message. The loop ends when every sender of `inbox` is gone.
pub fn spawn_delivery_loop(
    destination: String,
    mut inbox: mpsc::Receiver<BrokerMessage>,
    handler: Arc<dyn MessageHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let delivery = AssertUnwindSafe(handler.handle(message)).catch_unwind();
            if delivery.await.is_err() {
                error!(destination = %destination, "Message handler panicked, continuing");
            }
        }
        debug!(destination = %destination, "Delivery loop finished");
    })
}
