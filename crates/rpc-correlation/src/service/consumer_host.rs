//! Hosts an [`RpcConsumer`] on a request destination.

use crate::adapters::request_consumer::RpcConsumer;
use crate::domain::config::RpcConfig;
use crate::domain::dispatch::DispatchTable;
use crate::error::RpcError;
use crate::metrics::ConsumerSnapshot;
use crate::service::reply_channel::ChannelState;
use parking_lot::{Mutex, RwLock};
use shared_bus::{ConnectionEvent, DestinationSpec, MessageTransport, Subscription};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Subscribes a consumer to a destination and keeps it subscribed across
/// reconnects.
pub struct ConsumerHost {
    destination: String,
    transport: Arc<dyn MessageTransport>,
    consumer: Arc<RpcConsumer>,
    state: RwLock<ChannelState>,
    subscription: AsyncMutex<Option<Subscription>>,
    lifecycle: AsyncMutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerHost {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        destination: impl Into<String>,
        dispatch: DispatchTable,
        config: &RpcConfig,
    ) -> Result<Arc<Self>, RpcError> {
        config.validate()?;
        let consumer = Arc::new(RpcConsumer::new(
            Arc::clone(&transport),
            Arc::new(dispatch),
            config.content_type()?,
            config.consumer_concurrency,
        ));
        Ok(Arc::new(Self {
            destination: destination.into(),
            transport,
            consumer,
            state: RwLock::new(ChannelState::Created),
            subscription: AsyncMutex::new(None),
            lifecycle: AsyncMutex::new(()),
            watcher: Mutex::new(None),
        }))
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn stats(&self) -> ConsumerSnapshot {
        self.consumer.stats()
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), RpcError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ChannelState::Created => {}
            ChannelState::Listening => return Ok(()),
            ChannelState::ShuttingDown | ChannelState::Closed => {
                return Err(RpcError::ChannelClosed(self.destination.clone()));
            }
        }

        let events = self.transport.connection_events();
        self.attach().await?;
        *self.state.write() = ChannelState::Listening;
        *self.watcher.lock() = Some(spawn_watcher(
            Arc::downgrade(self),
            self.destination.clone(),
            events,
        ));
        info!(destination = %self.destination, "Consumer started");
        Ok(())
    }

    async fn attach(&self) -> Result<(), RpcError> {
        self.transport
            .declare_destination(&DestinationSpec::queue(self.destination.clone()))
            .await?;
        let subscription = self
            .transport
            .subscribe(&self.destination, self.consumer.clone())
            .await?;
        *self.subscription.lock().await = Some(subscription);
        Ok(())
    }

    async fn reattach(&self) -> Result<(), RpcError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != ChannelState::Listening {
            return Ok(());
        }
        let mut slot = self.subscription.lock().await;
        if slot.as_ref().is_some_and(Subscription::is_active) {
            debug!(destination = %self.destination, "Consumer still attached");
            return Ok(());
        }
        let old = slot.take();
        drop(slot);
        if let Some(old) = old {
            old.unsubscribe().await;
        }
        self.attach().await?;
        info!(destination = %self.destination, "Consumer re-subscribed");
        Ok(())
    }

    /// Stop taking requests and wait for in-flight ones to reply.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.write();
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::ShuttingDown;
        }

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }
        self.consumer.wait_idle().await;

        *self.state.write() = ChannelState::Closed;
        info!(destination = %self.destination, "Consumer shut down");
    }
}

impl std::fmt::Debug for ConsumerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHost")
            .field("destination", &self.destination)
            .field("state", &self.state())
            .finish()
    }
}

fn spawn_watcher(
    host: Weak<ConsumerHost>,
    destination: String,
    events: broadcast::Receiver<ConnectionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(watch_connection(host, destination, events))
}

#[instrument(name = "consumer_watcher", skip_all, fields(destination = %destination))]
async fn watch_connection(
    host: Weak<ConsumerHost>,
    destination: String,
    mut events: broadcast::Receiver<ConnectionEvent>,
) {
    loop {
        let reattach = match events.recv().await {
            Ok(event) => event.requires_resubscribe(),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connection events lagged");
                true
            }
            Err(RecvError::Closed) => break,
        };
        if !reattach {
            continue;
        }
        let Some(host) = host.upgrade() else {
            break;
        };
        if let Err(err) = host.reattach().await {
            error!(error = %err, "Failed to re-subscribe consumer");
        }
    }
}
