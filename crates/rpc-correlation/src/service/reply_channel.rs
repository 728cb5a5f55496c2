//! Reply destination lifecycle for one requester instance.
//!
//! States move `Created -> Listening -> ShuttingDown -> Closed`. Shutdown
//! stops receiving first, then settles every pending request with
//! [`CancelReason::Shutdown`], then removes the destination.

use crate::adapters::reply_subscriber::ReplySubscriber;
use crate::domain::config::RpcConfig;
use crate::domain::registry::PendingRequestRegistry;
use crate::error::{CancelReason, RpcError};
use parking_lot::{Mutex, RwLock};
use shared_bus::{ConnectionEvent, DestinationSpec, MessageTransport, Subscription};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle state of a [`ReplyChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Listening,
    ShuttingDown,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Listening => "listening",
            Self::ShuttingDown => "shutting-down",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Descriptor of the per-instance reply destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEntity {
    pub name: String,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl ReplyEntity {
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            name: config.reply_destination(),
            exclusive: config.reply_exclusive,
            auto_delete: config.reply_auto_delete,
        }
    }

    pub fn spec(&self) -> DestinationSpec {
        DestinationSpec::reply(self.name.clone(), self.exclusive, self.auto_delete)
    }
}

/// The reply destination, its subscription and its pending requests.
pub struct ReplyChannel {
    entity: ReplyEntity,
    transport: Arc<dyn MessageTransport>,
    registry: Arc<PendingRequestRegistry>,
    delete_on_shutdown: bool,
    state: RwLock<ChannelState>,
    subscription: AsyncMutex<Option<Subscription>>,
    /// Serializes start, resubscribe and shutdown.
    lifecycle: AsyncMutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ReplyChannel {
    pub fn new(transport: Arc<dyn MessageTransport>, config: &RpcConfig) -> Arc<Self> {
        Self::with_entity(transport, ReplyEntity::from_config(config), config)
    }

    pub fn with_entity(
        transport: Arc<dyn MessageTransport>,
        entity: ReplyEntity,
        config: &RpcConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity,
            transport,
            registry: PendingRequestRegistry::new(),
            delete_on_shutdown: config.delete_reply_on_shutdown,
            state: RwLock::new(ChannelState::Created),
            subscription: AsyncMutex::new(None),
            lifecycle: AsyncMutex::new(()),
            watcher: Mutex::new(None),
        })
    }

    pub fn entity(&self) -> &ReplyEntity {
        &self.entity
    }

    /// Name of the reply destination.
    pub fn name(&self) -> &str {
        &self.entity.name
    }

    pub fn registry(&self) -> &Arc<PendingRequestRegistry> {
        &self.registry
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ChannelState::Listening
    }

    /// Error a send should fail with when the channel is not listening.
    pub(crate) fn ensure_listening(&self) -> Result<(), RpcError> {
        match self.state() {
            ChannelState::Listening => Ok(()),
            ChannelState::Created => Err(RpcError::NotStarted(self.entity.name.clone())),
            ChannelState::ShuttingDown | ChannelState::Closed => {
                Err(RpcError::ChannelClosed(self.entity.name.clone()))
            }
        }
    }

    /// Declare the reply destination and start consuming it.
    ///
    /// Starting a listening channel is a no-op; a closed channel cannot be
    /// restarted.
    pub async fn start(self: &Arc<Self>) -> Result<(), RpcError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ChannelState::Created => {}
            ChannelState::Listening => return Ok(()),
            ChannelState::ShuttingDown | ChannelState::Closed => {
                return Err(RpcError::ChannelClosed(self.entity.name.clone()));
            }
        }

        // Subscribe to connection events first so none are missed.
        let events = self.transport.connection_events();
        self.establish().await?;
        *self.state.write() = ChannelState::Listening;
        *self.watcher.lock() = Some(spawn_reconnect_watcher(
            Arc::downgrade(self),
            self.entity.name.clone(),
            events,
        ));

        info!(
            destination = %self.entity.name,
            exclusive = self.entity.exclusive,
            auto_delete = self.entity.auto_delete,
            "Reply channel listening"
        );
        Ok(())
    }

    async fn establish(&self) -> Result<(), RpcError> {
        self.transport
            .declare_destination(&self.entity.spec())
            .await?;
        let subscriber = Arc::new(ReplySubscriber::new(Arc::clone(&self.registry)));
        let subscription = self
            .transport
            .subscribe(&self.entity.name, subscriber)
            .await?;
        *self.subscription.lock().await = Some(subscription);
        Ok(())
    }

    /// Re-declare and re-subscribe after a reconnect.
    ///
    /// Pending requests are kept; their replies arrive on the new
    /// subscription, or they time out. A subscription the broker still
    /// holds is left in place: detaching the only consumer of an
    /// auto-delete destination would delete it along with any reply in
    /// flight.
    pub async fn resubscribe(&self) -> Result<(), RpcError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != ChannelState::Listening {
            return Ok(());
        }

        let mut slot = self.subscription.lock().await;
        if slot.as_ref().is_some_and(Subscription::is_active) {
            debug!(destination = %self.entity.name, "Reply subscription still attached");
            return Ok(());
        }
        let old = slot.take();
        drop(slot);
        if let Some(old) = old {
            old.unsubscribe().await;
        }

        self.establish().await?;
        info!(
            destination = %self.entity.name,
            pending = self.registry.len(),
            "Reply subscription re-established"
        );
        Ok(())
    }

    /// Stop listening and cancel everything still pending.
    ///
    /// Returns the number of requests canceled. Idempotent.
    pub async fn shutdown(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if previous == ChannelState::Closed {
                return 0;
            }
            *state = ChannelState::ShuttingDown;
            previous
        };

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        // 1. stop receiving
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }

        // 2. settle pending
        self.registry.close();
        let canceled = self.registry.cancel_all(CancelReason::Shutdown);

        // 3. remove the destination
        if previous != ChannelState::Created && self.delete_on_shutdown {
            if let Err(err) = self.transport.delete_destination(&self.entity.name).await {
                warn!(
                    destination = %self.entity.name,
                    error = %err,
                    "Failed to delete reply destination"
                );
            }
        }

        *self.state.write() = ChannelState::Closed;
        info!(
            destination = %self.entity.name,
            canceled,
            "Reply channel shut down"
        );
        canceled
    }
}

impl fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("entity", &self.entity)
            .field("state", &self.state())
            .field("pending", &self.registry.len())
            .finish()
    }
}

fn spawn_reconnect_watcher(
    channel: Weak<ReplyChannel>,
    destination: String,
    events: broadcast::Receiver<ConnectionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(watch_connection(channel, destination, events))
}

#[instrument(name = "reply_channel_watcher", skip_all, fields(destination = %destination))]
async fn watch_connection(
    channel: Weak<ReplyChannel>,
    destination: String,
    mut events: broadcast::Receiver<ConnectionEvent>,
) {
    loop {
        let resubscribe = match events.recv().await {
            Ok(event) => {
                debug!(%event, "Reply channel saw connection event");
                event.requires_resubscribe()
            }
            // Missed events may include a reconnect.
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connection events lagged");
                true
            }
            Err(RecvError::Closed) => break,
        };
        if !resubscribe {
            continue;
        }
        let Some(channel) = channel.upgrade() else {
            break;
        };
        if let Err(err) = channel.resubscribe().await {
            error!(error = %err, "Failed to re-establish reply subscription");
        }
    }
}
