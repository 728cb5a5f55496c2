//! A single in-flight request awaiting its reply.
//!
//! The requester keeps the [`PendingReply`] half and awaits it; the
//! [`PendingRequest`] half lives in the registry until a reply, a timeout,
//! a cancellation or shutdown removes it.

use crate::domain::registry::PendingRequestRegistry;
use crate::error::{CancelReason, RpcError};
use bytes::Bytes;
use shared_types::CorrelationKey;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Payload bytes of a successful reply, or the reason there is none.
pub type ReplyResult = Result<Bytes, RpcError>;

/// How a watchdog fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    TimedOut,
    Canceled,
}

/// Registry-side half of an in-flight request.
pub struct PendingRequest {
    /// Key the reply must carry.
    key: CorrelationKey,

    /// Where the request was published.
    destination: String,

    /// How long to wait before failing with a timeout.
    timeout: Duration,

    /// When the request was created.
    created_at: Instant,

    /// Delivers the outcome to the waiting caller. Taken on settle.
    sender: Option<oneshot::Sender<ReplyResult>>,

    /// Caller's cancellation token, watched once armed.
    cancellation: Option<CancellationToken>,

    /// Timer task racing the timeout against the token.
    watchdog: Option<AbortHandle>,
}

/// Caller-side half of an in-flight request.
#[derive(Debug)]
pub struct PendingReply {
    /// Key of the request being awaited.
    key: CorrelationKey,

    /// Receives exactly one outcome.
    receiver: oneshot::Receiver<ReplyResult>,
}

impl PendingRequest {
    /// Create the two halves of a request.
    ///
    /// The timeout and the cancellation token are only watched once the
    /// request is registered.
    pub fn create(
        key: CorrelationKey,
        destination: impl Into<String>,
        timeout: Duration,
        cancellation: Option<CancellationToken>,
    ) -> (Self, PendingReply) {
        let (sender, receiver) = oneshot::channel();
        let request = Self {
            key: key.clone(),
            destination: destination.into(),
            timeout,
            created_at: Instant::now(),
            sender: Some(sender),
            cancellation,
            watchdog: None,
        };
        (request, PendingReply { key, receiver })
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether a timeout or cancellation watchdog is attached.
    pub fn is_armed(&self) -> bool {
        self.watchdog.is_some()
    }

    /// Whether the caller is still waiting for the outcome.
    pub fn is_waiting(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Start the watchdog that expires this request through the registry.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn arm(&mut self, registry: Weak<PendingRequestRegistry>) {
        let key = self.key.clone();
        let timeout = self.timeout;
        let cancellation = self.cancellation.clone();

        let task = tokio::spawn(async move {
            let expiry = match cancellation {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => Expiry::Canceled,
                    () = tokio::time::sleep(timeout) => Expiry::TimedOut,
                },
                None => {
                    tokio::time::sleep(timeout).await;
                    Expiry::TimedOut
                }
            };
            if let Some(registry) = registry.upgrade() {
                registry.expire(&key, expiry);
            }
        });

        self.watchdog = Some(task.abort_handle());
    }

    /// Detach the timeout and the cancellation listener. Idempotent.
    pub fn unregister(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.cancellation = None;
    }

    /// Deliver reply bytes to the caller.
    ///
    /// Returns false if the caller stopped waiting.
    pub fn resolve(mut self, payload: Bytes) -> bool {
        self.unregister();
        self.sender
            .take()
            .is_some_and(|sender| sender.send(Ok(payload)).is_ok())
    }

    /// Deliver a failure to the caller.
    ///
    /// Returns false if the caller stopped waiting.
    pub fn reject(mut self, error: RpcError) -> bool {
        self.unregister();
        self.sender
            .take()
            .is_some_and(|sender| sender.send(Err(error)).is_ok())
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("key", &self.key)
            .field("destination", &self.destination)
            .field("timeout", &self.timeout)
            .field("armed", &self.watchdog.is_some())
            .finish()
    }
}

impl PendingReply {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the outcome.
    ///
    /// A request dropped without being resolved surfaces as
    /// [`CancelReason::Abandoned`].
    pub async fn wait(self) -> ReplyResult {
        let key = self.key;
        self.receiver.await.unwrap_or_else(|_| {
            Err(RpcError::Canceled {
                correlation_key: key,
                reason: CancelReason::Abandoned,
            })
        })
    }
}
