//! Pending request registry.
//!
//! Maps correlation keys to in-flight requests. Every entry leaves the map
//! through exactly one path (reply, timeout, cancellation, send failure or
//! shutdown) and is disarmed on the way out, so a timer can never outlive
//! its entry.

use crate::domain::pending::{Expiry, PendingRequest};
use crate::error::{CancelReason, RpcError};
use crate::metrics::{RegistrySnapshot, RegistryStats};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::{CorrelationKey, RemoteErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Correlation key -> pending request.
///
/// One registry per reply channel, shared by the send path and the reply
/// path.
pub struct PendingRequestRegistry {
    /// In-flight requests by correlation key.
    pending: DashMap<CorrelationKey, PendingRequest>,

    /// Outcome counters.
    stats: RegistryStats,

    /// Set by `close`; refuses further registrations.
    closed: AtomicBool,

    /// Handed to watchdogs so they can expire entries without keeping the
    /// registry alive.
    self_ref: Weak<Self>,
}

impl PendingRequestRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            pending: DashMap::new(),
            stats: RegistryStats::default(),
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    /// Register a request and arm its timeout.
    ///
    /// The watchdog is armed while the map slot is held, so an expiry can
    /// only observe the request after it is visible. Must be called from
    /// within a Tokio runtime.
    pub fn register(&self, mut request: PendingRequest) -> Result<(), RpcError> {
        let key = request.key().clone();

        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => {
                RegistryStats::bump(&self.stats.duplicates);
                warn!(correlation_key = %key, "Correlation key already pending");
                Err(RpcError::DuplicateKey(key))
            }
            Entry::Vacant(slot) => {
                // Checked under the slot lock; see `close`.
                if self.closed.load(Ordering::SeqCst) {
                    return Err(RpcError::Canceled {
                        correlation_key: key,
                        reason: CancelReason::Shutdown,
                    });
                }
                request.arm(self.self_ref.clone());
                debug!(
                    correlation_key = %key,
                    destination = request.destination(),
                    timeout_ms = request.timeout().as_millis(),
                    "Registered pending request"
                );
                slot.insert(request);
                RegistryStats::bump(&self.stats.registered);
                Ok(())
            }
        }
    }

    /// Remove an entry and disarm it. `None` if it was already gone.
    pub fn try_remove(&self, key: &str) -> Option<PendingRequest> {
        self.pending.remove(key).map(|(_, mut request)| {
            request.unregister();
            request
        })
    }

    /// Resolve a request with reply bytes.
    ///
    /// Returns false for a reply with no pending entry.
    pub fn complete(&self, key: &str, payload: Bytes) -> bool {
        let Some(request) = self.try_remove(key) else {
            return self.orphan(key);
        };

        let elapsed = request.elapsed();
        if request.resolve(payload) {
            debug!(
                correlation_key = %key,
                response_time_ms = elapsed.as_millis(),
                "Completed pending request"
            );
        } else {
            debug!(correlation_key = %key, "Caller stopped waiting before reply arrived");
        }
        RegistryStats::bump(&self.stats.completed);
        true
    }

    /// Fail a request with the responder's error.
    pub fn fail(&self, key: &str, kind: Option<RemoteErrorKind>, message: String) -> bool {
        let Some(request) = self.try_remove(key) else {
            return self.orphan(key);
        };

        debug!(
            correlation_key = %key,
            kind = kind.map(|k| k.as_str()),
            error = %message,
            "Pending request failed remotely"
        );
        request.reject(RpcError::RemoteError {
            correlation_key: CorrelationKey::new(key),
            kind,
            message,
        });
        RegistryStats::bump(&self.stats.remote_errors);
        true
    }

    /// Called by a watchdog when a timeout or cancellation fires.
    pub(crate) fn expire(&self, key: &CorrelationKey, expiry: Expiry) {
        // A reply may have won the race; then there is nothing to do.
        let Some(request) = self.try_remove(key.as_str()) else {
            return;
        };

        let error = match expiry {
            Expiry::TimedOut => {
                RegistryStats::bump(&self.stats.timeouts);
                warn!(
                    correlation_key = %key,
                    destination = request.destination(),
                    timeout_ms = request.timeout().as_millis(),
                    "Pending request timed out"
                );
                RpcError::Timeout {
                    correlation_key: key.clone(),
                    destination: request.destination().to_string(),
                    timeout: request.timeout(),
                }
            }
            Expiry::Canceled => {
                RegistryStats::bump(&self.stats.canceled);
                debug!(correlation_key = %key, "Pending request canceled by caller");
                RpcError::Canceled {
                    correlation_key: key.clone(),
                    reason: CancelReason::Caller,
                }
            }
        };
        request.reject(error);
    }

    /// Remove every entry, disarmed, for the caller to settle.
    pub fn drain_all(&self) -> Vec<PendingRequest> {
        let keys: Vec<CorrelationKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.try_remove(key.as_str()))
            .collect()
    }

    /// Drain and reject everything with `Canceled { reason }`.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let drained = self.drain_all();
        let count = drained.len();
        for request in drained {
            let key = request.key().clone();
            request.reject(RpcError::Canceled {
                correlation_key: key,
                reason,
            });
            RegistryStats::bump(&self.stats.canceled);
        }
        if count > 0 {
            info!(count, %reason, "Canceled pending requests");
        }
        count
    }

    /// Refuse new registrations. Entries already present are untouched.
    ///
    /// `register` checks the flag while holding the map slot, so a
    /// `drain_all` after `close` sees every request that got in.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn record_send_failure(&self) {
        RegistryStats::bump(&self.stats.send_failures);
    }

    /// Count a cancellation settled outside the watchdog.
    pub(crate) fn record_canceled(&self) {
        RegistryStats::bump(&self.stats.canceled);
    }

    fn orphan(&self, key: &str) -> bool {
        RegistryStats::bump(&self.stats.orphan_replies);
        debug!(correlation_key = %key, "Reply with no pending request");
        false
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> RegistrySnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for PendingRequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequestRegistry")
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
