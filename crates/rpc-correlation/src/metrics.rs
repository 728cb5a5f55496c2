//! Lock-free counters for the requester and responder sides.

use std::sync::atomic::{AtomicU64, Ordering};

/// Requester-side counters kept by the pending request registry.
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub registered: AtomicU64,
    pub completed: AtomicU64,
    pub remote_errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub canceled: AtomicU64,
    pub send_failures: AtomicU64,
    pub duplicates: AtomicU64,
    pub orphan_replies: AtomicU64,
}

impl RegistryStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            orphan_replies: self.orphan_replies.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RegistryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub registered: u64,
    pub completed: u64,
    pub remote_errors: u64,
    pub timeouts: u64,
    pub canceled: u64,
    pub send_failures: u64,
    pub duplicates: u64,
    pub orphan_replies: u64,
}

impl RegistrySnapshot {
    /// Requests that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.completed + self.remote_errors + self.timeouts + self.canceled + self.send_failures
    }
}

/// Responder-side counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub received: AtomicU64,
    pub replied: AtomicU64,
    pub error_replies: AtomicU64,
    pub reply_publish_failures: AtomicU64,
    pub dropped: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            received: self.received.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            error_replies: self.error_replies.load(Ordering::Relaxed),
            reply_publish_failures: self.reply_publish_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub received: u64,
    pub replied: u64,
    pub error_replies: u64,
    pub reply_publish_failures: u64,
    pub dropped: u64,
}
