//! # Connection Events
//!
//! Notifications a transport emits about its broker connection. Entity
//! owners listen for `Reconnected` to re-declare destinations and
//! re-subscribe; in-flight request state is not affected by reconnects.

use std::fmt;

/// Broker connection state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// First connection established.
    Connected,
    /// Connection lost; subscriptions and exclusive destinations are gone.
    Disconnected,
    /// Connection re-established after a loss.
    Reconnected,
}

impl ConnectionEvent {
    /// Whether owners must replay entity creation.
    #[must_use]
    pub fn requires_resubscribe(&self) -> bool {
        matches!(self, Self::Reconnected)
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnected => "reconnected",
        };
        f.write_str(name)
    }
}
