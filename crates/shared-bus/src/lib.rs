//! # Shared Bus - Broker Transport for Request/Reply
//!
//! The narrow transport surface the correlation engine consumes, plus an
//! in-memory broker that implements it with queue semantics.
//!
//! ## Transport Surface
//!
//! - `publish(destination, message, cancel)`: put bytes + properties on a
//!   named destination.
//! - `subscribe(destination, handler)`: get a callback per delivered message;
//!   the returned `Subscription` stops delivery when unsubscribed or dropped.
//! - `declare_destination` / `delete_destination`: entity lifecycle.
//! - `connection_events()`: connect/disconnect/reconnect notifications so
//!   owners can replay entity creation.
//!
//! ```text
//! ┌──────────────┐  publish(rq)  ┌──────────────┐  deliver   ┌──────────────┐
//! │  Requester   │ ────────────► │    Broker    │ ─────────► │  Responder   │
//! │              │ ◄──────────── │              │ ◄───────── │              │
//! └──────────────┘  deliver(rr)  └──────────────┘ publish(rr)└──────────────┘
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod events;
pub mod subscriber;
pub mod transport;

// Re-export main types
pub use broker::InMemoryBroker;
pub use events::ConnectionEvent;
pub use subscriber::{spawn_delivery_loop, Subscription};
pub use transport::{DestinationSpec, MessageHandler, MessageTransport, TransportError};

/// Maximum messages buffered per subscriber before publishers wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Maximum messages held for a destination that has no consumer.
pub const DEFAULT_BACKLOG_LIMIT: usize = 10_000;
