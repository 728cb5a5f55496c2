//! Driven port: the broker the engine talks to.
//!
//! The engine only needs destination lifecycle, publish and subscribe; the
//! trait lives in `shared-bus` so transports can be implemented without
//! depending on this crate.

pub use shared_bus::{
    ConnectionEvent, DestinationSpec, MessageHandler, MessageTransport, Subscription,
    TransportError,
};
