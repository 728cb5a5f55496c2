//! # Shared Types Crate
//!
//! This crate contains the wire vocabulary of the RPC-over-broker protocol:
//! the `CorrelationKey`, the `MessageProperties` carried next to every
//! payload, the request/reply envelopes and the content-type codec.
//!
//! ## Wire Contract
//!
//! - Every request carries a `reply_to` destination and a correlation key.
//! - Every reply carries the same correlation key and either a success
//!   payload or the `x-rpc-error` header plus a textual error payload.
//! - The routing/action identifier travels in the `x-rpc-action` header.

pub mod codec;
pub mod correlation;
pub mod envelope;
pub mod errors;

pub use codec::{deserialize, serialize, ContentType};
pub use correlation::CorrelationKey;
pub use envelope::{
    headers, BrokerMessage, MessageProperties, RemoteErrorKind, ReplyEnvelope, ReplyOutcome,
    RequestEnvelope, ERROR_CONTENT_TYPE,
};
pub use errors::CodecError;
