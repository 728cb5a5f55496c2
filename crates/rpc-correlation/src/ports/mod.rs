//! Hexagonal ports.

pub mod inbound;
pub mod outbound;

pub use inbound::{OutboundRequest, RpcRequester, SendOptions};
pub use outbound::{MessageHandler, MessageTransport};
