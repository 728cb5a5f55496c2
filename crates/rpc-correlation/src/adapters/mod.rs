//! Transport-facing adapters.

pub mod reply_subscriber;
pub mod request_consumer;

pub use reply_subscriber::{ReplyDisposition, ReplySubscriber};
pub use request_consumer::RpcConsumer;
