//! Application services: reply channel lifecycle, publishing, consumer hosting.

pub mod client;
pub mod consumer_host;
pub mod publisher;
pub mod reply_channel;

pub use client::RpcClient;
pub use consumer_host::ConsumerHost;
pub use publisher::RpcPublisher;
pub use reply_channel::{ChannelState, ReplyChannel, ReplyEntity};
