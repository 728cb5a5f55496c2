//! RPC Correlation - Request/Reply over a message broker.
//!
//! A requester publishes a request tagged with a correlation key and its
//! private reply destination, then awaits the reply carrying the same key.
//! A responder consumes requests, dispatches them by action name and
//! publishes exactly one reply for each.
//!
//! # Architecture
//!
//! ```text
//!  Requester                                        Responder
//! ┌─────────────────────────────┐                  ┌─────────────────────────┐
//! │ RpcPublisher                │   request        │ ConsumerHost            │
//! │  register ─► publish ───────┼──────────────────┼─► RpcConsumer           │
//! │     │                       │                  │     │                   │
//! │     ▼                       │                  │     ▼                   │
//! │ PendingRequestRegistry      │                  │ DispatchTable           │
//! │  key ─► oneshot + watchdog  │                  │  action ─► handler      │
//! │     ▲                       │   reply          │     │                   │
//! │ ReplySubscriber ◄───────────┼──────────────────┼─────┘                   │
//! │  (ReplyChannel: rpc.reply.*)│                  │                         │
//! └─────────────────────────────┘                  └─────────────────────────┘
//! ```
//!
//! Every pending entry is removed by exactly one of: reply, timeout,
//! caller cancellation, publish failure, or channel shutdown.
//!
//! # Usage
//!
//! ```ignore
//! use rpc_correlation::{RouteTable, RpcClient, RpcConfig};
//!
//! let routes = RouteTable::builder().route::<GetBalance>("accounts").build()?;
//! let client = RpcClient::start(transport, routes, &RpcConfig::from_env()).await?;
//! let balance = client.send(&GetBalance { account }).await?;
//! client.shutdown().await;
//! ```

#![warn(clippy::all)]
#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

pub use adapters::{ReplyDisposition, ReplySubscriber, RpcConsumer};
pub use domain::{
    handler_fn, CommandHandler, DispatchTable, DispatchTableBuilder, PendingReply,
    PendingRequest, PendingRequestRegistry, ReplyResult, RouteTable, RouteTableBuilder,
    RpcCommand, RpcConfig, MAX_CONSUMER_CONCURRENCY,
};
pub use error::{CancelReason, ConfigError, DispatchError, RpcError};
pub use metrics::{ConsumerSnapshot, ConsumerStats, RegistrySnapshot, RegistryStats};
pub use ports::{OutboundRequest, RpcRequester, SendOptions};
pub use service::{ChannelState, ConsumerHost, ReplyChannel, ReplyEntity, RpcClient, RpcPublisher};

pub use shared_types::{ContentType, CorrelationKey, RemoteErrorKind};
