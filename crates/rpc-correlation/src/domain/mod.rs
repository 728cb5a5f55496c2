//! Domain layer: pending requests, their registry, routing and dispatch.

pub mod config;
pub mod dispatch;
pub mod pending;
pub mod registry;
pub mod routes;

pub use config::{RpcConfig, MAX_CONSUMER_CONCURRENCY};
pub use dispatch::{
    handler_fn, CommandHandler, DispatchTable, DispatchTableBuilder, FnHandler, RpcCommand,
};
pub use pending::{PendingReply, PendingRequest, ReplyResult};
pub use registry::PendingRequestRegistry;
pub use routes::{RouteTable, RouteTableBuilder};
