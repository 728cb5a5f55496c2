//! Requester facade bundling a reply channel and a publisher.

use crate::domain::config::RpcConfig;
use crate::domain::dispatch::RpcCommand;
use crate::domain::registry::PendingRequestRegistry;
use crate::domain::routes::RouteTable;
use crate::error::RpcError;
use crate::ports::inbound::{OutboundRequest, RpcRequester, SendOptions};
use crate::service::publisher::RpcPublisher;
use crate::service::reply_channel::ReplyChannel;
use async_trait::async_trait;
use bytes::Bytes;
use shared_bus::MessageTransport;
use std::sync::Arc;

/// A started requester: reply destination listening, ready to send.
#[derive(Debug)]
pub struct RpcClient {
    publisher: RpcPublisher,
}

impl RpcClient {
    /// Validate `config`, start a reply channel and build the publisher.
    pub async fn start(
        transport: Arc<dyn MessageTransport>,
        routes: RouteTable,
        config: &RpcConfig,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let channel = ReplyChannel::new(Arc::clone(&transport), config);
        channel.start().await?;
        let publisher = RpcPublisher::new(transport, channel, routes, config)?;
        Ok(Self { publisher })
    }

    pub fn publisher(&self) -> &RpcPublisher {
        &self.publisher
    }

    pub fn channel(&self) -> &Arc<ReplyChannel> {
        self.publisher.channel()
    }

    pub fn registry(&self) -> &Arc<PendingRequestRegistry> {
        self.publisher.channel().registry()
    }

    pub fn reply_destination(&self) -> &str {
        self.publisher.channel().name()
    }

    pub async fn send<C: RpcCommand>(&self, command: &C) -> Result<C::Reply, RpcError> {
        self.publisher.send(command).await
    }

    pub async fn send_with<C: RpcCommand>(
        &self,
        command: &C,
        options: SendOptions,
    ) -> Result<C::Reply, RpcError> {
        self.publisher.send_with(command, options).await
    }

    /// Shut the reply channel down; returns how many requests were canceled.
    pub async fn shutdown(&self) -> usize {
        self.publisher.channel().shutdown().await
    }
}

#[async_trait]
impl RpcRequester for RpcClient {
    async fn send_request(
        &self,
        request: OutboundRequest,
        options: SendOptions,
    ) -> Result<Bytes, RpcError> {
        self.publisher.send_request(request, options).await
    }
}
