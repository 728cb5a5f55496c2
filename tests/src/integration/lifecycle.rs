//! Shutdown, reconnect and late replies.

#[cfg(test)]
mod tests {
    use crate::support::{
        serve, BlackHole, Compute, Computed, EchoDoubler, ScriptedTransport, COMPUTE_QUEUE,
    };
    use rpc_correlation::{
        CancelReason, ChannelState, ConsumerHost, CorrelationKey, DispatchTable, PendingRequest,
        ReplyDisposition, ReplySubscriber, RouteTable, RpcClient, RpcConfig, RpcError,
    };
    use shared_bus::{InMemoryBroker, MessageTransport};
    use shared_types::{ContentType, ReplyEnvelope};
    use std::sync::Arc;
    use std::time::Duration;

    fn routes() -> RouteTable {
        RouteTable::builder()
            .route::<Compute>(COMPUTE_QUEUE)
            .build()
            .unwrap()
    }

    /// Five waiters, then shutdown: all five fail, none left behind.
    #[tokio::test]
    async fn test_shutdown_drains_waiters() {
        let broker = Arc::new(InMemoryBroker::new());
        let transport: Arc<dyn MessageTransport> = broker.clone();
        let _sink = serve(&transport, COMPUTE_QUEUE, Arc::new(BlackHole)).await;
        let client = Arc::new(
            RpcClient::start(transport, routes(), &RpcConfig::default())
                .await
                .unwrap(),
        );

        let waiters: Vec<_> = (0..5)
            .map(|x| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.send(&Compute { x }).await })
            })
            .collect();
        while client.registry().len() < 5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(client.shutdown().await, 5);
        assert!(client.registry().is_empty());
        assert_eq!(client.channel().state(), ChannelState::Closed);
        assert!(!broker.destination_exists(client.reply_destination()));

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter settled")
                .unwrap();
            assert!(matches!(
                result,
                Err(RpcError::Canceled {
                    reason: CancelReason::Shutdown,
                    ..
                })
            ));
        }
    }

    /// Registry-level drain with five raw pending requests.
    #[tokio::test]
    async fn test_shutdown_rejects_registered_requests() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        let replies: Vec<_> = (0..5)
            .map(|i| {
                let (request, reply) = PendingRequest::create(
                    CorrelationKey::new(format!("k{i}")),
                    COMPUTE_QUEUE,
                    Duration::from_secs(60),
                    None,
                );
                client.registry().register(request).unwrap();
                reply
            })
            .collect();

        client.shutdown().await;
        assert!(client.registry().is_empty());
        for reply in replies {
            assert!(reply.wait().await.unwrap_err().is_canceled());
        }
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_refused() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();
        client.shutdown().await;

        assert!(matches!(
            client.send(&Compute { x: 1 }).await,
            Err(RpcError::ChannelClosed(_))
        ));
    }

    /// A reply for an unknown or already-settled key changes nothing.
    #[tokio::test]
    async fn test_unknown_reply_is_noop() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let client = RpcClient::start(transport.clone(), routes(), &RpcConfig::default())
            .await
            .unwrap();
        let subscriber = ReplySubscriber::new(Arc::clone(client.registry()));

        let (request, reply) = PendingRequest::create(
            CorrelationKey::new("live"),
            COMPUTE_QUEUE,
            Duration::from_secs(60),
            None,
        );
        client.registry().register(request).unwrap();

        let stray = ReplyEnvelope::success(CorrelationKey::new("never-sent"), ContentType::JSON, "1")
            .into_message();
        assert_eq!(subscriber.on_reply(stray), ReplyDisposition::Orphaned);

        // delivered through the broker as well
        let stray = ReplyEnvelope::success(CorrelationKey::new("never-sent"), ContentType::JSON, "1")
            .into_message();
        transport
            .publish(
                client.reply_destination(),
                stray,
                &tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap();

        // the live request is untouched and still completes
        assert!(client.registry().contains("live"));
        let good = ReplyEnvelope::success(CorrelationKey::new("live"), ContentType::JSON, "2")
            .into_message();
        assert_eq!(subscriber.on_reply(good), ReplyDisposition::Delivered);
        assert_eq!(&reply.wait().await.unwrap()[..], b"2");

        tokio::time::timeout(Duration::from_secs(1), async {
            while client.registry().stats().orphan_replies < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("broker-delivered stray reply observed");
        assert!(client.registry().is_empty());
    }

    /// Reply arriving after the timeout is dropped without effect.
    #[tokio::test]
    async fn test_late_reply_after_timeout() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let table = DispatchTable::builder()
            .handle(|c: Compute| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(Computed { y: c.x })
            })
            .build()
            .unwrap();
        let host =
            ConsumerHost::new(transport.clone(), COMPUTE_QUEUE, table, &RpcConfig::default())
                .unwrap();
        host.start().await.unwrap();
        let client = RpcClient::start(
            transport,
            routes(),
            &RpcConfig::default().with_timeout(Duration::from_millis(30)),
        )
        .await
        .unwrap();

        assert!(client.send(&Compute { x: 1 }).await.unwrap_err().is_timeout());
        host.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while client.registry().stats().orphan_replies < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("late reply reached the reply destination");
        assert_eq!(client.registry().stats().completed, 0);
        assert!(client.registry().is_empty());
    }

    /// Broker reconnect: reply subscription comes back, pending survives.
    #[tokio::test]
    async fn test_reconnect_keeps_pending_requests() {
        let broker = Arc::new(InMemoryBroker::new());
        let transport: Arc<dyn MessageTransport> = broker.clone();
        let table = DispatchTable::builder()
            .handle(|c: Compute| async move { Ok(Computed { y: c.x * 2 }) })
            .build()
            .unwrap();
        let host =
            ConsumerHost::new(transport.clone(), COMPUTE_QUEUE, table, &RpcConfig::default())
                .unwrap();
        host.start().await.unwrap();
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        assert_eq!(client.send(&Compute { x: 1 }).await.unwrap(), Computed { y: 2 });

        broker.simulate_reconnect();
        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.consumer_count(client.reply_destination()) != 1
                || broker.consumer_count(COMPUTE_QUEUE) != 1
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscriptions restored");

        assert_eq!(client.send(&Compute { x: 4 }).await.unwrap(), Computed { y: 8 });
    }

    /// Resubscribing while the broker still holds the reply consumer keeps
    /// it: the auto-delete reply destination never disappears.
    #[tokio::test]
    async fn test_resubscribe_keeps_live_subscription() {
        let transport = ScriptedTransport::new();
        let dyn_transport: Arc<dyn MessageTransport> = transport.clone();
        let responder = EchoDoubler::new(dyn_transport.clone());
        let _server = serve(&dyn_transport, COMPUTE_QUEUE, responder).await;
        let client = RpcClient::start(dyn_transport, routes(), &RpcConfig::default())
            .await
            .unwrap();
        let reply_to = client.reply_destination().to_string();
        let baseline = transport.subscribe_count();

        client.channel().resubscribe().await.unwrap();

        assert_eq!(transport.subscribe_count(), baseline);
        assert!(transport.broker().destination_exists(&reply_to));
        assert_eq!(transport.broker().consumer_count(&reply_to), 1);
        assert_eq!(client.send(&Compute { x: 5 }).await.unwrap(), Computed { y: 10 });

        // After a real connection loss the consumer is gone and is replaced.
        transport.broker().simulate_reconnect();
        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.broker().consumer_count(&reply_to) != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reply subscription restored");
        assert!(transport.subscribe_count() > baseline);
    }
}
