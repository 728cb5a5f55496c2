//! Every way a request can fail leaves the registry clean.

#[cfg(test)]
mod tests {
    use crate::support::{serve, BlackHole, Compute, Computed, ScriptedTransport, COMPUTE_QUEUE};
    use rpc_correlation::{
        CancelReason, ConsumerHost, DispatchTable, OutboundRequest, RemoteErrorKind, RouteTable,
        RpcClient, RpcConfig, RpcError, RpcRequester, SendOptions,
    };
    use shared_bus::{InMemoryBroker, MessageTransport};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn routes() -> RouteTable {
        RouteTable::builder()
            .route::<Compute>(COMPUTE_QUEUE)
            .build()
            .unwrap()
    }

    /// Publish throws: the caller sees SendFailure and nothing stays pending.
    #[tokio::test]
    async fn test_send_failure_leaves_no_entry() {
        let transport = ScriptedTransport::new();
        transport.fail_publish_to(COMPUTE_QUEUE);
        let client = RpcClient::start(transport.clone(), routes(), &RpcConfig::default())
            .await
            .unwrap();
        let before = client.registry().len();

        let err = client.send(&Compute { x: 1 }).await.unwrap_err();
        match err {
            RpcError::SendFailure { destination, .. } => assert_eq!(destination, COMPUTE_QUEUE),
            other => panic!("expected send failure, got {other}"),
        }
        assert_eq!(client.registry().len(), before);
        assert_eq!(client.registry().len(), 0);
        assert_eq!(transport.published_to(COMPUTE_QUEUE), 1);
    }

    /// The key is in the registry before the transport sees the publish.
    #[tokio::test]
    async fn test_register_happens_before_publish() {
        let transport = ScriptedTransport::new();
        let dyn_transport: Arc<dyn MessageTransport> = transport.clone();
        let _sink = serve(&dyn_transport, COMPUTE_QUEUE, Arc::new(BlackHole)).await;
        let client = RpcClient::start(
            dyn_transport,
            routes(),
            &RpcConfig::default().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        transport.watch_registry(client.registry());

        for x in 0..5 {
            let _ = client.send(&Compute { x }).await;
        }
        let requests: Vec<_> = transport
            .published()
            .into_iter()
            .filter(|r| r.destination == COMPUTE_QUEUE)
            .collect();
        assert_eq!(requests.len(), 5);
        assert!(requests.iter().all(|r| r.key_registered == Some(true)));
    }

    /// No reply within 50ms: RpcTimeout, key gone.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_and_cleans_up() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let _sink = serve(&transport, COMPUTE_QUEUE, Arc::new(BlackHole)).await;
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let err = client
            .send_with(
                &Compute { x: 1 },
                SendOptions::default()
                    .timeout(Duration::from_millis(50))
                    .correlation_key("slow-1"),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(50));
        match err {
            RpcError::Timeout {
                correlation_key,
                destination,
                timeout,
            } => {
                assert_eq!(correlation_key.as_str(), "slow-1");
                assert_eq!(destination, COMPUTE_QUEUE);
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other}"),
        }
        assert!(!client.registry().contains("slow-1"));
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_timeout() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let _sink = serve(&transport, COMPUTE_QUEUE, Arc::new(BlackHole)).await;
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = client
            .send_with(&Compute { x: 1 }, SendOptions::default().cancellation(token))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::Canceled {
                reason: CancelReason::Caller,
                ..
            }
        ));
        assert!(!err.is_timeout());
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn test_already_canceled_token_never_waits() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let _sink = serve(&transport, COMPUTE_QUEUE, Arc::new(BlackHole)).await;
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            client.send_with(&Compute { x: 1 }, SendOptions::default().cancellation(token)),
        )
        .await
        .expect("canceled send returns promptly")
        .unwrap_err();
        assert!(err.is_canceled());
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_remote_error() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let table = DispatchTable::builder()
            .handle(|c: Compute| async move {
                if c.x < 0 {
                    anyhow::bail!("negative input {}", c.x);
                }
                Ok(Computed { y: c.x })
            })
            .build()
            .unwrap();
        let host =
            ConsumerHost::new(transport.clone(), COMPUTE_QUEUE, table, &RpcConfig::default())
                .unwrap();
        host.start().await.unwrap();
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        match client.send(&Compute { x: -3 }).await.unwrap_err() {
            RpcError::RemoteError { kind, message, .. } => {
                assert_eq!(kind, Some(RemoteErrorKind::HandlerFailed));
                assert!(message.contains("negative input -3"), "{message}");
            }
            other => panic!("expected remote error, got {other}"),
        }
        assert!(client.registry().is_empty());
    }

    /// Unknown action is answered immediately, not left to time out.
    #[tokio::test]
    async fn test_unroutable_request_fails_fast() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let host = ConsumerHost::new(
            transport.clone(),
            COMPUTE_QUEUE,
            DispatchTable::default(),
            &RpcConfig::default(),
        )
        .unwrap();
        host.start().await.unwrap();
        let client = RpcClient::start(
            transport,
            routes(),
            &RpcConfig::default().with_timeout(Duration::from_secs(30)),
        )
        .await
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), client.send(&Compute { x: 1 }))
            .await
            .expect("error reply well before the timeout")
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::RemoteError {
                kind: Some(RemoteErrorKind::HandlerNotFound),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_request_fails_fast() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let table = DispatchTable::builder()
            .handle(|c: Compute| async move { Ok(Computed { y: c.x }) })
            .build()
            .unwrap();
        let host =
            ConsumerHost::new(transport.clone(), COMPUTE_QUEUE, table, &RpcConfig::default())
                .unwrap();
        host.start().await.unwrap();
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        let request = OutboundRequest::new(COMPUTE_QUEUE, "compute.double", "{not json");
        let err = client
            .send_request(request, SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::RemoteError {
                kind: Some(RemoteErrorKind::Deserialization),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_kill_consumer() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let table = DispatchTable::builder()
            .handle(|c: Compute| async move {
                if c.x == 0 {
                    panic!("zero");
                }
                Ok(Computed { y: c.x })
            })
            .build()
            .unwrap();
        let host =
            ConsumerHost::new(transport.clone(), COMPUTE_QUEUE, table, &RpcConfig::default())
                .unwrap();
        host.start().await.unwrap();
        let client = RpcClient::start(transport, routes(), &RpcConfig::default())
            .await
            .unwrap();

        let err = client.send(&Compute { x: 0 }).await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::RemoteError {
                kind: Some(RemoteErrorKind::HandlerPanicked),
                ..
            }
        ));
        assert_eq!(client.send(&Compute { x: 5 }).await.unwrap(), Computed { y: 5 });
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected_while_first_pending() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
        let _sink = serve(&transport, COMPUTE_QUEUE, Arc::new(BlackHole)).await;
        let client = Arc::new(
            RpcClient::start(
                transport,
                routes(),
                &RpcConfig::default().with_timeout(Duration::from_millis(300)),
            )
            .await
            .unwrap(),
        );

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .send_with(&Compute { x: 1 }, SendOptions::default().correlation_key("same"))
                    .await
            })
        };
        while !client.registry().contains("same") {
            tokio::task::yield_now().await;
        }

        let second = client
            .send_with(&Compute { x: 2 }, SendOptions::default().correlation_key("same"))
            .await
            .unwrap_err();
        assert!(matches!(second, RpcError::DuplicateKey(ref k) if k.as_str() == "same"));
        // the original is unaffected and still times out normally
        assert!(first.await.unwrap().unwrap_err().is_timeout());
    }

    /// A blank caller key is refused before anything is registered or
    /// published, instead of reaching a responder that cannot answer it.
    #[tokio::test]
    async fn test_blank_correlation_key_fails_fast() {
        let transport: Arc<dyn MessageTransport> = Arc::new(InMemoryBroker::new());
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

        let options = SendOptions::default()
            .correlation_key("")
            .timeout(Duration::from_secs(30));
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            client.send_with(&Compute { x: 21 }, options),
        )
        .await
        .expect("rejected without waiting for the timeout")
        .unwrap_err();
        assert!(matches!(err, RpcError::InvalidCorrelationKey(ref k) if k.as_str().is_empty()));

        assert!(client.registry().is_empty());
        assert_eq!(client.registry().stats().registered, 0);
        assert_eq!(host.stats().received, 0);

        // a generated key still works on the same client
        assert_eq!(client.send(&Compute { x: 21 }).await.unwrap(), Computed { y: 42 });
    }
}
