//! Property: a correlation key settles exactly once, whatever races it.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;
    use rpc_correlation::{CorrelationKey, PendingRequest, PendingRequestRegistry, RpcError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap()
    }

    /// N repliers race each other and the timeout for one key.
    async fn race(repliers: usize, timeout_us: u64, reply_delay_us: u64) -> (usize, u64, bool) {
        let registry = PendingRequestRegistry::new();
        let (request, reply) = PendingRequest::create(
            CorrelationKey::new("contended"),
            "race",
            Duration::from_micros(timeout_us),
            None,
        );
        registry.register(request).unwrap();

        let wins = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..repliers)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let wins = Arc::clone(&wins);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_micros(reply_delay_us)).await;
                    let won = if i % 2 == 0 {
                        registry.complete("contended", Bytes::from(vec![i as u8]))
                    } else {
                        registry.fail("contended", None, format!("replier {i}"))
                    };
                    if won {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        let outcome = reply.wait().await;
        for task in tasks {
            task.await.unwrap();
        }
        // let a losing watchdog finish its (no-op) expiry
        tokio::time::sleep(Duration::from_micros(timeout_us) + Duration::from_millis(5)).await;

        let timeouts = registry.stats().timeouts;
        let timed_out = matches!(outcome, Err(RpcError::Timeout { .. }));
        assert_eq!(timed_out, timeouts == 1);
        assert!(registry.is_empty());
        (wins.load(Ordering::SeqCst), timeouts, timed_out)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_exactly_one_resolution(
            repliers in 1usize..24,
            timeout_us in 50u64..3_000,
            reply_delay_us in 0u64..3_000,
        ) {
            let (wins, timeouts, _) = runtime().block_on(race(repliers, timeout_us, reply_delay_us));
            prop_assert_eq!(wins as u64 + timeouts, 1);
        }

        #[test]
        fn prop_shutdown_settles_every_waiter(count in 0usize..40) {
            runtime().block_on(async move {
                let registry = PendingRequestRegistry::new();
                let replies: Vec<_> = (0..count)
                    .map(|i| {
                        let (request, reply) = PendingRequest::create(
                            CorrelationKey::new(format!("k{i}")),
                            "d",
                            Duration::from_secs(60),
                            None,
                        );
                        registry.register(request).unwrap();
                        reply
                    })
                    .collect();

                registry.close();
                let canceled = registry.cancel_all(rpc_correlation::CancelReason::Shutdown);
                assert_eq!(canceled, count);
                assert!(registry.is_empty());
                for reply in replies {
                    assert!(reply.wait().await.unwrap_err().is_canceled());
                }
            });
        }
    }

    #[test]
    fn test_reply_and_timeout_at_same_instant() {
        runtime().block_on(async {
            for _ in 0..200 {
                let (wins, timeouts, _) = race(2, 200, 200).await;
                assert_eq!(wins as u64 + timeouts, 1);
            }
        });
    }
}
