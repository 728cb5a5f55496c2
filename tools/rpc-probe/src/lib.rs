//! Probe scenario: one responder and one requester over an in-memory
//! broker, driven with a configurable mix of fast, slow and failing calls.

use futures::stream::{self, StreamExt};
use rpc_correlation::{
    ConsumerHost, ConsumerSnapshot, DispatchTable, RegistrySnapshot, RouteTable, RpcClient,
    RpcCommand, RpcConfig, RpcError, SendOptions,
};
use rpc_telemetry::{log_rpc_event, rpc_span};
use serde::{Deserialize, Serialize};
use shared_bus::InMemoryBroker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Instrument};

/// Destination the probe responder consumes.
pub const WORK_DESTINATION: &str = "probe.work";

/// Command sent by the probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    pub seq: u64,
    pub fail: bool,
    pub delay_ms: u64,
}

impl RpcCommand for Work {
    const ACTION: &'static str = "probe.work";
    type Reply = u64;
}

/// Scenario parameters.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub requests: u64,
    pub concurrency: usize,
    pub timeout: Duration,
    /// Every n-th request fails in the handler (0 = never).
    pub fail_every: u64,
    /// Every n-th request sleeps past the timeout (0 = never).
    pub slow_every: u64,
}

impl ProbePlan {
    fn work(&self, seq: u64) -> Work {
        let hits = |every: u64| every != 0 && seq % every == 0;
        Work {
            seq,
            fail: hits(self.fail_every),
            delay_ms: if hits(self.slow_every) {
                (self.timeout * 2).as_millis() as u64
            } else {
                0
            },
        }
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeReport {
    pub succeeded: u64,
    pub remote_errors: u64,
    pub timeouts: u64,
    pub canceled: u64,
    pub other_errors: u64,
    pub mismatched: u64,
    pub elapsed_ms: u128,
    pub pending_after: usize,
    pub registry: RegistryCounts,
    pub consumer: ConsumerCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryCounts {
    pub registered: u64,
    pub completed: u64,
    pub orphan_replies: u64,
}

impl From<RegistrySnapshot> for RegistryCounts {
    fn from(s: RegistrySnapshot) -> Self {
        Self {
            registered: s.registered,
            completed: s.completed,
            orphan_replies: s.orphan_replies,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumerCounts {
    pub received: u64,
    pub replied: u64,
    pub error_replies: u64,
}

impl From<ConsumerSnapshot> for ConsumerCounts {
    fn from(s: ConsumerSnapshot) -> Self {
        Self {
            received: s.received,
            replied: s.replied,
            error_replies: s.error_replies,
        }
    }
}

fn responder_table() -> anyhow::Result<DispatchTable> {
    let table = DispatchTable::builder()
        .handle(|work: Work| async move {
            if work.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(work.delay_ms)).await;
            }
            if work.fail {
                anyhow::bail!("request {} failed on purpose", work.seq);
            }
            Ok(work.seq * 2)
        })
        .build()?;
    Ok(table)
}

/// Run the scenario to completion.
pub async fn run(plan: &ProbePlan) -> anyhow::Result<ProbeReport> {
    let broker = Arc::new(InMemoryBroker::new());
    let config = RpcConfig::default()
        .with_timeout(plan.timeout)
        .with_consumer_concurrency(plan.concurrency.max(1));

    let host = ConsumerHost::new(
        broker.clone(),
        WORK_DESTINATION,
        responder_table()?,
        &config,
    )?;
    host.start().await?;

    let routes = RouteTable::builder()
        .route::<Work>(WORK_DESTINATION)
        .build()?;
    let client = RpcClient::start(broker.clone(), routes, &config).await?;
    info!(
        reply_to = client.reply_destination(),
        requests = plan.requests,
        concurrency = plan.concurrency,
        "Probe started"
    );

    let started = Instant::now();
    let outcomes: Vec<(u64, Result<u64, RpcError>)> = stream::iter(1..=plan.requests)
        .map(|seq| {
            let client = &client;
            let work = plan.work(seq);
            let key = format!("work-{seq}");
            let span = rpc_span!("work_request", seq, correlation_key = %key);
            async move {
                let options = SendOptions::default().correlation_key(key.as_str());
                let result = client.send_with(&work, options).await;
                match &result {
                    Ok(value) => log_rpc_event!(debug, key, "Request succeeded", value),
                    Err(err) => log_rpc_event!(debug, key, "Request failed", error = %err),
                }
                (seq, result)
            }
            .instrument(span)
        })
        .buffer_unordered(plan.concurrency.max(1))
        .collect()
        .await;

    let mut report = ProbeReport {
        elapsed_ms: started.elapsed().as_millis(),
        ..ProbeReport::default()
    };
    for (seq, outcome) in outcomes {
        match outcome {
            Ok(value) if value == seq * 2 => report.succeeded += 1,
            Ok(_) => report.mismatched += 1,
            Err(RpcError::RemoteError { .. }) => report.remote_errors += 1,
            Err(RpcError::Timeout { .. }) => report.timeouts += 1,
            Err(RpcError::Canceled { .. }) => report.canceled += 1,
            Err(_) => report.other_errors += 1,
        }
    }

    report.pending_after = client.registry().len();
    report.canceled += client.shutdown().await as u64;
    host.shutdown().await;
    report.registry = client.registry().stats().into();
    report.consumer = host.stats().into();

    info!(
        succeeded = report.succeeded,
        remote_errors = report.remote_errors,
        timeouts = report.timeouts,
        elapsed_ms = report.elapsed_ms as u64,
        "Probe finished"
    );
    Ok(report)
}
