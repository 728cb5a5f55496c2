//! rpc-probe: drive the correlation engine and print what happened.

use std::time::Duration;

use clap::Parser;
use rpc_probe::{run, ProbePlan};
use rpc_telemetry::{init_telemetry, TelemetryConfig};

/// Load probe for request/reply correlation over an in-memory broker
#[derive(Parser, Debug)]
#[command(name = "rpc-probe")]
#[command(about = "Fire correlated requests and report outcomes")]
struct Args {
    /// Number of requests to send
    #[arg(short = 'n', long, default_value = "1000")]
    requests: u64,

    /// Requests in flight at once
    #[arg(short, long, default_value = "32")]
    concurrency: usize,

    /// Per-request timeout in milliseconds
    #[arg(short, long, default_value = "1000")]
    timeout_ms: u64,

    /// Make every n-th request fail in the handler (0 disables)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Make every n-th request outlive its timeout (0 disables)
    #[arg(long, default_value = "0")]
    slow_every: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::for_service("rpc-probe");
    telemetry.json_logs |= args.json_logs;
    let _logger = init_telemetry(&telemetry)?;

    let plan = ProbePlan {
        requests: args.requests,
        concurrency: args.concurrency,
        timeout: Duration::from_millis(args.timeout_ms),
        fail_every: args.fail_every,
        slow_every: args.slow_every,
    };

    let report = run(&plan).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.pending_after > 0 || report.mismatched > 0 {
        anyhow::bail!(
            "{} requests still pending, {} mismatched replies",
            report.pending_after,
            report.mismatched
        );
    }
    Ok(())
}
