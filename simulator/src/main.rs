//! FundFlow load simulator.
//!
//! Drives concurrent transfers through the engine over an in-memory ledger
//! and audits balances afterwards.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod controller;
mod metrics;
mod scenario;

use controller::{SimulationConfig, SimulationController};
use fundflow_engine::{EngineConfig, RemainderPolicy};
use scenario::Scenario;

/// FundFlow simulator CLI
#[derive(Parser, Debug)]
#[command(name = "fundflow-simulator")]
#[command(about = "Concurrent transfer simulation with ledger audit")]
struct Args {
    /// Scenario to run: shared-gateway, disjoint or misconfigured
    #[arg(short, long, default_value = "shared-gateway")]
    scenario: String,

    /// Number of sending accounts
    #[arg(long, default_value = "8")]
    senders: usize,

    /// Transfers to execute
    #[arg(short, long, default_value = "500")]
    transfers: usize,

    /// Transfers in flight at once
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Artificial rate lookup latency in milliseconds
    #[arg(long, default_value = "0")]
    rate_latency_ms: u64,

    /// Rounding remainder handling: largest-share or drift
    #[arg(long, default_value = "largest-share")]
    remainder_policy: RemainderPolicy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting FundFlow simulator");

    let scenario = Scenario::load(&args.scenario, args.senders)?;
    let config = SimulationConfig {
        transfers: args.transfers,
        concurrency: args.concurrency,
        seed: args.seed,
        rate_latency: Duration::from_millis(args.rate_latency_ms),
        engine: EngineConfig {
            remainder_policy: args.remainder_policy,
            ..EngineConfig::default()
        },
    };

    let mut controller = SimulationController::new(scenario, config)?;
    let report = controller.run().await?;
    let metrics = &report.metrics;

    info!("Simulation complete");
    info!("Total transfers: {}", metrics.total_transfers);
    info!("Completed: {}", metrics.completed_transfers);
    info!("Rejected: {}", metrics.rejected_transfers);
    info!("Failed: {}", metrics.failed_transfers);
    for (code, count) in &metrics.errors {
        info!("  {}: {}", code, count);
    }
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    let latency = metrics.latency();
    info!(
        "Latency mean/p50/p99/max: {:?}/{:?}/{:?}/{:?}",
        latency.mean, latency.p50, latency.p99, latency.max
    );
    info!(
        "Throughput: {:.1} transfers/s",
        metrics.throughput(report.elapsed)
    );
    info!(
        "Locks acquired: {}, lock timeouts: {}",
        report.engine.locks_acquired, report.engine.lock_timeouts
    );

    if !report.violations.is_empty() {
        anyhow::bail!("{} ledger invariant(s) broken", report.violations.len());
    }

    Ok(())
}
