//! Outcome tallies for one simulation run.

use std::collections::BTreeMap;
use std::time::Duration;

use fundflow_common::{ErrorKind, TransferError};

/// Latency samples beyond this are discarded.
const SAMPLE_LIMIT: usize = 10_000;

/// What happened to the transfers of a run.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    pub total_transfers: u64,
    pub completed_transfers: u64,
    /// Refused by a business rule.
    pub rejected_transfers: u64,
    /// Aborted by a collaborator or an internal fault.
    pub failed_transfers: u64,
    /// Refusals and failures by error code.
    pub errors: BTreeMap<&'static str, u64>,
    latencies: Vec<Duration>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a committed transfer that took `latency`.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_transfers += 1;
        self.completed_transfers += 1;
        if self.latencies.len() < SAMPLE_LIMIT {
            self.latencies.push(latency);
        }
    }

    /// Count a transfer that returned `error`.
    pub fn record_error(&mut self, error: &TransferError) {
        self.total_transfers += 1;
        match error.kind() {
            ErrorKind::Business => self.rejected_transfers += 1,
            ErrorKind::External | ErrorKind::Internal => self.failed_transfers += 1,
        }
        *self.errors.entry(error.error_code()).or_default() += 1;
    }

    /// Latency summary of committed transfers.
    pub fn latency(&self) -> LatencySummary {
        if self.latencies.is_empty() {
            return LatencySummary::default();
        }

        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let at = |pct: usize| sorted[(sorted.len() * pct / 100).min(sorted.len() - 1)];

        LatencySummary {
            mean: sorted.iter().sum::<Duration>() / sorted.len() as u32,
            p50: at(50),
            p99: at(99),
            max: sorted[sorted.len() - 1],
        }
    }

    /// Share of transfers that committed, between 0 and 1.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }
        self.completed_transfers as f64 / self.total_transfers as f64
    }

    /// Transfers finished per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_transfers as f64 / secs
    }
}

/// Latency percentiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub max: Duration,
}
