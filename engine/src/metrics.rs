//! Metrics collection for transfer monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fundflow_common::{ErrorKind, TransferError};

/// Engine counters.
pub struct EngineMetrics {
    /// Transfers started.
    pub transfers_total: AtomicU64,
    /// Transfers committed.
    pub transfers_completed: AtomicU64,
    /// Transfers refused for a business reason.
    pub transfers_rejected: AtomicU64,
    /// Transfers aborted by an external or internal failure.
    pub transfers_failed: AtomicU64,
    /// Transfers in progress.
    pub transfers_active: AtomicU64,
    /// Row locks granted.
    pub locks_acquired: AtomicU64,
    /// Lock acquisitions that timed out.
    pub lock_timeouts: AtomicU64,
    /// Rate lookups issued.
    pub rate_lookups: AtomicU64,
    /// Rate lookups that failed.
    pub rate_failures: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transfers_total: AtomicU64::new(0),
            transfers_completed: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_active: AtomicU64::new(0),
            locks_acquired: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
            rate_lookups: AtomicU64::new(0),
            rate_failures: AtomicU64::new(0),
        }
    }

    /// Record a transfer starting.
    pub fn transfer_started(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transfer outcome.
    pub fn transfer_finished<T>(&self, outcome: &Result<T, TransferError>) {
        let counter = match outcome {
            Ok(_) => &self.transfers_completed,
            Err(e) if e.kind() == ErrorKind::Business => &self.transfers_rejected,
            Err(_) => &self.transfers_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn lock_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rate lookup and whether it failed.
    pub fn rate_lookup(&self, failed: bool) {
        self.rate_lookups.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.rate_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            rate_lookups: self.rate_lookups.load(Ordering::Relaxed),
            rate_failures: self.rate_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP fundflow_transfers_total Total number of transfers
# TYPE fundflow_transfers_total counter
fundflow_transfers_total {}

# HELP fundflow_transfers_completed Total committed transfers
# TYPE fundflow_transfers_completed counter
fundflow_transfers_completed {}

# HELP fundflow_transfers_rejected Total transfers refused by business rules
# TYPE fundflow_transfers_rejected counter
fundflow_transfers_rejected {}

# HELP fundflow_transfers_failed Total transfers aborted by errors
# TYPE fundflow_transfers_failed counter
fundflow_transfers_failed {}

# HELP fundflow_transfers_active Current transfers in progress
# TYPE fundflow_transfers_active gauge
fundflow_transfers_active {}

# HELP fundflow_locks_acquired Total row locks acquired
# TYPE fundflow_locks_acquired counter
fundflow_locks_acquired {}

# HELP fundflow_lock_timeouts Total lock acquisition timeouts
# TYPE fundflow_lock_timeouts counter
fundflow_lock_timeouts {}

# HELP fundflow_rate_lookups Total exchange rate lookups
# TYPE fundflow_rate_lookups counter
fundflow_rate_lookups {}

# HELP fundflow_rate_failures Total failed exchange rate lookups
# TYPE fundflow_rate_failures counter
fundflow_rate_failures {}
"#,
            snapshot.transfers_total,
            snapshot.transfers_completed,
            snapshot.transfers_rejected,
            snapshot.transfers_failed,
            snapshot.transfers_active,
            snapshot.locks_acquired,
            snapshot.lock_timeouts,
            snapshot.rate_lookups,
            snapshot.rate_failures,
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_completed: u64,
    pub transfers_rejected: u64,
    pub transfers_failed: u64,
    pub transfers_active: u64,
    pub locks_acquired: u64,
    pub lock_timeouts: u64,
    pub rate_lookups: u64,
    pub rate_failures: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<EngineMetrics>;
