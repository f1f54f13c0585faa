//! Rate provider trait and the in-memory implementation.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fundflow_common::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Directed currency pair: amounts in `from` multiply by the rate to get `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub from: Currency,
    pub to: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(from: Currency, to: Currency) -> Self {
        Self { from, to }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self::new(self.to, self.from)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

/// Source of exchange rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Rate to multiply an amount in `from` by to obtain `to`.
    async fn rate(&self, from: Currency, to: Currency) -> FxResult<Decimal>;
}

/// Provider answering from an in-memory table.
///
/// Used by fixtures, the simulator and tests. Failures can be injected per
/// pair and an artificial latency added to every lookup.
pub struct StaticRateProvider {
    rates: DashMap<CurrencyPair, Decimal>,
    failures: DashMap<CurrencyPair, FxError>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticRateProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self {
            rates: DashMap::new(),
            failures: DashMap::new(),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Delay every lookup by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the rate for a pair.
    pub fn set_rate(&self, from: Currency, to: Currency, rate: Decimal) {
        let pair = CurrencyPair::new(from, to);
        self.failures.remove(&pair);
        self.rates.insert(pair, rate);
    }

    /// Make lookups for a pair fail with `error`.
    pub fn fail_with(&self, from: Currency, to: Currency, error: FxError) {
        self.failures.insert(CurrencyPair::new(from, to), error);
    }

    /// Remove an injected failure.
    pub fn clear_failure(&self, from: Currency, to: Currency) {
        self.failures.remove(&CurrencyPair::new(from, to));
    }

    /// Number of lookups served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for StaticRateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        "STATIC"
    }

    async fn rate(&self, from: Currency, to: Currency) -> FxResult<Decimal> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let pair = CurrencyPair::new(from, to);
        if let Some(error) = self.failures.get(&pair) {
            return Err(error.clone());
        }

        let rate = self
            .rates
            .get(&pair)
            .map(|r| *r)
            .ok_or_else(|| FxError::Parse(format!("no rate for {}", pair)))?;

        debug!(pair = %pair, rate = %rate, "Served static rate");
        Ok(rate)
    }
}
