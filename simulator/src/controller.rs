//! Simulation controller: fires transfers concurrently and audits the ledger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use fundflow_common::Currency;
use fundflow_engine::{
    EngineConfig, MetricsSnapshot, RemainderPolicy, TransactionEngine, TransferRequest,
};
use fundflow_fx::{RateService, RateServiceConfig, StaticRateProvider};
use fundflow_ledger::{Account, MemoryStore};

use crate::metrics::SimulationMetrics;
use crate::scenario::{Flow, Scenario};

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Transfers to execute.
    pub transfers: usize,
    /// Transfers in flight at once.
    pub concurrency: usize,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
    /// Artificial delay of every rate lookup.
    pub rate_latency: Duration,
    pub engine: EngineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            transfers: 200,
            concurrency: 16,
            seed: None,
            rate_latency: Duration::ZERO,
            engine: EngineConfig::default(),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub metrics: SimulationMetrics,
    pub engine: MetricsSnapshot,
    pub elapsed: Duration,
    /// Broken ledger invariants; empty when the run was consistent.
    pub violations: Vec<String>,
}

/// Controls the simulation.
pub struct SimulationController {
    scenario: Scenario,
    config: SimulationConfig,
    store: MemoryStore,
    engine: Arc<TransactionEngine>,
    flows: Vec<Flow>,
    rng: StdRng,
}

impl SimulationController {
    /// Build the ledger and engine for `scenario`.
    pub fn new(scenario: Scenario, config: SimulationConfig) -> anyhow::Result<Self> {
        let (seed, flows) = scenario.build();
        let store = MemoryStore::from_seed(&seed)?;

        let provider = StaticRateProvider::new().with_latency(config.rate_latency);
        for (from, to, rate) in scenario.rates() {
            provider.set_rate(from, to, rate);
        }
        let rates = Arc::new(RateService::new(
            Arc::new(provider),
            RateServiceConfig::default(),
        ));
        let engine = Arc::new(TransactionEngine::new(
            Arc::new(store.clone()),
            rates,
            config.engine.clone(),
        ));

        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        info!(
            scenario = scenario.name,
            accounts = seed.accounts.len(),
            rules = seed.rules.len(),
            "Simulation initialized"
        );

        Ok(Self {
            scenario,
            config,
            store,
            engine,
            flows,
            rng,
        })
    }

    /// Execute the workload and audit the result.
    pub async fn run(&mut self) -> anyhow::Result<SimulationReport> {
        info!(
            scenario = self.scenario.name,
            description = self.scenario.description,
            transfers = self.config.transfers,
            concurrency = self.config.concurrency,
            "Running scenario"
        );

        let before = self.store.accounts();
        let plan: Vec<TransferRequest> = (0..self.config.transfers)
            .map(|_| {
                let flow = self.flows[self.rng.gen_range(0..self.flows.len())];
                let cents = self.rng.gen_range(100..50_000i64);
                TransferRequest::new(
                    flow.source,
                    flow.gateway,
                    Decimal::new(cents, 2).to_string(),
                    flow.initiator,
                )
            })
            .collect();

        let metrics = Arc::new(Mutex::new(SimulationMetrics::new()));
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let started = Instant::now();

        let handles: Vec<_> = plan
            .into_iter()
            .map(|request| {
                let engine = self.engine.clone();
                let metrics = metrics.clone();
                let permits = permits.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let start = Instant::now();
                    let outcome = engine.execute(request).await;
                    let mut metrics = metrics.lock().await;
                    match outcome {
                        Ok(record) => {
                            debug!(transaction = %record.id, "Transfer committed");
                            metrics.record_success(start.elapsed());
                        }
                        Err(e) => metrics.record_error(&e),
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result?;
        }
        let elapsed = started.elapsed();

        let metrics = metrics.lock().await.clone();
        let violations = self.audit(&before, &metrics);
        for violation in &violations {
            warn!(violation = %violation, "Ledger invariant broken");
        }

        Ok(SimulationReport {
            metrics,
            engine: self.engine.metrics().snapshot(),
            elapsed,
            violations,
        })
    }

    /// Check the committed ledger against what the records claim happened.
    fn audit(&self, before: &[Account], metrics: &SimulationMetrics) -> Vec<String> {
        let mut violations = Vec::new();
        let after = self.store.accounts();
        let records = self.store.transactions();

        if records.len() as u64 != metrics.completed_transfers {
            violations.push(format!(
                "{} records for {} completed transfers",
                records.len(),
                metrics.completed_transfers
            ));
        }

        for account in &after {
            if account.balance < Decimal::ZERO {
                violations.push(format!("account {} is negative: {}", account.id, account.balance));
            }
        }

        let opening: BTreeMap<_, _> = before.iter().map(|a| (a.id, a)).collect();
        for account in after.iter().filter(|a| a.is_gateway) {
            let was = opening.get(&account.id).map(|a| a.balance);
            if was != Some(account.balance) {
                violations.push(format!("gateway {} balance moved", account.id));
            }
        }

        // Per currency: closing = opening - sent + received.
        let currency_of: BTreeMap<_, _> = before.iter().map(|a| (a.id, a.currency)).collect();
        let mut expected: BTreeMap<Currency, Decimal> = BTreeMap::new();
        for account in before {
            *expected.entry(account.currency).or_default() += account.balance;
        }
        for record in &records {
            if let Some(currency) = currency_of.get(&record.source_account) {
                *expected.entry(*currency).or_default() -= record.amount_sent;
            }
            if let Some(currency) = currency_of.get(&record.destination_account) {
                *expected.entry(*currency).or_default() += record.amount_received;
            }
        }
        let mut actual: BTreeMap<Currency, Decimal> = BTreeMap::new();
        for account in &after {
            *actual.entry(account.currency).or_default() += account.balance;
        }

        for (currency, want) in expected {
            let got = actual.get(&currency).copied().unwrap_or_default();
            if got == want {
                continue;
            }
            if self.config.engine.remainder_policy == RemainderPolicy::Drift {
                info!(currency = %currency, drift = %(got - want), "Distribution drift");
            } else {
                violations.push(format!(
                    "{} total is {}, records imply {}",
                    currency, got, want
                ));
            }
        }

        violations
    }
}
