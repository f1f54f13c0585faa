//! FundFlow Engine
//!
//! Executes fund transfers: fee deduction, currency conversion through a
//! rate service and proportional distribution over a gateway's rules, all
//! applied as one atomic unit of work with deadlock-free ordered locking.

pub mod config;
pub mod distribution;
pub mod engine;
mod error;
pub mod fixture;
pub mod locks;
pub mod metrics;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, EngineConfig, RateConfig, RemainderPolicy};
pub use engine::{TransactionEngine, TransferRequest};
pub use fixture::{Fixture, FixtureError};
pub use metrics::{EngineMetrics, MetricsSnapshot, SharedMetrics};
