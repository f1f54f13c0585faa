//! FundFlow FX
//!
//! Exchange rate lookup used by the transaction engine.
//!
//! # Features
//!
//! - [`RateProvider`] contract with typed failures ([`FxError`])
//! - HTTP provider for the exchangerate-api.com v6 protocol
//! - Static provider for fixtures and tests
//! - [`RateService`] with same-currency short-circuit, bounded lookup time
//!   and a TTL cache
//!
//! # Example
//!
//! ```rust,ignore
//! use fundflow_fx::{RateService, RateServiceConfig, StaticRateProvider};
//! use fundflow_common::Currency;
//!
//! let provider = Arc::new(StaticRateProvider::new());
//! provider.set_rate(Currency::Usd, Currency::Eur, dec!(0.90));
//!
//! let rates = RateService::new(provider, RateServiceConfig::default());
//! let rate = rates.rate(Currency::Usd, Currency::Eur).await?;
//! ```

pub mod cache;
pub mod error;
pub mod http;
pub mod provider;
pub mod service;

pub use cache::{CacheStats, RateCache, RateCacheConfig};
pub use error::{FxError, FxResult};
pub use http::{ExchangeRateApiConfig, ExchangeRateApiProvider};
pub use provider::{CurrencyPair, RateProvider, StaticRateProvider};
pub use service::{RateService, RateServiceConfig};
