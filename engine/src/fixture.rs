//! JSON fixtures: accounts, rules and static rates for offline runs.
//!
//! ```json
//! {
//!   "accounts": [
//!     {"id": 1, "owner": 1, "currency": "USD", "balance": "1000.00"},
//!     {"id": 2, "owner": 2, "currency": "EUR", "is_gateway": true}
//!   ],
//!   "rules": [
//!     {"gateway_account": 2, "destination_account": 3, "percentage": "60.00"}
//!   ],
//!   "rates": [{"from": "USD", "to": "EUR", "rate": "0.90"}]
//! }
//! ```

use std::path::Path;

use fundflow_common::Currency;
use fundflow_fx::StaticRateProvider;
use fundflow_ledger::{LedgerSeed, MemoryStore, StoreError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One static exchange rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
}

/// Ledger contents plus the rates to serve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(flatten)]
    pub ledger: LedgerSeed,
    #[serde(default)]
    pub rates: Vec<FixtureRate>,
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed fixture: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fixture rejected by store: {0}")]
    Store(#[from] StoreError),
}

impl Fixture {
    /// Load a fixture file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(text)?)
    }

    /// In-memory store holding the fixture's accounts and rules.
    pub fn build_store(&self) -> Result<MemoryStore, FixtureError> {
        Ok(MemoryStore::from_seed(&self.ledger)?)
    }

    /// Rate provider serving the fixture's rates.
    pub fn rate_provider(&self) -> StaticRateProvider {
        let provider = StaticRateProvider::new();
        for rate in &self.rates {
            provider.set_rate(rate.from, rate.to, rate.rate);
        }
        provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundflow_common::AccountId;
    use fundflow_fx::RateProvider;
    use rust_decimal_macros::dec;

    const FIXTURE: &str = r#"{
        "accounts": [
            {"id": 1, "owner": 1, "currency": "USD", "balance": "1000.00"},
            {"id": 2, "owner": 2, "currency": "EUR", "is_gateway": true},
            {"id": 3, "owner": 3, "currency": "EUR"}
        ],
        "rules": [
            {"gateway_account": 2, "destination_account": 3, "percentage": "100"}
        ],
        "rates": [{"from": "USD", "to": "EUR", "rate": "0.90"}]
    }"#;

    #[tokio::test]
    async fn test_fixture_builds_store_and_rates() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();

        let store = fixture.build_store().unwrap();
        assert_eq!(store.accounts().len(), 3);
        assert_eq!(store.account(AccountId::new(1)).unwrap().balance, dec!(1000.00));
        assert_eq!(store.rules_for(AccountId::new(2)).len(), 1);

        let provider = fixture.rate_provider();
        assert_eq!(
            provider.rate(Currency::Usd, Currency::Eur).await.unwrap(),
            dec!(0.90)
        );
    }

    #[test]
    fn test_invalid_fixture() {
        assert!(matches!(
            Fixture::from_json("{\"accounts\": 5}"),
            Err(FixtureError::Json(_))
        ));

        let fixture = Fixture::from_json(
            r#"{"accounts": [{"id": 1, "owner": 1, "currency": "USD"}],
                "rules": [{"gateway_account": 1, "destination_account": 9, "percentage": "10"}]}"#,
        )
        .unwrap();
        assert!(matches!(fixture.build_store(), Err(FixtureError::Store(_))));
    }
}
