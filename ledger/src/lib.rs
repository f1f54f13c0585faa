//! FundFlow Ledger
//!
//! Accounts, distribution rules and transaction records, plus the
//! transactional store contracts the engine runs against.

pub mod account;
pub mod memory;
pub mod postgres;
pub mod rule;
pub mod store;
pub mod transaction;

pub use account::{Account, NewAccount};
pub use memory::{LedgerSeed, MemoryStore};
pub use postgres::PgStore;
pub use rule::{DistributionRule, NewDistributionRule, RuleError};
pub use store::{
    AccountStore, DistributionRuleStore, Store, StoreError, StoreResult, TransactionRecordStore,
    UnitOfWork,
};
pub use transaction::{NewTransaction, TransactionRecord, TransactionStatus};
