//! Transactional store contracts.
//!
//! A [`Store`] hands out [`UnitOfWork`]s. Everything done through one unit of
//! work becomes visible atomically on [`UnitOfWork::commit`] and vanishes on
//! [`UnitOfWork::rollback`] or drop. Row locks taken with
//! [`AccountStore::lock_account`] are held until the unit of work ends.

use std::time::Duration;

use async_trait::async_trait;
use fundflow_common::{AccountId, TransactionId};
use thiserror::Error;

use crate::account::Account;
use crate::rule::{DistributionRule, RuleError};
use crate::transaction::{NewTransaction, TransactionRecord};

/// Storage failures. Apart from lock timeouts none of these are the
/// caller's fault during a transfer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("account {0} was written without holding its lock")]
    NotLocked(AccountId),

    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error("timed out waiting for the lock on account {0}")]
    LockTimeout(AccountId),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("account {0} is still referenced")]
    Referenced(AccountId),

    #[error("invalid rule: {0}")]
    InvalidRule(#[from] RuleError),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Account access inside a unit of work.
#[async_trait]
pub trait AccountStore: Send {
    /// Read an account without locking it. Sees this unit's own writes.
    async fn find_account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    /// Lock an account row exclusively and return its current state.
    ///
    /// Blocks while another unit of work holds the row. Locking a row this
    /// unit already holds returns immediately.
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    /// Bound how long later [`Self::lock_account`] calls may wait, enforced
    /// by the store itself. Waits that end when their future is dropped need
    /// nothing more, hence the no-op default.
    async fn set_lock_wait(&mut self, wait: Duration) -> StoreResult<()> {
        let _ = wait;
        Ok(())
    }

    /// Persist an account's balance. The row must be locked by this unit.
    async fn save_account(&mut self, account: &Account) -> StoreResult<()>;
}

/// Distribution rule access inside a unit of work.
#[async_trait]
pub trait DistributionRuleStore: Send {
    /// Rules of `gateway`, ordered by rule id.
    async fn rules_for_gateway(&mut self, gateway: AccountId)
        -> StoreResult<Vec<DistributionRule>>;
}

/// Transaction record access inside a unit of work.
#[async_trait]
pub trait TransactionRecordStore: Send {
    /// Stage a new record; id and timestamp are assigned here.
    async fn insert_transaction(&mut self, tx: NewTransaction) -> StoreResult<TransactionRecord>;

    /// Look a record up by id.
    async fn find_transaction(&mut self, id: TransactionId)
        -> StoreResult<Option<TransactionRecord>>;
}

/// One atomic unit of reads and writes.
#[async_trait]
pub trait UnitOfWork: AccountStore + DistributionRuleStore + TransactionRecordStore {
    /// Make every write visible and release all locks.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write and release all locks.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Source of units of work.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}
