//! In-process store.
//!
//! Committed state lives behind one `RwLock`; row locks are per-account
//! async mutexes held by the owning unit of work until it ends. A unit of
//! work keeps private working copies of the rows it writes and publishes
//! them in a single critical section on commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use fundflow_common::{
    quantize, AccountId, RuleId, TransactionId, AMOUNT_SCALE, PERCENT_SCALE,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

use crate::account::{Account, NewAccount};
use crate::rule::{DistributionRule, NewDistributionRule};
use crate::store::{
    AccountStore, DistributionRuleStore, Store, StoreError, StoreResult, TransactionRecordStore,
    UnitOfWork,
};
use crate::transaction::{NewTransaction, TransactionRecord};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    rules: BTreeMap<RuleId, DistributionRule>,
    transactions: BTreeMap<TransactionId, TransactionRecord>,
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    next_account: AtomicI64,
    next_rule: AtomicI64,
    next_transaction: AtomicI64,
}

/// Accounts and rules to load into a fresh store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSeed {
    #[serde(default)]
    pub accounts: Vec<NewAccount>,
    #[serde(default)]
    pub rules: Vec<NewDistributionRule>,
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                next_account: AtomicI64::new(1),
                next_rule: AtomicI64::new(1),
                next_transaction: AtomicI64::new(1),
            }),
        }
    }

    /// Create a store holding `seed`, accounts first.
    pub fn from_seed(seed: &LedgerSeed) -> StoreResult<Self> {
        let store = Self::new();
        for account in &seed.accounts {
            store.create_account(account.clone())?;
        }
        for rule in &seed.rules {
            store.create_rule(rule.clone())?;
        }
        info!(
            accounts = seed.accounts.len(),
            rules = seed.rules.len(),
            "Seeded memory store"
        );
        Ok(store)
    }

    /// Create an account. Each user holds at most one account per currency.
    pub fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        if new.balance < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "opening balance {} is negative",
                new.balance
            )));
        }
        if new.balance.normalize().scale() > AMOUNT_SCALE {
            return Err(StoreError::Constraint(format!(
                "opening balance {} has more than two decimal places",
                new.balance
            )));
        }

        let mut tables = self.shared.tables.write();

        if tables
            .accounts
            .values()
            .any(|a| a.owner == new.owner && a.currency == new.currency)
        {
            return Err(StoreError::Duplicate(format!(
                "user {} already holds a {} account",
                new.owner, new.currency
            )));
        }

        let id = match new.id {
            Some(id) => {
                if tables.accounts.contains_key(&id) {
                    return Err(StoreError::Duplicate(format!("account {} exists", id)));
                }
                self.shared
                    .next_account
                    .fetch_max(id.get() + 1, Ordering::SeqCst);
                id
            }
            None => AccountId::new(self.shared.next_account.fetch_add(1, Ordering::SeqCst)),
        };

        let account = Account {
            id,
            owner: new.owner,
            balance: quantize(new.balance, AMOUNT_SCALE),
            currency: new.currency,
            is_gateway: new.is_gateway,
            created_at: Utc::now(),
        };
        tables.accounts.insert(id, account.clone());

        debug!(account = %id, currency = %account.currency, "Created account");
        Ok(account)
    }

    /// Create a distribution rule between two existing accounts.
    pub fn create_rule(&self, new: NewDistributionRule) -> StoreResult<DistributionRule> {
        let mut tables = self.shared.tables.write();

        let gateway = tables
            .accounts
            .get(&new.gateway_account)
            .ok_or(StoreError::NotFound(new.gateway_account))?;
        if !tables.accounts.contains_key(&new.destination_account) {
            return Err(StoreError::NotFound(new.destination_account));
        }
        new.validate(gateway)?;

        let id = RuleId::new(self.shared.next_rule.fetch_add(1, Ordering::SeqCst));
        let rule = DistributionRule {
            id,
            gateway_account: new.gateway_account,
            destination_account: new.destination_account,
            percentage: quantize(new.percentage, PERCENT_SCALE),
        };
        tables.rules.insert(id, rule.clone());

        debug!(
            rule = %id,
            gateway = %rule.gateway_account,
            destination = %rule.destination_account,
            percentage = %rule.percentage,
            "Created distribution rule"
        );
        Ok(rule)
    }

    /// Delete an account no rule or transaction refers to.
    pub fn delete_account(&self, id: AccountId) -> StoreResult<()> {
        let mut tables = self.shared.tables.write();

        if !tables.accounts.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let in_rule = tables
            .rules
            .values()
            .any(|r| r.gateway_account == id || r.destination_account == id);
        let in_history = tables
            .transactions
            .values()
            .any(|t| t.source_account == id || t.destination_account == id);
        if in_rule || in_history {
            return Err(StoreError::Referenced(id));
        }
        let busy = self
            .shared
            .row_locks
            .get(&id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false);
        if busy {
            return Err(StoreError::Constraint(format!("account {} is locked", id)));
        }

        tables.accounts.remove(&id);
        self.shared.row_locks.remove(&id);
        Ok(())
    }

    /// Committed state of one account.
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.shared.tables.read().accounts.get(&id).cloned()
    }

    /// All committed accounts, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        self.shared.tables.read().accounts.values().cloned().collect()
    }

    /// Committed rules of one gateway, ordered by rule id.
    pub fn rules_for(&self, gateway: AccountId) -> Vec<DistributionRule> {
        self.shared
            .tables
            .read()
            .rules
            .values()
            .filter(|r| r.gateway_account == gateway)
            .cloned()
            .collect()
    }

    /// All committed transaction records, ordered by id.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.shared
            .tables
            .read()
            .transactions
            .values()
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            shared: self.shared.clone(),
            guards: BTreeMap::new(),
            working: BTreeMap::new(),
            dirty: BTreeSet::new(),
            staged: Vec::new(),
        }))
    }
}

/// Unit of work over a [`MemoryStore`]. Dropping it rolls back.
pub struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    guards: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    working: BTreeMap<AccountId, Account>,
    dirty: BTreeSet<AccountId>,
    staged: Vec<TransactionRecord>,
}

impl MemoryUnitOfWork {
    fn committed(&self, id: AccountId) -> Option<Account> {
        self.shared.tables.read().accounts.get(&id).cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryUnitOfWork {
    async fn find_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        if let Some(account) = self.working.get(&id) {
            return Ok(Some(account.clone()));
        }
        Ok(self.committed(id))
    }

    #[instrument(level = "debug", skip(self))]
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        if self.guards.contains_key(&id) {
            return Ok(self.working.get(&id).cloned());
        }
        if self.committed(id).is_none() {
            return Ok(None);
        }

        let lock = self.shared.row_locks.entry(id).or_default().value().clone();
        let guard = lock.lock_owned().await;

        // Re-read under the lock: the previous holder may have committed.
        let account = self.committed(id);
        self.guards.insert(id, guard);
        if let Some(account) = &account {
            self.working.insert(id, account.clone());
        }
        Ok(account)
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        if !self.guards.contains_key(&account.id) {
            return Err(StoreError::NotLocked(account.id));
        }
        self.working.insert(account.id, account.clone());
        self.dirty.insert(account.id);
        Ok(())
    }
}

#[async_trait]
impl DistributionRuleStore for MemoryUnitOfWork {
    async fn rules_for_gateway(
        &mut self,
        gateway: AccountId,
    ) -> StoreResult<Vec<DistributionRule>> {
        Ok(self
            .shared
            .tables
            .read()
            .rules
            .values()
            .filter(|r| r.gateway_account == gateway)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionRecordStore for MemoryUnitOfWork {
    async fn insert_transaction(&mut self, tx: NewTransaction) -> StoreResult<TransactionRecord> {
        let id = TransactionId::new(self.shared.next_transaction.fetch_add(1, Ordering::SeqCst));
        let record = tx.into_record(id, Utc::now());
        self.staged.push(record.clone());
        Ok(record)
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> StoreResult<Option<TransactionRecord>> {
        if let Some(record) = self.staged.iter().find(|r| r.id == id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.shared.tables.read().transactions.get(&id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;

        for id in &this.dirty {
            if let Some(account) = this.working.get(id) {
                if account.balance < Decimal::ZERO {
                    return Err(StoreError::Constraint(format!(
                        "account {} balance would become {}",
                        id, account.balance
                    )));
                }
            }
        }

        {
            let mut tables = this.shared.tables.write();
            for id in &this.dirty {
                if !tables.accounts.contains_key(id) {
                    return Err(StoreError::Corrupt(format!(
                        "account {} vanished while locked",
                        id
                    )));
                }
            }
            for id in &this.dirty {
                if let (Some(row), Some(working)) =
                    (tables.accounts.get_mut(id), this.working.get(id))
                {
                    row.balance = working.balance;
                }
            }
            for record in this.staged {
                tables.transactions.insert(record.id, record);
            }
        }

        debug!(accounts = this.dirty.len(), "Committed unit of work");
        // Row locks are released as the guards drop here.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!(
            accounts = self.dirty.len(),
            records = self.staged.len(),
            "Rolled back unit of work"
        );
        Ok(())
    }
}
