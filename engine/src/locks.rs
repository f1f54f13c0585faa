//! Ordered row locking for one transfer.
//!
//! Every transfer locks the full set of accounts it touches in ascending id
//! order, so two transfers can never wait on each other in a cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use fundflow_common::{AccountId, TransferError};
use fundflow_ledger::{Account, AccountStore, StoreError, UnitOfWork};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::from_store;
use crate::metrics::EngineMetrics;

/// Accounts locked by one unit of work, with their working copies.
#[derive(Debug, Default)]
pub struct LockedAccounts {
    accounts: BTreeMap<AccountId, Account>,
    missing: BTreeSet<AccountId>,
    dirty: BTreeSet<AccountId>,
}

impl LockedAccounts {
    /// Working copy of a locked account.
    pub fn get(&self, id: AccountId) -> Result<&Account, TransferError> {
        self.accounts
            .get(&id)
            .ok_or(TransferError::AccountNotFound(id))
    }

    /// Mutable working copy; the account is saved on [`Self::save_all`].
    pub fn get_mut(&mut self, id: AccountId) -> Result<&mut Account, TransferError> {
        let account = self
            .accounts
            .get_mut(&id)
            .ok_or(TransferError::AccountNotFound(id))?;
        self.dirty.insert(id);
        Ok(account)
    }

    /// Requested ids that do not exist.
    pub fn missing(&self) -> &BTreeSet<AccountId> {
        &self.missing
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Stage every modified working copy in `uow`.
    pub async fn save_all(&self, uow: &mut dyn UnitOfWork) -> Result<(), TransferError> {
        for id in &self.dirty {
            if let Some(account) = self.accounts.get(id) {
                uow.save_account(account).await.map_err(from_store)?;
            }
        }
        Ok(())
    }
}

/// Lock `ids` in ascending order, deduplicated, within `timeout` overall.
///
/// Before each lock the store is told how much of the budget is left, so a
/// store that waits server-side gives up at the same deadline. Ids that do
/// not resolve to an account are reported through
/// [`LockedAccounts::missing`] rather than failing here.
pub async fn lock_in_order(
    uow: &mut dyn UnitOfWork,
    ids: impl IntoIterator<Item = AccountId>,
    timeout: Duration,
    metrics: &EngineMetrics,
) -> Result<LockedAccounts, TransferError> {
    let ordered: BTreeSet<AccountId> = ids.into_iter().collect();
    let deadline = Instant::now() + timeout;
    let mut locked = LockedAccounts::default();

    let timed_out = |id: AccountId| {
        warn!(account = %id, timeout = ?timeout, "Lock acquisition timed out");
        metrics.lock_timeout();
        TransferError::LockTimeout(id)
    };

    for id in ordered {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(id));
        }
        uow.set_lock_wait(remaining).await.map_err(from_store)?;

        let account = match tokio::time::timeout_at(deadline, uow.lock_account(id)).await {
            Ok(Ok(account)) => account,
            Ok(Err(StoreError::LockTimeout(_))) | Err(_) => return Err(timed_out(id)),
            Ok(Err(e)) => return Err(from_store(e)),
        };

        match account {
            Some(account) => {
                metrics.lock_acquired();
                locked.accounts.insert(id, account);
            }
            None => {
                locked.missing.insert(id);
            }
        }
    }

    debug!(locked = locked.len(), missing = locked.missing.len(), "Accounts locked");
    Ok(locked)
}
