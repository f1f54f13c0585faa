//! Account definitions for ledger.

use chrono::{DateTime, Utc};
use fundflow_common::{AccountId, Currency, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A currency-denominated account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning user.
    pub owner: UserId,
    /// Current balance at scale 2.
    pub balance: Decimal,
    /// Account currency.
    pub currency: Currency,
    /// Whether the account redistributes incoming funds.
    pub is_gateway: bool,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Check if `user` owns this account.
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    /// Check if account has sufficient funds for a debit.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Reduce the balance. Callers check funds first.
    pub fn debit(&mut self, amount: Decimal) {
        self.balance -= amount;
    }

    /// Increase the balance.
    pub fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
    }
}

/// Administrative account creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    /// Explicit identifier; the store assigns one when absent.
    #[serde(default)]
    pub id: Option<AccountId>,
    pub owner: UserId,
    pub currency: Currency,
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default)]
    pub is_gateway: bool,
}

impl NewAccount {
    /// Regular account with an opening balance.
    pub fn new(owner: UserId, currency: Currency, balance: Decimal) -> Self {
        Self {
            id: None,
            owner,
            currency,
            balance,
            is_gateway: false,
        }
    }

    /// Gateway account with a zero balance.
    pub fn gateway(owner: UserId, currency: Currency) -> Self {
        Self {
            is_gateway: true,
            ..Self::new(owner, currency, Decimal::ZERO)
        }
    }

    /// Pin the account identifier.
    pub fn with_id(mut self, id: AccountId) -> Self {
        self.id = Some(id);
        self
    }
}
