//! PostgreSQL-backed store.
//!
//! Each unit of work is one database transaction. Row locks are
//! `SELECT ... FOR UPDATE`, released by `COMMIT` or `ROLLBACK`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use fundflow_common::{AccountId, Currency, RuleId, TransactionId, UserId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use crate::account::{Account, NewAccount};
use crate::memory::LedgerSeed;
use crate::rule::{DistributionRule, NewDistributionRule};
use crate::store::{
    AccountStore, DistributionRuleStore, Store, StoreError, StoreResult, TransactionRecordStore,
    UnitOfWork,
};
use crate::transaction::{NewTransaction, TransactionRecord, TransactionStatus};

const ACCOUNT_COLUMNS: &str = "id, owner_id, balance, currency, is_gateway, created_at";
const TRANSACTION_COLUMNS: &str = "id, source_account, destination_account, amount_sent, \
     amount_received, exchange_rate, fee, status, \"timestamp\"";

/// Server-side row lock wait applied to every unit of work.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Store over a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Connect to `database_url`.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Have the server abort a row lock wait after `timeout` instead of
    /// [`DEFAULT_LOCK_TIMEOUT`].
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("Migrations applied");
        Ok(())
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create an account.
    pub async fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await?;
        let account = insert_account(&mut tx, &new).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Create a distribution rule.
    pub async fn create_rule(&self, new: NewDistributionRule) -> StoreResult<DistributionRule> {
        let mut tx = self.pool.begin().await?;
        let rule = insert_rule(&mut tx, &new).await?;
        tx.commit().await?;
        Ok(rule)
    }

    /// Delete an account no rule or transaction refers to.
    pub async fn delete_account(&self, id: AccountId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| match constraint_code(&e) {
                Some(FOREIGN_KEY_VIOLATION) => StoreError::Referenced(id),
                _ => StoreError::from(e),
            })?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn begin_unit(&self) -> StoreResult<PgUnitOfWork> {
        let tx = self.pool.begin().await?;
        let mut uow = PgUnitOfWork {
            tx,
            locked: HashSet::new(),
        };
        uow.set_lock_wait(self.lock_timeout).await?;
        Ok(uow)
    }

    /// Load accounts then rules in one transaction.
    #[instrument(skip_all)]
    pub async fn seed(&self, seed: &LedgerSeed) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for account in &seed.accounts {
            insert_account(&mut tx, account).await?;
        }
        for rule in &seed.rules {
            insert_rule(&mut tx, rule).await?;
        }
        // Explicit ids bypass the sequence.
        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('accounts', 'id'), \
             GREATEST((SELECT MAX(id) FROM accounts), 1))",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(
            accounts = seed.accounts.len(),
            rules = seed.rules.len(),
            "Seeded database"
        );
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(self.begin_unit().await?))
    }
}

/// Unit of work over one PostgreSQL transaction. Dropping it rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    locked: HashSet<AccountId>,
}

#[async_trait]
impl AccountStore for PgUnitOfWork {
    async fn find_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(level = "debug", skip(self))]
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| match constraint_code(&e) {
            Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout(id),
            _ => StoreError::from(e),
        })?;

        let account = row.as_ref().map(account_from_row).transpose()?;
        if account.is_some() {
            self.locked.insert(id);
        }
        Ok(account)
    }

    async fn set_lock_wait(&mut self, wait: Duration) -> StoreResult<()> {
        // Zero would disable the server-side limit altogether.
        let millis = wait.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", millis))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        if !self.locked.contains(&account.id) {
            return Err(StoreError::NotLocked(account.id));
        }
        sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(account.balance)
            .bind(account.id.get())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DistributionRuleStore for PgUnitOfWork {
    async fn rules_for_gateway(
        &mut self,
        gateway: AccountId,
    ) -> StoreResult<Vec<DistributionRule>> {
        let rows = sqlx::query(
            "SELECT id, gateway_account, destination_account, percentage \
             FROM distribution_rules WHERE gateway_account = $1 ORDER BY id",
        )
        .bind(gateway.get())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }
}

#[async_trait]
impl TransactionRecordStore for PgUnitOfWork {
    async fn insert_transaction(&mut self, tx: NewTransaction) -> StoreResult<TransactionRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO transactions (source_account, destination_account, amount_sent, \
             amount_received, exchange_rate, fee, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(tx.source_account.get())
        .bind(tx.destination_account.get())
        .bind(tx.amount_sent)
        .bind(tx.amount_received)
        .bind(tx.exchange_rate)
        .bind(tx.fee)
        .bind(tx.status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        transaction_from_row(&row)
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> StoreResult<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let locked = self.locked.len();
        self.tx.commit().await?;
        debug!(locked, "Committed database transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn insert_account(
    tx: &mut Transaction<'static, Postgres>,
    new: &NewAccount,
) -> StoreResult<Account> {
    let sql = match new.id {
        Some(_) => format!(
            "INSERT INTO accounts (id, owner_id, currency, balance, is_gateway) \
             VALUES ($5, $1, $2, $3, $4) RETURNING {}",
            ACCOUNT_COLUMNS
        ),
        None => format!(
            "INSERT INTO accounts (owner_id, currency, balance, is_gateway) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ACCOUNT_COLUMNS
        ),
    };

    let mut query = sqlx::query(&sql)
        .bind(new.owner.get())
        .bind(new.currency.code())
        .bind(new.balance)
        .bind(new.is_gateway);
    if let Some(id) = new.id {
        query = query.bind(id.get());
    }

    let row = query
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match constraint_code(&e) {
            Some(UNIQUE_VIOLATION) => StoreError::Duplicate(format!(
                "user {} already holds a {} account",
                new.owner, new.currency
            )),
            _ => StoreError::from(e),
        })?;
    account_from_row(&row)
}

async fn insert_rule(
    tx: &mut Transaction<'static, Postgres>,
    new: &NewDistributionRule,
) -> StoreResult<DistributionRule> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM accounts WHERE id = $1",
        ACCOUNT_COLUMNS
    ))
    .bind(new.gateway_account.get())
    .fetch_optional(&mut **tx)
    .await?;
    let gateway = row
        .as_ref()
        .map(account_from_row)
        .transpose()?
        .ok_or(StoreError::NotFound(new.gateway_account))?;
    new.validate(&gateway)?;

    let row = sqlx::query(
        "INSERT INTO distribution_rules (gateway_account, destination_account, percentage) \
         VALUES ($1, $2, $3) RETURNING id, gateway_account, destination_account, percentage",
    )
    .bind(new.gateway_account.get())
    .bind(new.destination_account.get())
    .bind(new.percentage)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match constraint_code(&e) {
        Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound(new.destination_account),
        _ => StoreError::from(e),
    })?;
    rule_from_row(&row)
}

fn constraint_code(err: &sqlx::Error) -> Option<&'static str> {
    let code = match err {
        sqlx::Error::Database(db) => db.code()?,
        _ => return None,
    };
    [LOCK_NOT_AVAILABLE, UNIQUE_VIOLATION, FOREIGN_KEY_VIOLATION]
        .into_iter()
        .find(|known| *known == code)
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let currency: String = row.try_get("currency")?;
    Ok(Account {
        id: AccountId::new(row.try_get("id")?),
        owner: UserId::new(row.try_get("owner_id")?),
        balance: row.try_get("balance")?,
        currency: currency
            .parse::<Currency>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        is_gateway: row.try_get("is_gateway")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rule_from_row(row: &PgRow) -> StoreResult<DistributionRule> {
    Ok(DistributionRule {
        id: RuleId::new(row.try_get("id")?),
        gateway_account: AccountId::new(row.try_get("gateway_account")?),
        destination_account: AccountId::new(row.try_get("destination_account")?),
        percentage: row.try_get("percentage")?,
    })
}

fn transaction_from_row(row: &PgRow) -> StoreResult<TransactionRecord> {
    let status: String = row.try_get("status")?;
    Ok(TransactionRecord {
        id: TransactionId::new(row.try_get("id")?),
        source_account: AccountId::new(row.try_get("source_account")?),
        destination_account: AccountId::new(row.try_get("destination_account")?),
        amount_sent: row.try_get("amount_sent")?,
        amount_received: row.try_get("amount_received")?,
        exchange_rate: row.try_get("exchange_rate")?,
        fee: row.try_get("fee")?,
        status: status
            .parse::<TransactionStatus>()
            .map_err(StoreError::Corrupt)?,
        timestamp: row.try_get("timestamp")?,
    })
}
