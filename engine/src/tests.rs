//! End-to-end transfer scenarios over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fundflow_common::{AccountId, Currency, ErrorKind, TransferError, UserId};
use fundflow_fx::{FxError, RateService, RateServiceConfig, StaticRateProvider};
use fundflow_ledger::{
    AccountStore, LedgerSeed, MemoryStore, NewAccount, NewDistributionRule, Store, StoreError,
    StoreResult, TransactionRecord, TransactionStatus, UnitOfWork,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::{EngineConfig, RemainderPolicy};
use crate::engine::{TransactionEngine, TransferRequest};

fn account(id: i64, owner: i64, currency: Currency, balance: Decimal) -> NewAccount {
    NewAccount::new(UserId::new(owner), currency, balance).with_id(AccountId::new(id))
}

fn gateway(id: i64, owner: i64) -> NewAccount {
    NewAccount::gateway(UserId::new(owner), Currency::Eur).with_id(AccountId::new(id))
}

fn rule(gateway: i64, destination: i64, percentage: Decimal) -> NewDistributionRule {
    NewDistributionRule::new(AccountId::new(gateway), AccountId::new(destination), percentage)
}

/// Accounts:
/// 1 USD 1000 (user 1), 5 USD 50 (user 5), 10 EUR 500 (user 1),
/// 13 EUR 300 (user 13), 3/4/17 EUR destinations, 8 USD destination,
/// 11 plain EUR account.
/// Gateways (EUR): 2 → 3:60 4:40, 6 → 3:60 4:39, 7 → none,
/// 9 → 3:50 8:50, 12 → 3:33.33 4:33.33 13:33.34, 16 → 17:100.
fn seed() -> LedgerSeed {
    LedgerSeed {
        accounts: vec![
            account(1, 1, Currency::Usd, dec!(1000.00)),
            gateway(2, 2),
            account(3, 3, Currency::Eur, dec!(0)),
            account(4, 4, Currency::Eur, dec!(0)),
            account(5, 5, Currency::Usd, dec!(50.00)),
            gateway(6, 6),
            gateway(7, 7),
            account(8, 3, Currency::Usd, dec!(0)),
            gateway(9, 9),
            account(10, 1, Currency::Eur, dec!(500.00)),
            account(11, 11, Currency::Eur, dec!(0)),
            gateway(12, 12),
            account(13, 13, Currency::Eur, dec!(300.00)),
            gateway(16, 16),
            account(17, 17, Currency::Eur, dec!(0)),
        ],
        rules: vec![
            rule(2, 3, dec!(60.00)),
            rule(2, 4, dec!(40.00)),
            rule(6, 3, dec!(60.00)),
            rule(6, 4, dec!(39.00)),
            rule(9, 3, dec!(50.00)),
            rule(9, 8, dec!(50.00)),
            rule(12, 3, dec!(33.33)),
            rule(12, 4, dec!(33.33)),
            rule(12, 13, dec!(33.34)),
            rule(16, 17, dec!(100.00)),
        ],
    }
}

struct Harness {
    store: MemoryStore,
    provider: Arc<StaticRateProvider>,
    engine: Arc<TransactionEngine>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let store = MemoryStore::from_seed(&seed()).unwrap();
        let provider = Arc::new(StaticRateProvider::new());
        provider.set_rate(Currency::Usd, Currency::Eur, dec!(0.90));
        let rates = Arc::new(RateService::new(
            provider.clone(),
            RateServiceConfig::default(),
        ));
        let engine = Arc::new(TransactionEngine::new(
            Arc::new(store.clone()),
            rates,
            config,
        ));
        Self {
            store,
            provider,
            engine,
        }
    }

    fn balance(&self, id: i64) -> Decimal {
        self.store.account(AccountId::new(id)).unwrap().balance
    }

    fn balances(&self) -> Vec<(AccountId, Decimal)> {
        self.store
            .accounts()
            .into_iter()
            .map(|a| (a.id, a.balance))
            .collect()
    }

    async fn transfer(
        &self,
        source: i64,
        gateway: i64,
        amount: &str,
        user: i64,
    ) -> Result<TransactionRecord, TransferError> {
        self.engine
            .execute(TransferRequest::new(
                AccountId::new(source),
                AccountId::new(gateway),
                amount,
                UserId::new(user),
            ))
            .await
    }
}

#[tokio::test]
async fn test_worked_example() {
    let h = Harness::new();

    let record = h.transfer(1, 2, "100.00", 1).await.unwrap();

    assert_eq!(record.source_account, AccountId::new(1));
    assert_eq!(record.destination_account, AccountId::new(2));
    assert_eq!(record.amount_sent, dec!(100.00));
    assert_eq!(record.fee, dec!(2.00));
    assert_eq!(record.exchange_rate.to_string(), "0.90000000");
    assert_eq!(record.amount_received.to_string(), "88.20");
    assert_eq!(record.status, TransactionStatus::Completed);

    assert_eq!(h.balance(1), dec!(900.00));
    assert_eq!(h.balance(2), dec!(0.00));
    assert_eq!(h.balance(3), dec!(52.92));
    assert_eq!(h.balance(4), dec!(35.28));
    assert_eq!(h.store.transactions(), vec![record]);
}

#[tokio::test]
async fn test_rule_sum_mismatch_changes_nothing() {
    let h = Harness::new();
    let before = h.balances();

    let err = h.transfer(1, 6, "100.00", 1).await.unwrap_err();

    assert_eq!(
        err,
        TransferError::RuleSumMismatch {
            gateway: AccountId::new(6),
            total: dec!(99.00),
        }
    );
    assert_eq!(h.balances(), before);
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn test_insufficient_funds_before_any_lookup() {
    let h = Harness::new();
    let before = h.balances();

    let err = h.transfer(5, 2, "100.00", 5).await.unwrap_err();

    assert_eq!(
        err,
        TransferError::InsufficientFunds {
            required: dec!(100.00),
            available: dec!(50.00),
        }
    );
    assert_eq!(h.balances(), before);
    assert!(h.store.transactions().is_empty());
    assert_eq!(h.provider.calls(), 0);

    // Nothing stays locked.
    let record = tokio::time::timeout(Duration::from_secs(1), h.transfer(5, 2, "50.00", 5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.amount_received, dec!(44.10));
    assert_eq!(h.balance(5), dec!(0.00));
}

#[tokio::test]
async fn test_validation_chain() {
    let h = Harness::new();
    let before = h.balances();

    let cases: Vec<(i64, i64, &str, i64, TransferError)> = vec![
        (99, 2, "1.00", 1, TransferError::AccountNotFound(AccountId::new(99))),
        (1, 99, "1.00", 1, TransferError::AccountNotFound(AccountId::new(99))),
        (
            1,
            2,
            "1.00",
            2,
            TransferError::PermissionDenied {
                account: AccountId::new(1),
                user: UserId::new(2),
            },
        ),
        (10, 11, "1.00", 1, TransferError::InvalidGateway(AccountId::new(11))),
        (2, 2, "1.00", 2, TransferError::SameAccount(AccountId::new(2))),
        (1, 2, "0", 1, TransferError::NonPositiveAmount(dec!(0.00))),
        (1, 2, "-5.00", 1, TransferError::NonPositiveAmount(dec!(-5.00))),
    ];

    for (source, gateway, amount, user, expected) in cases {
        let err = h.transfer(source, gateway, amount, user).await.unwrap_err();
        assert_eq!(err, expected, "{} -> {} ({})", source, gateway, amount);
        assert_eq!(err.kind(), ErrorKind::Business);
    }

    for amount in ["abc", "1.234", "", "1_000.00", "1e3"] {
        let err = h.transfer(1, 2, amount, 1).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount(_)), "{:?}", err);
        assert_eq!(err.error_code(), "INVALID_AMOUNT");
    }

    assert_eq!(h.balances(), before);
    assert!(h.store.transactions().is_empty());
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_account_errors_outrank_amount_sign() {
    let h = Harness::new();

    assert_eq!(
        h.transfer(999, 2, "0.00", 1).await.unwrap_err(),
        TransferError::AccountNotFound(AccountId::new(999))
    );
    assert_eq!(
        h.transfer(1, 2, "-5.00", 7).await.unwrap_err(),
        TransferError::PermissionDenied {
            account: AccountId::new(1),
            user: UserId::new(7),
        }
    );
    assert_eq!(
        h.transfer(10, 11, "0", 1).await.unwrap_err(),
        TransferError::InvalidGateway(AccountId::new(11))
    );
    assert_eq!(h.provider.calls(), 0);
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn test_gateway_without_rules() {
    let h = Harness::new();
    let before = h.balances();

    let err = h.transfer(1, 7, "10.00", 1).await.unwrap_err();

    assert_eq!(err, TransferError::NoDistributionRules(AccountId::new(7)));
    assert_eq!(h.balances(), before);
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn test_failure_at_second_destination_rolls_back_first() {
    let h = Harness::new();
    let before = h.balances();

    let err = h.transfer(1, 9, "100.00", 1).await.unwrap_err();

    assert_eq!(
        err,
        TransferError::CurrencyMismatch {
            account: AccountId::new(8),
            expected: Currency::Eur,
            actual: Currency::Usd,
        }
    );
    assert_eq!(h.balance(3), dec!(0.00));
    assert_eq!(h.balance(1), dec!(1000.00));
    assert_eq!(h.balances(), before);
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn test_repeated_rejection_is_stable() {
    let h = Harness::new();
    let before = h.balances();

    let first = h.transfer(1, 9, "10.00", 1).await.unwrap_err();
    let second = h.transfer(1, 9, "10.00", 1).await.unwrap_err();

    assert_eq!(first, second);
    assert_eq!(h.balances(), before);
    assert_eq!(h.engine.metrics().snapshot().transfers_rejected, 2);
}

#[tokio::test]
async fn test_rate_failures_are_external() {
    let h = Harness::new();
    let before = h.balances();

    h.provider.fail_with(
        Currency::Usd,
        Currency::Eur,
        FxError::Network("connection refused".into()),
    );
    let err = h.transfer(1, 2, "10.00", 1).await.unwrap_err();
    assert_eq!(err, TransferError::Network("connection refused".into()));
    assert!(err.is_retryable());

    h.provider.fail_with(
        Currency::Usd,
        Currency::Eur,
        FxError::Service("invalid-key".into()),
    );
    let err = h.transfer(1, 2, "10.00", 1).await.unwrap_err();
    assert_eq!(err.error_code(), "SERVICE_ERROR");
    assert_eq!(err.kind(), ErrorKind::External);

    assert_eq!(h.balances(), before);
    assert!(h.store.transactions().is_empty());
    let snapshot = h.engine.metrics().snapshot();
    assert_eq!(snapshot.transfers_failed, 2);
    assert_eq!(snapshot.rate_failures, 2);
}

#[tokio::test]
async fn test_same_currency_uses_unit_rate() {
    let h = Harness::new();

    let record = h.transfer(10, 2, "10.00", 1).await.unwrap();

    assert_eq!(record.exchange_rate.to_string(), "1.00000000");
    assert_eq!(record.fee, dec!(0.20));
    assert_eq!(record.amount_received, dec!(9.80));
    assert_eq!(h.balance(10), dec!(490.00));
    assert_eq!(h.balance(3), dec!(5.88));
    assert_eq!(h.balance(4), dec!(3.92));
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_fee_percentage_is_configurable() {
    let h = Harness::with_config(EngineConfig {
        fee_percentage: Decimal::ZERO,
        ..Default::default()
    });

    let record = h.transfer(1, 2, "100.00", 1).await.unwrap();

    assert_eq!(record.fee, dec!(0.00));
    assert_eq!(record.amount_received, dec!(90.00));
    assert_eq!(h.balance(3) + h.balance(4), dec!(90.00));
}

#[tokio::test]
async fn test_remainder_policies() {
    // 10.21 EUR: fee 0.20, 10.01 to distribute. Each share rounds to 3.34.
    let largest = Harness::new();
    let record = largest.transfer(10, 12, "10.21", 1).await.unwrap();
    assert_eq!(record.amount_received, dec!(10.01));
    assert_eq!(largest.balance(3), dec!(3.34));
    assert_eq!(largest.balance(4), dec!(3.34));
    assert_eq!(largest.balance(13), dec!(303.33));

    let drift = Harness::with_config(EngineConfig {
        remainder_policy: RemainderPolicy::Drift,
        ..Default::default()
    });
    drift.transfer(10, 12, "10.21", 1).await.unwrap();
    assert_eq!(drift.balance(3), dec!(3.34));
    assert_eq!(drift.balance(4), dec!(3.34));
    assert_eq!(drift.balance(13), dec!(303.34));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_on_shared_accounts_serialize() {
    let h = Harness::new();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .execute(TransferRequest::new(
                        AccountId::new(1),
                        AccountId::new(2),
                        "10.00",
                        UserId::new(1),
                    ))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.amount_received, dec!(8.82));
    }

    assert_eq!(h.balance(1), dec!(800.00));
    assert_eq!(h.balance(3) + h.balance(4), dec!(176.40));
    assert_eq!(h.store.transactions().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overdraft_is_impossible() {
    let h = Harness::new();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .execute(TransferRequest::new(
                        AccountId::new(5),
                        AccountId::new(2),
                        "10.00",
                        UserId::new(5),
                    ))
                    .await
            })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(e) => assert!(matches!(e, TransferError::InsufficientFunds { .. })),
        }
    }

    assert_eq!(completed, 5);
    assert_eq!(h.balance(5), dec!(0.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_transfers_never_deadlock() {
    let h = Harness::new();
    let eur_before: Decimal = h
        .store
        .accounts()
        .iter()
        .filter(|a| a.currency == Currency::Eur)
        .map(|a| a.balance)
        .sum();

    let flows = [(10, 2, 1), (13, 12, 13), (1, 2, 1)];
    let handles: Vec<_> = (0..60)
        .map(|i| {
            let (source, gateway, user) = flows[i % flows.len()];
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .execute(TransferRequest::new(
                        AccountId::new(source),
                        AccountId::new(gateway),
                        "5.00",
                        UserId::new(user),
                    ))
                    .await
            })
        })
        .collect();

    let all = tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(handles))
        .await
        .expect("transfers deadlocked");
    for result in all {
        result.unwrap().unwrap();
    }

    let records = h.store.transactions();
    assert_eq!(records.len(), 60);

    let eur_sent: Decimal = records
        .iter()
        .filter(|r| r.source_account != AccountId::new(1))
        .map(|r| r.amount_sent)
        .sum();
    let received: Decimal = records.iter().map(|r| r.amount_received).sum();
    let eur_after: Decimal = h
        .store
        .accounts()
        .iter()
        .filter(|a| a.currency == Currency::Eur)
        .map(|a| a.balance)
        .sum();

    assert_eq!(eur_after, eur_before - eur_sent + received);
    assert!(h.store.accounts().iter().all(|a| a.balance >= Decimal::ZERO));
}

#[tokio::test]
async fn test_disjoint_transfer_proceeds_while_another_waits() {
    let h = Harness::with_config(EngineConfig {
        lock_timeout: Duration::from_millis(100),
        ..Default::default()
    });

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_account(AccountId::new(3)).await.unwrap();

    let blocked = h.transfer(10, 2, "10.00", 1).await.unwrap_err();
    assert_eq!(blocked, TransferError::LockTimeout(AccountId::new(3)));
    assert!(blocked.is_retryable());

    let record = h.transfer(10, 16, "10.00", 1).await.unwrap();
    assert_eq!(record.destination_account, AccountId::new(16));
    assert_eq!(h.balance(17), dec!(9.80));

    holder.rollback().await.unwrap();
    assert_eq!(h.balance(10), dec!(490.00));
    assert_eq!(h.store.transactions().len(), 1);
    assert_eq!(h.engine.metrics().snapshot().lock_timeouts, 1);
}

struct UnavailableStore;

#[async_trait]
impl Store for UnavailableStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Err(StoreError::Database("connection pool exhausted".into()))
    }
}

#[tokio::test]
async fn test_store_failure_is_internal_and_opaque() {
    let provider = Arc::new(StaticRateProvider::new());
    let rates = Arc::new(RateService::new(provider, RateServiceConfig::default()));
    let engine = TransactionEngine::new(Arc::new(UnavailableStore), rates, EngineConfig::default());

    let err = engine
        .execute(TransferRequest::new(
            AccountId::new(1),
            AccountId::new(2),
            "1.00",
            UserId::new(1),
        ))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.public_message(), "An unexpected error occurred");
    assert_eq!(engine.metrics().snapshot().transfers_failed, 1);
}
