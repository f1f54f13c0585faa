//! Transaction engine: one transfer, one atomic unit of work.

use std::sync::Arc;

use fundflow_common::{
    parse_amount, AccountId, Currency, ErrorKind, TransferError, TransferId, UserId,
};
use fundflow_fx::RateService;
use fundflow_ledger::{
    Account, AccountStore, DistributionRuleStore, NewTransaction, Store, TransactionRecord,
    TransactionRecordStore, TransactionStatus, UnitOfWork,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::distribution::{check_rules, plan_shares, quote};
use crate::error::{from_fx, from_store};
use crate::locks::lock_in_order;
use crate::metrics::{EngineMetrics, SharedMetrics};

/// A request to move `amount` from `source` into `gateway`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source: AccountId,
    pub gateway: AccountId,
    /// Decimal string in source currency, at most two fractional digits.
    pub amount: String,
    /// User on whose behalf the transfer runs.
    pub initiator: UserId,
}

impl TransferRequest {
    pub fn new(
        source: AccountId,
        gateway: AccountId,
        amount: impl Into<String>,
        initiator: UserId,
    ) -> Self {
        Self {
            source,
            gateway,
            amount: amount.into(),
            initiator,
        }
    }
}

/// Executes transfers against a [`Store`] with rates from a [`RateService`].
///
/// Each call debits the source, records the transfer against the gateway and
/// credits every destination of the gateway's distribution rules, or changes
/// nothing at all.
pub struct TransactionEngine {
    store: Arc<dyn Store>,
    rates: Arc<RateService>,
    config: EngineConfig,
    metrics: SharedMetrics,
}

impl TransactionEngine {
    /// Create a new engine.
    pub fn new(store: Arc<dyn Store>, rates: Arc<RateService>, config: EngineConfig) -> Self {
        Self {
            store,
            rates,
            config,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Share a metrics instance with other components.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Execute one transfer.
    ///
    /// Not idempotent: two identical successful calls move funds twice.
    #[instrument(
        skip(self, request),
        fields(
            transfer_id = %TransferId::new(),
            source = %request.source,
            gateway = %request.gateway,
            amount = %request.amount,
        )
    )]
    pub async fn execute(&self, request: TransferRequest) -> Result<TransactionRecord, TransferError> {
        self.metrics.transfer_started();
        let outcome = self.run(&request).await;
        self.metrics.transfer_finished(&outcome);

        match &outcome {
            Ok(record) => info!(
                transaction = %record.id,
                fee = %record.fee,
                rate = %record.exchange_rate,
                amount_received = %record.amount_received,
                "Transfer completed"
            ),
            Err(e) if e.kind() == ErrorKind::Internal => {
                error!(error_code = e.error_code(), error = %e, "Transfer failed")
            }
            Err(e) => warn!(error_code = e.error_code(), error = %e, "Transfer rejected"),
        }

        outcome
    }

    async fn run(&self, request: &TransferRequest) -> Result<TransactionRecord, TransferError> {
        let amount = parse_amount(&request.amount)
            .map_err(|e| TransferError::InvalidAmount(e.to_string()))?;

        // Reject what we can before touching the network or taking locks.
        let currencies = self.preflight(request, amount).await?;
        let rate = self.lookup_rate(currencies.0, currencies.1).await?;

        let mut uow = self.store.begin().await.map_err(from_store)?;
        match self
            .apply(uow.as_mut(), request, amount, rate, currencies)
            .await
        {
            Ok(record) => {
                uow.commit().await.map_err(from_store)?;
                Ok(record)
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Unlocked read and validation of source and gateway. Returns their
    /// currencies.
    async fn preflight(
        &self,
        request: &TransferRequest,
        amount: Decimal,
    ) -> Result<(Currency, Currency), TransferError> {
        let mut uow = self.store.begin().await.map_err(from_store)?;
        let source = uow.find_account(request.source).await.map_err(from_store)?;
        let gateway = uow.find_account(request.gateway).await.map_err(from_store)?;
        if let Err(e) = uow.rollback().await {
            debug!(error = %e, "Read-only unit of work rollback failed");
        }

        let (source, gateway) = validate(request, amount, source.as_ref(), gateway.as_ref())?;
        Ok((source.currency, gateway.currency))
    }

    async fn lookup_rate(&self, from: Currency, to: Currency) -> Result<Decimal, TransferError> {
        let result = self.rates.rate(from, to).await;
        if from != to {
            self.metrics.rate_lookup(result.is_err());
        }
        let rate = result.map_err(from_fx)?;
        debug!(from = %from, to = %to, rate = %rate, "Rate resolved");
        Ok(rate)
    }

    /// Everything that happens under locks.
    async fn apply(
        &self,
        uow: &mut dyn UnitOfWork,
        request: &TransferRequest,
        amount: Decimal,
        rate: Decimal,
        (source_currency, gateway_currency): (Currency, Currency),
    ) -> Result<TransactionRecord, TransferError> {
        let rules = uow
            .rules_for_gateway(request.gateway)
            .await
            .map_err(from_store)?;

        let touched = [request.source, request.gateway]
            .into_iter()
            .chain(rules.iter().map(|r| r.destination_account));
        let mut locked = lock_in_order(uow, touched, self.config.lock_timeout, &self.metrics).await?;

        let (source, gateway) = validate(
            request,
            amount,
            locked.get(request.source).ok(),
            locked.get(request.gateway).ok(),
        )?;
        if source.currency != source_currency || gateway.currency != gateway_currency {
            return Err(TransferError::Internal(format!(
                "account currency changed during transfer ({} -> {}, was {} -> {})",
                source.currency, gateway.currency, source_currency, gateway_currency
            )));
        }

        let quote = quote(amount, self.config.fee_percentage, rate)?;

        locked.get_mut(request.source)?.debit(quote.amount_sent);

        let record = uow
            .insert_transaction(NewTransaction {
                source_account: request.source,
                destination_account: request.gateway,
                amount_sent: quote.amount_sent,
                amount_received: quote.amount_received,
                exchange_rate: quote.rate,
                fee: quote.fee,
                status: TransactionStatus::Completed,
            })
            .await
            .map_err(from_store)?;

        check_rules(request.gateway, &rules)?;

        for share in plan_shares(quote.amount_received, &rules, self.config.remainder_policy) {
            let destination = locked.get_mut(share.destination)?;
            if destination.currency != gateway_currency {
                return Err(TransferError::CurrencyMismatch {
                    account: destination.id,
                    expected: gateway_currency,
                    actual: destination.currency,
                });
            }
            destination.credit(share.amount);
            debug!(
                rule = %share.rule,
                destination = %share.destination,
                amount = %share.amount,
                "Share credited"
            );
        }

        locked.save_all(uow).await?;
        Ok(record)
    }
}

/// Validation chain shared by the pre-flight and locked passes.
fn validate<'a>(
    request: &TransferRequest,
    amount: Decimal,
    source: Option<&'a Account>,
    gateway: Option<&'a Account>,
) -> Result<(&'a Account, &'a Account), TransferError> {
    let source = source.ok_or(TransferError::AccountNotFound(request.source))?;
    let gateway = gateway.ok_or(TransferError::AccountNotFound(request.gateway))?;

    if !source.is_owned_by(request.initiator) {
        return Err(TransferError::PermissionDenied {
            account: source.id,
            user: request.initiator,
        });
    }
    if !gateway.is_gateway {
        return Err(TransferError::InvalidGateway(gateway.id));
    }
    if source.id == gateway.id {
        return Err(TransferError::SameAccount(source.id));
    }
    if !source.has_sufficient_funds(amount) {
        return Err(TransferError::InsufficientFunds {
            required: amount,
            available: source.balance,
        });
    }
    if amount <= Decimal::ZERO {
        return Err(TransferError::NonPositiveAmount(amount));
    }
    Ok((source, gateway))
}
