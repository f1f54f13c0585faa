//! Fee, conversion and proportional share arithmetic.
//!
//! Everything here is pure; the engine applies the results to locked rows.

use fundflow_common::{
    percent_of, quantize, AccountId, RuleId, TransferError, AMOUNT_SCALE,
};
use fundflow_ledger::DistributionRule;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::RemainderPolicy;

/// Amounts of one transfer before any balance moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferQuote {
    /// Debited from the source.
    pub amount_sent: Decimal,
    /// Withheld, in source currency.
    pub fee: Decimal,
    /// `amount_sent - fee`.
    pub amount_to_convert: Decimal,
    pub rate: Decimal,
    /// Credited across the gateway's destinations, in gateway currency.
    pub amount_received: Decimal,
}

/// Price a transfer of `amount` at `rate` with a `fee_percentage` fee.
pub fn quote(
    amount: Decimal,
    fee_percentage: Decimal,
    rate: Decimal,
) -> Result<TransferQuote, TransferError> {
    let fee = quantize(percent_of(amount, fee_percentage), AMOUNT_SCALE);
    let amount_to_convert = amount - fee;
    if amount_to_convert <= Decimal::ZERO {
        return Err(TransferError::NonPositiveAmount(amount_to_convert));
    }

    Ok(TransferQuote {
        amount_sent: amount,
        fee,
        amount_to_convert,
        rate,
        amount_received: quantize(amount_to_convert * rate, AMOUNT_SCALE),
    })
}

/// Reject a gateway whose rules cannot distribute exactly 100 %.
pub fn check_rules(gateway: AccountId, rules: &[DistributionRule]) -> Result<(), TransferError> {
    if rules.is_empty() {
        return Err(TransferError::NoDistributionRules(gateway));
    }
    let total = fundflow_ledger::rule::total_percentage(rules);
    if total != Decimal::ONE_HUNDRED {
        return Err(TransferError::RuleSumMismatch { gateway, total });
    }
    Ok(())
}

/// Amount one rule credits to its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Share {
    pub rule: RuleId,
    pub destination: AccountId,
    pub amount: Decimal,
}

/// Split `amount_received` over `rules`, in rule order.
///
/// Each share is `quantize(amount_received * percentage / 100)`. Under
/// [`RemainderPolicy::LargestShare`] the rounding residual is then absorbed
/// by the largest-percentage rule; a negative residual larger than that share
/// spills over to the next largest, so no share goes below zero.
pub fn plan_shares(
    amount_received: Decimal,
    rules: &[DistributionRule],
    policy: RemainderPolicy,
) -> Vec<Share> {
    let mut shares: Vec<Share> = rules
        .iter()
        .map(|rule| Share {
            rule: rule.id,
            destination: rule.destination_account,
            amount: quantize(percent_of(amount_received, rule.percentage), AMOUNT_SCALE),
        })
        .collect();

    if policy == RemainderPolicy::Drift || shares.is_empty() {
        return shares;
    }

    let distributed: Decimal = shares.iter().map(|s| s.amount).sum();
    let mut residual = amount_received - distributed;
    if residual.is_zero() {
        return shares;
    }

    // Largest percentage first, lowest rule id on ties.
    let mut order: Vec<usize> = (0..rules.len()).collect();
    order.sort_by(|&a, &b| {
        rules[b]
            .percentage
            .cmp(&rules[a].percentage)
            .then(rules[a].id.cmp(&rules[b].id))
    });

    for idx in order {
        let share = &mut shares[idx];
        if residual > Decimal::ZERO {
            share.amount += residual;
            residual = Decimal::ZERO;
        } else {
            let taken = share.amount.min(-residual);
            share.amount -= taken;
            residual += taken;
        }
        if residual.is_zero() {
            break;
        }
    }

    for share in &mut shares {
        share.amount = quantize(share.amount, AMOUNT_SCALE);
    }
    shares
}
