//! Distribution rules: how a gateway splits its incoming funds.

use fundflow_common::{AccountId, RuleId, PERCENT_SCALE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::Account;

/// Share of a gateway's incoming funds directed to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRule {
    pub id: RuleId,
    pub gateway_account: AccountId,
    pub destination_account: AccountId,
    /// Percentage between 0 and 100 at scale 2 (`40.00` means 40 %).
    pub percentage: Decimal,
}

/// Rule authoring request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDistributionRule {
    pub gateway_account: AccountId,
    pub destination_account: AccountId,
    pub percentage: Decimal,
}

impl NewDistributionRule {
    pub fn new(gateway: AccountId, destination: AccountId, percentage: Decimal) -> Self {
        Self {
            gateway_account: gateway,
            destination_account: destination,
            percentage,
        }
    }

    /// Authoring-time checks. The engine re-checks what it relies on.
    pub fn validate(&self, gateway: &Account) -> Result<(), RuleError> {
        if self.gateway_account == self.destination_account {
            return Err(RuleError::SelfDistribution(self.gateway_account));
        }
        if !gateway.is_gateway {
            return Err(RuleError::NotAGateway(gateway.id));
        }
        if self.percentage <= Decimal::ZERO || self.percentage > Decimal::ONE_HUNDRED {
            return Err(RuleError::PercentageOutOfRange(self.percentage));
        }
        if self.percentage.normalize().scale() > PERCENT_SCALE {
            return Err(RuleError::PercentageTooPrecise(self.percentage));
        }
        Ok(())
    }
}

/// Rule authoring failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("gateway account {0} cannot distribute to itself")]
    SelfDistribution(AccountId),

    #[error("account {0} is not a gateway")]
    NotAGateway(AccountId),

    #[error("percentage {0} must be greater than 0 and at most 100")]
    PercentageOutOfRange(Decimal),

    #[error("percentage {0} has more than two decimal places")]
    PercentageTooPrecise(Decimal),
}

/// Sum of the rules' percentages.
pub fn total_percentage(rules: &[DistributionRule]) -> Decimal {
    rules.iter().map(|r| r.percentage).sum()
}
