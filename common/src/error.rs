//! Error taxonomy for FundFlow transfers.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountId, Currency, UserId};

/// Broad class of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request violates a business rule (4xx-equivalent).
    Business,
    /// A collaborator failed or timed out (5xx-equivalent, caller may retry).
    External,
    /// Anything unclassified.
    Internal,
}

/// Every way a transfer can fail. Any of these aborts the whole unit of work.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    /// Source, gateway or distribution destination does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Initiator does not own the source account.
    #[error("Permission denied: user {user} does not own account {account}")]
    PermissionDenied { account: AccountId, user: UserId },

    /// Destination is not flagged as a gateway.
    #[error("Account {0} is not a gateway")]
    InvalidGateway(AccountId),

    /// Source and gateway are the same account.
    #[error("Source and gateway are the same account: {0}")]
    SameAccount(AccountId),

    /// Source balance is below the amount sent.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Amount (or amount left after the fee) is zero or negative.
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// Amount text could not be parsed.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Gateway has no distribution rules configured.
    #[error("Gateway {0} has no distribution rules")]
    NoDistributionRules(AccountId),

    /// Gateway rule percentages do not add up to 100.
    #[error("Distribution rules for gateway {gateway} sum to {total}%, expected 100%")]
    RuleSumMismatch { gateway: AccountId, total: Decimal },

    /// Distribution destination is in a different currency than the gateway.
    #[error("Account {account} holds {actual}, gateway currency is {expected}")]
    CurrencyMismatch {
        account: AccountId,
        expected: Currency,
        actual: Currency,
    },

    /// Rate service unreachable or timed out.
    #[error("Network error: {0}")]
    Network(String),

    /// Rate service answered with a failure.
    #[error("Rate service error: {0}")]
    Service(String),

    /// Rate service answer could not be understood.
    #[error("Rate parse error: {0}")]
    Parse(String),

    /// A row lock was not granted in time.
    #[error("Timed out waiting for lock on account {0}")]
    LockTimeout(AccountId),

    /// Unclassified failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Network(_)
            | TransferError::Service(_)
            | TransferError::Parse(_)
            | TransferError::LockTimeout(_) => ErrorKind::External,
            TransferError::Internal(_) => ErrorKind::Internal,
            _ => ErrorKind::Business,
        }
    }

    /// Check if a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Network(_) | TransferError::Service(_) | TransferError::LockTimeout(_)
        )
    }

    /// Get the stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::PermissionDenied { .. } => "PERMISSION_DENIED",
            TransferError::InvalidGateway(_) => "INVALID_GATEWAY",
            TransferError::SameAccount(_) => "SAME_ACCOUNT",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            TransferError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransferError::NoDistributionRules(_) => "NO_DISTRIBUTION_RULES",
            TransferError::RuleSumMismatch { .. } => "RULE_SUM_MISMATCH",
            TransferError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            TransferError::Network(_) => "NETWORK_ERROR",
            TransferError::Service(_) => "SERVICE_ERROR",
            TransferError::Parse(_) => "PARSE_ERROR",
            TransferError::LockTimeout(_) => "LOCK_TIMEOUT",
            TransferError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the end caller.
    ///
    /// Internal errors are reduced to a generic sentence; their detail only
    /// goes to the logs.
    pub fn public_message(&self) -> String {
        match self {
            TransferError::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            TransferError::SameAccount(AccountId::new(1)).kind(),
            ErrorKind::Business
        );
        assert_eq!(
            TransferError::Network("timeout".into()).kind(),
            ErrorKind::External
        );
        assert_eq!(
            TransferError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_retryable() {
        assert!(TransferError::Network("down".into()).is_retryable());
        assert!(TransferError::LockTimeout(AccountId::new(3)).is_retryable());
        assert!(!TransferError::Parse("bad json".into()).is_retryable());
        assert!(!TransferError::InsufficientFunds {
            required: dec!(100.00),
            available: dec!(50.00),
        }
        .is_retryable());
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = TransferError::Internal("pool timed out on 10.0.0.3".into());
        assert_eq!(err.public_message(), "An unexpected error occurred");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");

        let err = TransferError::RuleSumMismatch {
            gateway: AccountId::new(4),
            total: dec!(99.00),
        };
        assert_eq!(
            err.public_message(),
            "Distribution rules for gateway 4 sum to 99.00%, expected 100%"
        );
    }
}
