//! Transaction records: the immutable history of executed transfers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fundflow_common::{AccountId, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a transaction record.
///
/// The engine only ever persists `Completed`; a failed transfer leaves no
/// record at all. The other states exist for records written by other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// A persisted transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub source_account: AccountId,
    /// The gateway the funds were sent to.
    pub destination_account: AccountId,
    /// Debited from the source, in source currency.
    pub amount_sent: Decimal,
    /// Distributed by the gateway, in gateway currency.
    pub amount_received: Decimal,
    /// Rate applied, scale 8.
    pub exchange_rate: Decimal,
    /// Fee withheld, in source currency.
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

/// Values the engine supplies when recording a transfer; the store assigns
/// the id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub amount_sent: Decimal,
    pub amount_received: Decimal,
    pub exchange_rate: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
}

impl NewTransaction {
    /// Materialize with store-assigned fields.
    pub fn into_record(self, id: TransactionId, timestamp: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            id,
            source_account: self.source_account,
            destination_account: self.destination_account,
            amount_sent: self.amount_sent,
            amount_received: self.amount_received,
            exchange_rate: self.exchange_rate,
            fee: self.fee,
            status: self.status,
            timestamp,
        }
    }
}
