//! Identifier types for FundFlow entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

integer_id!(
    /// Identifier of an account row.
    ///
    /// Ordering matters: row locks are always taken in ascending `AccountId`
    /// order.
    AccountId
);

integer_id!(
    /// Opaque reference to the user owning an account or initiating a transfer.
    UserId
);

integer_id!(
    /// Identifier of a distribution rule.
    RuleId
);

integer_id!(
    /// Identifier of a persisted transaction record.
    TransactionId
);

/// Correlation identifier for one `execute` call.
/// Uses UUID v7 so log lines sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Create a new transfer ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_creation() {
        let id1 = TransferId::new();
        let id2 = TransferId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_account_id_ordering() {
        let mut ids = vec![AccountId::new(7), AccountId::new(2), AccountId::new(5)];
        ids.sort();
        assert_eq!(ids, vec![AccountId::new(2), AccountId::new(5), AccountId::new(7)]);
    }

    #[test]
    fn test_integer_id_serializes_transparently() {
        let json = serde_json::to_string(&AccountId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: UserId = serde_json::from_str("9").unwrap();
        assert_eq!(back.get(), 9);
    }
}
