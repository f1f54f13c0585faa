//! Translation of collaborator failures into [`TransferError`].

use fundflow_common::TransferError;
use fundflow_fx::FxError;
use fundflow_ledger::StoreError;

/// Rate lookup failures keep their classification.
pub(crate) fn from_fx(err: FxError) -> TransferError {
    match err {
        FxError::Network(msg) => TransferError::Network(msg),
        FxError::Service(msg) => TransferError::Service(msg),
        FxError::Parse(msg) => TransferError::Parse(msg),
    }
}

/// Store failures are internal, except a lock the server gave up waiting for.
pub(crate) fn from_store(err: StoreError) -> TransferError {
    match err {
        StoreError::LockTimeout(id) => TransferError::LockTimeout(id),
        other => TransferError::Internal(other.to_string()),
    }
}
