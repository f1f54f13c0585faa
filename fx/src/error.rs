//! FX error types.

use thiserror::Error;

/// Failure modes of a rate lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FxError {
    /// Rate service could not be reached or did not answer in time.
    #[error("Rate service unreachable: {0}")]
    Network(String),

    /// Rate service answered but reported a failure.
    #[error("Rate service returned an error: {0}")]
    Service(String),

    /// Response was malformed or lacked the requested currency.
    #[error("Could not parse rate response: {0}")]
    Parse(String),
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
