// Error types for the regulator framework

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error reported by a backend driver.
///
/// The core wraps these into [`Error::BackendFailure`] without rewording
/// them; whatever the driver reports is what the caller sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        BackendError(message.into())
    }
}

/// The error type for regulator operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// No device resolves for the requested supply.
    #[error("supply not found: {0}")]
    NotFound(String),

    /// The declared binding and the supply map resolve to different devices.
    #[error("ambiguous resolution for supply {0}")]
    Ambiguous(String),

    /// The device cannot accept the requested access mode right now.
    #[error("regulator busy: {0}")]
    Busy(String),

    /// A malformed request, stale handle, or duplicate registration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Enable/disable accounting would go negative, or a handle was
    /// released while still holding enables.
    #[error("unbalanced enable state: {0}")]
    Unbalanced(String),

    /// A voltage constraint with min above max, or constraints from
    /// several consumers that admit no common value.
    #[error("invalid voltage range: {0}")]
    InvalidRange(String),

    /// The backend driver rejected the operation; carried verbatim.
    #[error(transparent)]
    BackendFailure(#[from] BackendError),

    /// A coupled-regulator declaration is not symmetric.
    #[error("coupling mismatch: {0}")]
    CouplingMismatch(String),
}
