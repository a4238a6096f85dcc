//! Error taxonomy shared by the store, buffer and dispenser layers.
//!
//! - `InvalidArgument`: the request was rejected before any buffer was
//!   touched (empty key, oversized step, bad configuration).
//! - `ServiceClosed`: the dispenser has been closed and accepts no more
//!   calls.
//! - `StoreUnavailable`: the allocation store failed or timed out. This is
//!   the only retryable variant; buffer state is never modified when it is
//!   returned.
//! - `Internal`: an invariant was violated (for example the store returned an
//!   empty range).

/// Result type used throughout `leafid`.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for ID allocation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The caller supplied an argument outside the accepted bounds.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The dispenser no longer accepts calls.
    #[error("id dispenser is closed")]
    ServiceClosed,

    /// The allocation store could not grant a range.
    #[error("allocation store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// An internal invariant was violated.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn store(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::store(err.to_string())
    }
}
