//! Error types for range views.

use thiserror::Error;

/// Errors raised by sub-map construction and bounded insertion.
///
/// Lookups never fail: an absent key is `None`, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// The lower bound of a requested range lies above its upper bound.
    #[error("inconsistent range: lower bound is greater than upper bound")]
    InvalidRange,

    /// A key or bound falls outside the range of the view it was given to.
    #[error("key out of range")]
    KeyOutOfRange,
}

pub type Result<T> = std::result::Result<T, MapError>;
