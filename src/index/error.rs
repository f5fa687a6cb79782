//! Month index error types

use crate::month::{MonthKey, MonthKeyError};
use crate::source::SourceError;
use thiserror::Error;

/// Errors that can occur in the month index
///
/// `Clone` because one backfill result is shared by every coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The asset source failed during a backfill or count
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A timestamp or key could not be mapped to a month
    #[error(transparent)]
    Key(#[from] MonthKeyError),

    /// Offset or limit out of the allowed range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backfill task ended without producing a result
    #[error("Backfill of {month} aborted: {reason}")]
    BackfillAborted { month: MonthKey, reason: String },
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
