//! Query service error types

use crate::index::IndexError;
use crate::month::MonthKeyError;
use crate::source::SourceError;
use thiserror::Error;

/// Failures returned to callers of the query service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Month key is not canonical `YYYY-MM`; not retryable
    #[error("Malformed month key: {0}")]
    MalformedKey(String),

    /// Offset or limit out of range; not retryable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Library unreachable or permission denied; retry once resolved
    #[error("Asset source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SourceError> for QueryError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => QueryError::SourceUnavailable(msg),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

impl From<MonthKeyError> for QueryError {
    fn from(err: MonthKeyError) -> Self {
        match err {
            MonthKeyError::MalformedKey(key) => QueryError::MalformedKey(key),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

impl From<IndexError> for QueryError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Source(e) => e.into(),
            IndexError::Key(e) => e.into(),
            IndexError::InvalidArgument(msg) => QueryError::InvalidArgument(msg),
            other @ IndexError::BackfillAborted { .. } => QueryError::Internal(other.to_string()),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;
