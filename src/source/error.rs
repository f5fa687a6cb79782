//! Asset source error types

use thiserror::Error;

/// Errors reported by asset sources and the ingest adapter
///
/// `Clone` so a single failed backfill can be delivered to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Library unreachable or access revoked
    #[error("Asset source unavailable: {0}")]
    Unavailable(String),

    /// Source broke its paging contract (e.g. a page with no positioned records)
    #[error("Asset source protocol error: {0}")]
    Protocol(String),

    /// Month boundaries could not be computed in the configured zone
    #[error("Invalid month range: {0}")]
    InvalidRange(String),
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

/// Result type alias for source operations
pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::Unavailable("permission revoked".to_string());
        assert_eq!(err.to_string(), "Asset source unavailable: permission revoked");
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: SourceError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
