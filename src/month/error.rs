//! Month key codec errors

use thiserror::Error;

/// Errors raised while encoding or decoding month keys
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonthKeyError {
    /// Key is not `YYYY-MM` or names a month outside 1..=12
    #[error("Malformed month key: {0:?}")]
    MalformedKey(String),

    /// Timestamp cannot be represented as a calendar date
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),

    /// Zone specification could not be parsed
    #[error("Invalid time zone: {0:?}")]
    InvalidZone(String),
}

/// Result type alias for codec operations
pub type MonthKeyResult<T> = Result<T, MonthKeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonthKeyError::MalformedKey("bad-key".to_string());
        assert_eq!(err.to_string(), "Malformed month key: \"bad-key\"");

        let err = MonthKeyError::TimestampOutOfRange(i64::MAX);
        assert_eq!(
            err.to_string(),
            format!("Timestamp out of range: {}", i64::MAX)
        );
    }
}
