//! API Error Types
//!
//! Maps query failures onto HTTP status codes and a uniform JSON body.

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::service::QueryError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Query string could not be deserialized
    #[error("Invalid query string: {0}")]
    InvalidQuery(#[from] QueryRejection),

    #[error("{0}")]
    Query(#[from] QueryError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "INVALID_QUERY"),
            ApiError::Query(QueryError::MalformedKey(_)) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_MONTH_KEY")
            }
            ApiError::Query(QueryError::InvalidArgument(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT")
            }
            ApiError::Query(QueryError::SourceUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SOURCE_UNAVAILABLE")
            }
            ApiError::Query(QueryError::Internal(_)) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Rejected request"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Query(QueryError::MalformedKey("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::Query(QueryError::InvalidArgument("x".into())), StatusCode::BAD_REQUEST),
            (
                ApiError::Query(QueryError::SourceUnavailable("x".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Query(QueryError::Internal("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::from(QueryError::MalformedKey("2024-3".into()));
        assert_eq!(err.to_string(), "Malformed month key: 2024-3");
    }
}
