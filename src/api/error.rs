use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::SearchError;

/// Errors returned by the HTTP API
#[derive(Debug, Clone)]
pub enum ApiError {
    Search(SearchError),
    InvalidPrincipal(String),
    InvalidParameter(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    request_id: String,
}

impl ApiError {
    fn code(&self) -> &str {
        match self {
            ApiError::Search(e) => e.code(),
            ApiError::InvalidPrincipal(_) => "InvalidPrincipal",
            ApiError::InvalidParameter(_) => "ValidationError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Search(e) => match e {
                SearchError::Validation(_) => StatusCode::BAD_REQUEST,
                SearchError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                SearchError::QuotaPersistentlyExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                SearchError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SearchError::Cancelled => StatusCode::REQUEST_TIMEOUT,
                SearchError::UpstreamMalformedQuery(_) | SearchError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::InvalidPrincipal(_) | ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Search(e) => e.to_string(),
            ApiError::InvalidPrincipal(m) => m.clone(),
            ApiError::InvalidParameter(m) => m.clone(),
        }
    }

    /// Whole seconds for a `Retry-After` header, rounded up, at least 1.
    fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::Search(SearchError::QuotaPersistentlyExceeded { retry_after, .. }) => {
                Some(ceil_secs(*retry_after).max(1))
            }
            _ => None,
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError::Search(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            code: self.code(),
            message: self.message(),
            request_id: uuid::Uuid::new_v4().to_string(),
        };
        if status.is_server_error() {
            tracing::warn!(code = body.code, request_id = %body.request_id, "{}", body.message);
        }

        let mut response = (status, Json(&body)).into_response();
        if let Some(secs) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ValidationError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                SearchError::Validation(ValidationError::InvalidPageToken("x".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (SearchError::Unauthenticated("p".to_string()), StatusCode::UNAUTHORIZED),
            (
                SearchError::QuotaPersistentlyExceeded {
                    attempts: 4,
                    waited: Duration::from_secs(7),
                    retry_after: Duration::from_secs(8),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                SearchError::UpstreamUnavailable {
                    attempts: 4,
                    waited: Duration::from_secs(7),
                    reason: "reset".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (SearchError::UpstreamMalformedQuery("BAD".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
            (SearchError::Cancelled, StatusCode::REQUEST_TIMEOUT),
            (SearchError::Internal("?".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::from(SearchError::QuotaPersistentlyExceeded {
            attempts: 4,
            waited: Duration::from_secs(7),
            retry_after: Duration::from_millis(1500),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_retry_after_never_zero() {
        let err = ApiError::from(SearchError::QuotaPersistentlyExceeded {
            attempts: 1,
            waited: Duration::ZERO,
            retry_after: Duration::ZERO,
        });
        assert_eq!(err.retry_after(), Some(1));
        assert_eq!(ApiError::from(SearchError::Cancelled).retry_after(), None);
    }
}
