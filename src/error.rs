use std::time::Duration;

use crate::search::ValidationError;

/// Failure of a shared counter or cache store. Both stores are advisory, so
/// callers degrade instead of propagating this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Caller-facing failures of a search.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    Validation(#[from] ValidationError),

    #[error("principal is not authenticated: {0}")]
    Unauthenticated(String),

    #[error("search quota still exceeded after {attempts} attempts ({waited:?} of backoff)")]
    QuotaPersistentlyExceeded {
        attempts: u32,
        waited: Duration,
        retry_after: Duration,
    },

    #[error("upstream unavailable after {attempts} attempts: {reason}")]
    UpstreamUnavailable {
        attempts: u32,
        waited: Duration,
        reason: String,
    },

    #[error("upstream rejected the generated query: {0}")]
    UpstreamMalformedQuery(String),

    #[error("search cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Short machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::Validation(_) => "ValidationError",
            SearchError::Unauthenticated(_) => "Unauthenticated",
            SearchError::QuotaPersistentlyExceeded { .. } => "QuotaPersistentlyExceeded",
            SearchError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            SearchError::UpstreamMalformedQuery(_) => "UpstreamMalformedQuery",
            SearchError::Cancelled => "Cancelled",
            SearchError::Internal(_) => "InternalError",
        }
    }
}
