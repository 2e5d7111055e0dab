use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::credentials::Credential;

/// Message as the provider returned it, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Provider-assigned id (IMAP UID for Gmail).
    pub id: String,
    /// Raw header block as sent by the provider.
    pub headers: Vec<u8>,
    /// Provider's receive time, if known.
    pub internal_date: Option<DateTime<Utc>>,
}

/// One page of upstream results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamPage {
    pub messages: Vec<RawMessage>,
    pub next_page_token: Option<String>,
    pub estimated_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("credential expired or revoked")]
    AuthExpired,
    #[error("provider quota exceeded")]
    QuotaExceeded,
    #[error("provider rejected query: {0}")]
    MalformedQuery(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider error: {0}")]
    Unknown(String),
}

impl UpstreamError {
    /// Quota and availability failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::QuotaExceeded | UpstreamError::Unavailable(_))
    }
}

/// Message search against a rate-limited provider.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Run `query` for the credential's mailbox and return one page.
    /// `page_token` is a cursor previously returned by this client.
    async fn search(
        &self,
        credential: &Credential,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<UpstreamPage, UpstreamError>;

    /// Reject a continuation cursor this client could never have issued.
    /// Called before any quota is spent on the request.
    fn validate_cursor(&self, _cursor: &str) -> Result<(), String> {
        Ok(())
    }
}
