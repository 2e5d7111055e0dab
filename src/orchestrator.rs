//! Search request state machine: validate, build, cache probe, quota-gated
//! upstream call under retry, transform, cache write.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::email::transform;
use crate::email::{Credential, CredentialError, CredentialProvider, UpstreamClient, UpstreamError, UpstreamPage};
use crate::error::SearchError;
use crate::quota::{QuotaDecision, QuotaLimiter};
use crate::retry::{AttemptError, RetryCause, RetryCoordinator, RetryError};
use crate::search::query::{self, NormalizedQuery};
use crate::search::{PageToken, SearchFilter, SearchLimits, SearchResultPage, ValidationError};

pub struct SearchOrchestrator {
    limits: SearchLimits,
    limiter: Arc<QuotaLimiter>,
    cache: Arc<ResultCache>,
    retry: RetryCoordinator,
    upstream: Arc<dyn UpstreamClient>,
    credentials: Arc<dyn CredentialProvider>,
    deadline: Duration,
}

impl SearchOrchestrator {
    pub fn new(
        limits: SearchLimits,
        limiter: Arc<QuotaLimiter>,
        cache: Arc<ResultCache>,
        retry: RetryCoordinator,
        upstream: Arc<dyn UpstreamClient>,
        credentials: Arc<dyn CredentialProvider>,
        deadline: Duration,
    ) -> Self {
        Self {
            limits,
            limiter,
            cache,
            retry,
            upstream,
            credentials,
            deadline,
        }
    }

    pub fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    pub fn limiter(&self) -> &QuotaLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn search(&self, principal: Uuid, filter: SearchFilter) -> Result<SearchResultPage, SearchError> {
        self.search_with_cancel(principal, filter, &CancellationToken::new())
            .await
    }

    /// Run one search for `principal`.
    ///
    /// Invalid filters fail before any quota is spent or any network call is
    /// made. Only first pages are served from or written to the cache.
    pub async fn search_with_cancel(
        &self,
        principal: Uuid,
        filter: SearchFilter,
        cancel: &CancellationToken,
    ) -> Result<SearchResultPage, SearchError> {
        filter.validate(&self.limits)?;
        let query = query::build(&filter);
        let cursor = match &query.filter().page_token {
            Some(token) => {
                let cursor = PageToken::decode_for(token, query.digest())?.c;
                self.upstream
                    .validate_cursor(&cursor)
                    .map_err(ValidationError::InvalidPageToken)?;
                Some(cursor)
            }
            None => None,
        };

        if let Some(page) = self.cache.get(principal, &query).await {
            return Ok(page);
        }

        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        let credential = self
            .credentials
            .get_credential(principal)
            .await
            .map_err(|e| match e {
                CredentialError::Unauthenticated(_) => SearchError::Unauthenticated(e.to_string()),
                CredentialError::Store(msg) => {
                    tracing::error!(principal = %principal, error = %msg, "Credential lookup failed");
                    SearchError::Internal(format!("credential lookup failed: {}", msg))
                }
            })?;

        let attempts_started = AtomicU32::new(0);
        let fetch = self.fetch(
            principal,
            &query,
            cursor.as_deref(),
            &credential,
            cancel,
            &attempts_started,
        );
        let upstream_page = match tokio::time::timeout(self.deadline, fetch).await {
            Ok(result) => result?,
            Err(_) => {
                let attempts = attempts_started.load(Ordering::Relaxed);
                tracing::warn!(
                    principal = %principal,
                    attempts,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Search deadline exceeded"
                );
                return Err(SearchError::UpstreamUnavailable {
                    attempts,
                    waited: self.deadline,
                    reason: "search deadline exceeded".to_string(),
                });
            }
        };

        let next_page_token = upstream_page
            .next_page_token
            .map(|cursor| PageToken::new(query.digest(), cursor).encode());
        let page = SearchResultPage {
            messages: transform::to_messages(&upstream_page.messages),
            has_more: next_page_token.is_some(),
            next_page_token,
            cached: false,
            estimated_total: upstream_page.estimated_total,
        };

        self.cache.put(principal, &query, &page).await;
        Ok(page)
    }

    /// Drop cached results for a principal: every first page, or only the
    /// one matching `filter`. Returns how many entries were removed.
    pub async fn invalidate(&self, principal: Uuid, filter: Option<&SearchFilter>) -> usize {
        match filter {
            None => self.cache.invalidate_principal(principal).await,
            Some(filter) => {
                let first_page = SearchFilter {
                    page_token: None,
                    ..filter.clone()
                };
                let query = query::build(&first_page);
                usize::from(self.cache.invalidate_query(principal, &query).await)
            }
        }
    }

    async fn fetch(
        &self,
        principal: Uuid,
        query: &NormalizedQuery,
        cursor: Option<&str>,
        credential: &Credential,
        cancel: &CancellationToken,
        attempts_started: &AtomicU32,
    ) -> Result<UpstreamPage, SearchError> {
        let result = self
            .retry
            .execute(cancel, move |attempt| async move {
                attempts_started.store(attempt, Ordering::Relaxed);
                if let QuotaDecision::Rejected { retry_after, .. } =
                    self.limiter.check_and_record(principal).await
                {
                    return Err(AttemptError::Retryable(RetryCause::QuotaRejected { retry_after }));
                }
                self.upstream
                    .search(credential, query.as_str(), query.page_size(), cursor)
                    .await
                    .map_err(classify)
            })
            .await;

        match result {
            Ok(outcome) => {
                tracing::info!(
                    principal = %principal,
                    attempts = outcome.attempts.len(),
                    total_wait_ms = outcome.total_wait.as_millis() as u64,
                    results = outcome.value.messages.len(),
                    "Upstream search completed"
                );
                Ok(outcome.value)
            }
            Err(RetryError::Exhausted {
                attempts,
                total_wait,
                last,
            }) => {
                let attempts = attempts.len() as u32;
                tracing::warn!(
                    principal = %principal,
                    attempts,
                    total_wait_ms = total_wait.as_millis() as u64,
                    cause = ?last,
                    "Retry budget exhausted"
                );
                if last.is_quota() {
                    let retry_after = match last {
                        RetryCause::QuotaRejected { retry_after } => retry_after,
                        _ => self.retry.policy().delay_before(attempts + 1),
                    };
                    Err(SearchError::QuotaPersistentlyExceeded {
                        attempts,
                        waited: total_wait,
                        retry_after,
                    })
                } else {
                    Err(SearchError::UpstreamUnavailable {
                        attempts,
                        waited: total_wait,
                        reason: describe(&last),
                    })
                }
            }
            Err(RetryError::Terminal { error, .. }) => Err(terminal(principal, query, error)),
            Err(RetryError::Cancelled { attempts }) => {
                tracing::info!(principal = %principal, attempts = attempts.len(), "Search cancelled");
                Err(SearchError::Cancelled)
            }
        }
    }
}

fn classify(err: UpstreamError) -> AttemptError<UpstreamError> {
    match err {
        UpstreamError::QuotaExceeded => AttemptError::Retryable(RetryCause::UpstreamQuota),
        UpstreamError::Unavailable(reason) => AttemptError::Retryable(RetryCause::Unavailable(reason)),
        other => AttemptError::Terminal(other),
    }
}

fn terminal(principal: Uuid, query: &NormalizedQuery, err: UpstreamError) -> SearchError {
    match err {
        UpstreamError::AuthExpired => {
            SearchError::Unauthenticated(format!("mailbox credential for {} was rejected", principal))
        }
        UpstreamError::MalformedQuery(detail) => {
            tracing::error!(
                principal = %principal,
                query = %query.as_str(),
                detail = %detail,
                "Upstream rejected generated query"
            );
            SearchError::UpstreamMalformedQuery(detail)
        }
        other => SearchError::Internal(other.to_string()),
    }
}

fn describe(cause: &RetryCause) -> String {
    match cause {
        RetryCause::Unavailable(reason) => reason.clone(),
        RetryCause::TimedOut => "upstream call timed out".to_string(),
        RetryCause::QuotaRejected { .. } | RetryCause::UpstreamQuota => "quota exceeded".to_string(),
    }
}
