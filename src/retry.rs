//! Bounded exponential-backoff retry around one quota-gated upstream call.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first retry; doubles for each later one.
    pub base_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Limit on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_retries: 3,
            attempt_timeout: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before `attempt` (1-based): zero for the first,
    /// `base * 2^(attempt - 2)` afterwards.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Why an attempt may be repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    /// Our own limiter refused the call.
    QuotaRejected { retry_after: Duration },
    /// The upstream answered with a quota error.
    UpstreamQuota,
    /// The upstream could not be reached or failed transiently.
    Unavailable(String),
    /// The attempt ran past its timeout.
    TimedOut,
}

impl RetryCause {
    pub fn is_quota(&self) -> bool {
        matches!(self, RetryCause::QuotaRejected { .. } | RetryCause::UpstreamQuota)
    }
}

/// Failure of one attempt as classified by the operation.
#[derive(Debug)]
pub enum AttemptError<E> {
    Retryable(RetryCause),
    Terminal(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Retryable(RetryCause),
    Terminal,
}

/// Record of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub number: u32,
    /// Backoff waited before this attempt started.
    pub delay: Duration,
    pub outcome: AttemptOutcome,
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: Vec<RetryAttempt>,
    pub total_wait: Duration,
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable cause.
    Exhausted {
        attempts: Vec<RetryAttempt>,
        total_wait: Duration,
        last: RetryCause,
    },
    /// An attempt failed in a way retrying cannot fix.
    Terminal {
        error: E,
        attempts: Vec<RetryAttempt>,
    },
    Cancelled {
        attempts: Vec<RetryAttempt>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally, runs out of
    /// attempts or `cancel` fires.
    ///
    /// The operation receives the 1-based attempt number. Backoff waits are
    /// async sleeps; nothing is held while waiting.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
    {
        let mut attempts = Vec::new();
        let mut total_wait = Duration::ZERO;
        let mut last = RetryCause::TimedOut;

        for number in 1..=self.policy.max_attempts() {
            let delay = self.policy.delay_before(number);
            if !delay.is_zero() {
                tracing::debug!(attempt = number, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                    _ = tokio::time::sleep(delay) => {}
                }
                total_wait += delay;
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                result = tokio::time::timeout(self.policy.attempt_timeout, operation(number)) => result,
            };

            match result {
                Ok(Ok(value)) => {
                    attempts.push(RetryAttempt {
                        number,
                        delay,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    return Ok(RetryOutcome {
                        value,
                        attempts,
                        total_wait,
                    });
                }
                Ok(Err(AttemptError::Terminal(error))) => {
                    attempts.push(RetryAttempt {
                        number,
                        delay,
                        outcome: AttemptOutcome::Terminal,
                    });
                    return Err(RetryError::Terminal { error, attempts });
                }
                Ok(Err(AttemptError::Retryable(cause))) => {
                    tracing::warn!(attempt = number, cause = ?cause, "Attempt failed, will retry if budget allows");
                    attempts.push(RetryAttempt {
                        number,
                        delay,
                        outcome: AttemptOutcome::Retryable(cause.clone()),
                    });
                    last = cause;
                }
                Err(_) => {
                    tracing::warn!(
                        attempt = number,
                        timeout_ms = self.policy.attempt_timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    attempts.push(RetryAttempt {
                        number,
                        delay,
                        outcome: AttemptOutcome::Retryable(RetryCause::TimedOut),
                    });
                    last = RetryCause::TimedOut;
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts,
            total_wait,
            last,
        })
    }
}
