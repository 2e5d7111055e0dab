use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::store::CounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Sliding window length.
    pub window: Duration,
    /// Requests allowed per principal inside one window.
    pub burst_limit: usize,
    /// Rejection events kept for inspection.
    pub rejection_log_size: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            burst_limit: 250,
            rejection_log_size: 128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed {
        occupancy: usize,
    },
    /// Nothing was recorded. `retry_after` is when the oldest entry leaves
    /// the window.
    Rejected {
        occupancy: usize,
        retry_after: Duration,
    },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }
}

/// One rejected check, kept for capacity planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionEvent {
    pub principal: Uuid,
    pub occupancy: usize,
    pub limit: usize,
    pub at: DateTime<Utc>,
}

/// Per-principal sliding-window limiter over a shared [`CounterStore`].
pub struct QuotaLimiter {
    store: Arc<dyn CounterStore>,
    config: QuotaConfig,
    rejections: Mutex<VecDeque<RejectionEvent>>,
}

impl QuotaLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: QuotaConfig) -> Self {
        Self {
            store,
            rejections: Mutex::new(VecDeque::with_capacity(config.rejection_log_size)),
            config,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Count this request against the principal's window, or reject it.
    ///
    /// If the counter store is unreachable the request is allowed: the limiter
    /// protects the upstream quota, it must not take search down with it.
    pub async fn check_and_record(&self, principal: Uuid) -> QuotaDecision {
        let now = Instant::now();
        let snapshot = match self
            .store
            .record_within(principal, now, self.config.window, self.config.burst_limit)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    principal = %principal,
                    error = %e,
                    "Counter store unavailable, allowing request"
                );
                return QuotaDecision::Allowed { occupancy: 0 };
            }
        };

        if snapshot.admitted {
            return QuotaDecision::Allowed {
                occupancy: snapshot.occupancy,
            };
        }

        let retry_after = snapshot
            .oldest
            .map(|oldest| (oldest + self.config.window).saturating_duration_since(now))
            .unwrap_or(self.config.window);

        tracing::info!(
            principal = %principal,
            occupancy = snapshot.occupancy,
            limit = self.config.burst_limit,
            retry_after_ms = retry_after.as_millis() as u64,
            "Quota window full, request rejected"
        );
        self.remember(RejectionEvent {
            principal,
            occupancy: snapshot.occupancy,
            limit: self.config.burst_limit,
            at: Utc::now(),
        });

        QuotaDecision::Rejected {
            occupancy: snapshot.occupancy,
            retry_after,
        }
    }

    /// Most recent rejections, oldest first.
    pub fn recent_rejections(&self) -> Vec<RejectionEvent> {
        match self.rejections.lock() {
            Ok(log) => log.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Drop windows of principals that have been idle for a whole window.
    pub async fn sweep_idle(&self) -> usize {
        match self
            .store
            .sweep_idle(Instant::now(), self.config.window)
            .await
        {
            Ok(dropped) => dropped,
            Err(e) => {
                tracing::warn!(error = %e, "Counter store sweep failed");
                0
            }
        }
    }

    fn remember(&self, event: RejectionEvent) {
        let capacity = self.config.rejection_log_size;
        if capacity == 0 {
            return;
        }
        let mut log = match self.rejections.lock() {
            Ok(log) => log,
            Err(poisoned) => poisoned.into_inner(),
        };
        while log.len() >= capacity {
            log.pop_front();
        }
        log.push_back(event);
    }
}
