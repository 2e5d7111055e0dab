use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::StoreError;

/// State of one principal's window right after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether `now` was recorded.
    pub admitted: bool,
    /// Entries left in the window after pruning, including `now` when admitted.
    pub occupancy: usize,
    /// Oldest entry still in the window.
    pub oldest: Option<Instant>,
}

/// Shared store of per-principal request timestamps.
///
/// Implementations must make [`CounterStore::record_within`] atomic per key:
/// two concurrent calls for the same principal can never both observe a
/// count below the limit and both record.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Drop entries for `key` that are `window` or more older than `now`,
    /// count the rest, and record `now` only if the count is below `limit`.
    async fn record_within(
        &self,
        key: Uuid,
        now: Instant,
        window: Duration,
        limit: usize,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Forget principals with no entry younger than `window`.
    /// Returns how many windows were dropped.
    async fn sweep_idle(&self, now: Instant, window: Duration) -> Result<usize, StoreError>;
}

/// Process-local counter store. Each principal's window lives behind its
/// map shard's lock, so unrelated principals rarely contend and never wait
/// on each other across an await point.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<Uuid, VecDeque<Instant>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of principals currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

fn expired(now: Instant, at: Instant, window: Duration) -> bool {
    now.saturating_duration_since(at) >= window
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_within(
        &self,
        key: Uuid,
        now: Instant,
        window: Duration,
        limit: usize,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut entries = self.windows.entry(key).or_default();

        while entries
            .front()
            .is_some_and(|oldest| expired(now, *oldest, window))
        {
            entries.pop_front();
        }

        let admitted = entries.len() < limit;
        if admitted {
            entries.push_back(now);
        }

        Ok(WindowSnapshot {
            admitted,
            occupancy: entries.len(),
            oldest: entries.front().copied(),
        })
    }

    async fn sweep_idle(&self, now: Instant, window: Duration) -> Result<usize, StoreError> {
        let before = self.windows.len();
        self.windows.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|newest| !expired(now, *newest, window))
        });
        Ok(before.saturating_sub(self.windows.len()))
    }
}
