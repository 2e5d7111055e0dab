//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::{CacheEntry, CacheKey, CacheStore, InMemoryCacheStore};
use crate::email::{Credential, RawMessage, UpstreamClient, UpstreamError, UpstreamPage};
use crate::error::StoreError;
use crate::quota::{CounterStore, WindowSnapshot};

fn outage() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

/// Counter store whose backend is down.
pub struct UnreachableCounterStore;

#[async_trait]
impl CounterStore for UnreachableCounterStore {
    async fn record_within(
        &self,
        _key: Uuid,
        _now: Instant,
        _window: Duration,
        _limit: usize,
    ) -> Result<WindowSnapshot, StoreError> {
        Err(outage())
    }

    async fn sweep_idle(&self, _now: Instant, _window: Duration) -> Result<usize, StoreError> {
        Err(outage())
    }
}

/// Cache store whose backend is down.
pub struct UnreachableCacheStore;

#[async_trait]
impl CacheStore for UnreachableCacheStore {
    async fn get(&self, _key: &CacheKey, _now: Instant) -> Result<Option<CacheEntry>, StoreError> {
        Err(outage())
    }

    async fn put(&self, _key: CacheKey, _entry: CacheEntry) -> Result<(), StoreError> {
        Err(outage())
    }

    async fn remove(&self, _key: &CacheKey) -> Result<bool, StoreError> {
        Err(outage())
    }

    async fn remove_principal(&self, _principal: Uuid) -> Result<usize, StoreError> {
        Err(outage())
    }

    async fn purge_expired(&self, _now: Instant) -> Result<usize, StoreError> {
        Err(outage())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Err(outage())
    }
}

/// In-memory cache store that counts reads and writes reaching it.
pub struct CountingCacheStore {
    inner: InMemoryCacheStore,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl CountingCacheStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryCacheStore::new(1024),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingCacheStore {
    async fn get(&self, key: &CacheKey, now: Instant) -> Result<Option<CacheEntry>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key, now).await
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, entry).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.inner.remove(key).await
    }

    async fn remove_principal(&self, principal: Uuid) -> Result<usize, StoreError> {
        self.inner.remove_principal(principal).await
    }

    async fn purge_expired(&self, now: Instant) -> Result<usize, StoreError> {
        self.inner.purge_expired(now).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

/// Call the fake upstream received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub query: String,
    pub page_size: u32,
    pub page_token: Option<String>,
}

/// Scripted upstream. Replies are consumed in order; once the script runs
/// out every call gets `fallback`.
pub struct FakeUpstream {
    script: Mutex<VecDeque<Result<UpstreamPage, UpstreamError>>>,
    fallback: Result<UpstreamPage, UpstreamError>,
    calls: Mutex<Vec<RecordedCall>>,
    hang: bool,
}

impl FakeUpstream {
    /// Every call succeeds with `page`.
    pub fn always(page: UpstreamPage) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(page),
            calls: Mutex::new(Vec::new()),
            hang: false,
        }
    }

    /// Every call fails with `error`.
    pub fn failing(error: UpstreamError) -> Self {
        Self {
            fallback: Err(error),
            ..Self::always(page_of(0, None))
        }
    }

    /// Every call never completes.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::always(page_of(0, None))
        }
    }

    pub fn then(self, reply: Result<UpstreamPage, UpstreamError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn search(
        &self,
        _credential: &Credential,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<UpstreamPage, UpstreamError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedCall {
                query: query.to_string(),
                page_size,
                page_token: page_token.map(str::to_string),
            });
        if self.hang {
            std::future::pending::<()>().await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Upstream page with `count` header-only messages.
pub fn page_of(count: usize, next_page_token: Option<&str>) -> UpstreamPage {
    UpstreamPage {
        messages: (0..count)
            .map(|i| RawMessage {
                id: format!("{}", 1000 + i),
                headers: format!(
                    "From: sender{i}@example.com\r\nSubject: message {i}\r\nMessage-ID: <{i}@example.com>\r\n\r\n"
                )
                .into_bytes(),
                internal_date: None,
            })
            .collect(),
        next_page_token: next_page_token.map(str::to_string),
        estimated_total: Some(count as u64),
    }
}

pub fn credential(principal: Uuid) -> Credential {
    Credential {
        principal,
        address: format!("{}@gmail.com", principal.simple()),
        secret: "app-password".to_string(),
        imap_host: "imap.gmail.com".to_string(),
        imap_port: 993,
    }
}
