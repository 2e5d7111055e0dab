//! Advisory first-page result cache.
//!
//! Every store failure degrades to a miss or a skipped write; nothing in this
//! module can fail a search.

pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::search::{NormalizedQuery, SearchResultPage};

pub use store::{CacheEntry, CacheKey, CacheStore, InMemoryCacheStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub store_errors: u64,
    pub ttl_secs: u64,
}

pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    store_errors: AtomicU64,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    /// Cached first page for this query. Continuation requests always miss
    /// without touching the store.
    pub async fn get(&self, principal: Uuid, query: &NormalizedQuery) -> Option<SearchResultPage> {
        if !query.is_first_page() {
            return None;
        }

        let key = cache_key(principal, query);
        let now = Instant::now();
        match self.store.get(&key, now).await {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    principal = %principal,
                    digest = %query.digest(),
                    age_ms = entry.age(now).as_millis() as u64,
                    "Result cache hit"
                );
                let mut page = entry.page;
                page.cached = true;
                Some(page)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(principal = %principal, digest = %query.digest(), "Result cache miss");
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(principal = %principal, error = %e, "Cache store unavailable, treating as miss");
                None
            }
        }
    }

    /// Store a freshly fetched first page. Continuations are never stored.
    pub async fn put(&self, principal: Uuid, query: &NormalizedQuery, page: &SearchResultPage) {
        if !query.is_first_page() {
            return;
        }

        let now = Instant::now();
        let entry = CacheEntry {
            page: SearchResultPage {
                cached: false,
                ..page.clone()
            },
            inserted_at: now,
            expires_at: now + self.ttl,
        };
        if let Err(e) = self.store.put(cache_key(principal, query), entry).await {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(principal = %principal, error = %e, "Cache store unavailable, result not cached");
        }
    }

    /// Drop every cached page of a principal, e.g. after a mailbox mutation.
    pub async fn invalidate_principal(&self, principal: Uuid) -> usize {
        match self.store.remove_principal(principal).await {
            Ok(removed) => {
                tracing::debug!(principal = %principal, removed, "Invalidated cached searches");
                removed
            }
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(principal = %principal, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    pub async fn invalidate_query(&self, principal: Uuid, query: &NormalizedQuery) -> bool {
        match self.store.remove(&cache_key(principal, query)).await {
            Ok(removed) => removed,
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(principal = %principal, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired(Instant::now()).await {
            Ok(purged) => purged,
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Cache purge failed");
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len().await.ok(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

fn cache_key(principal: Uuid, query: &NormalizedQuery) -> CacheKey {
    CacheKey {
        principal,
        query_digest: query.digest().to_string(),
    }
}
