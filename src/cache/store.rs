use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::StoreError;
use crate::search::SearchResultPage;

const SHARDS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub principal: Uuid,
    pub query_digest: String,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub page: SearchResultPage,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }
}

/// Key-value store for first-page results with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live entry for `key`; expired entries are treated as absent.
    async fn get(&self, key: &CacheKey, now: Instant) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite.
    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError>;

    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Drop every entry of one principal. Returns how many were removed.
    async fn remove_principal(&self, principal: Uuid) -> Result<usize, StoreError>;

    async fn purge_expired(&self, now: Instant) -> Result<usize, StoreError>;

    /// Entries currently held, expired ones included.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Process-local cache store: LRU shards keyed by the full cache key, so a
/// busy principal spreads over every shard and a size ceiling bounds the
/// whole store. Eviction is per shard, so the ceiling is approximate.
pub struct InMemoryCacheStore {
    shards: Vec<Mutex<LruCache<CacheKey, CacheEntry>>>,
}

impl InMemoryCacheStore {
    /// `max_entries` is split evenly across shards, at least one per shard.
    pub fn new(max_entries: usize) -> Self {
        let per_shard = NonZeroUsize::new(max_entries.div_ceil(SHARDS)).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..SHARDS)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self { shards }
    }

    fn shard(&self, key: &CacheKey) -> Result<MutexGuard<'_, LruCache<CacheKey, CacheEntry>>, StoreError> {
        lock(&self.shards[shard_index(key)])
    }
}

fn shard_index(key: &CacheKey) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % SHARDS as u64) as usize
}

fn lock(
    shard: &Mutex<LruCache<CacheKey, CacheEntry>>,
) -> Result<MutexGuard<'_, LruCache<CacheKey, CacheEntry>>, StoreError> {
    shard
        .lock()
        .map_err(|_| StoreError::Unavailable("cache shard lock poisoned".to_string()))
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey, now: Instant) -> Result<Option<CacheEntry>, StoreError> {
        let mut shard = self.shard(key)?;
        let expired = match shard.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            shard.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError> {
        self.shard(&key)?.put(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.shard(key)?.pop(key).is_some())
    }

    async fn remove_principal(&self, principal: Uuid) -> Result<usize, StoreError> {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = lock(shard)?;
            let keys: Vec<CacheKey> = shard
                .iter()
                .filter(|(k, _)| k.principal == principal)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                shard.pop(key);
            }
            removed += keys.len();
        }
        Ok(removed)
    }

    async fn purge_expired(&self, now: Instant) -> Result<usize, StoreError> {
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = lock(shard)?;
            let keys: Vec<CacheKey> = shard
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                shard.pop(key);
            }
            purged += keys.len();
        }
        Ok(purged)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for shard in &self.shards {
            total += lock(shard)?.len();
        }
        Ok(total)
    }
}
