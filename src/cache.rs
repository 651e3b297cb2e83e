// Memoization of search results keyed by query signature.
//
// Values are stored as serialized bytes behind `CacheBackend`, so the in-memory
// store below can be swapped for a shared one without touching callers.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;

use crate::error::CacheError;

pub const FLIGHTS_NAMESPACE: &str = "flights";
pub const CHEAPEST_NAMESPACE: &str = "cheapest-flights";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub items_count: usize,
    pub size_bytes: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub skipped_empty_count: usize,
}

pub trait CacheBackend: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replaces any existing value. `ttl` is absolute from the time of the call.
    fn store(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes every key starting with `prefix`, returning how many went.
    fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    fn stats(&self) -> CacheStats;
}

pub fn create_cache_key(namespace: &str, key: &str) -> String {
    format!("{}::{}", namespace, key)
}

struct CacheEntry {
    value: Arc<[u8]>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_alive(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Counters {
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
    expired_count: AtomicUsize,
}

/// Sharded in-process store with per-entry absolute expiry.
#[derive(Default)]
pub struct TtlCache {
    store: DashMap<String, CacheEntry>,
    counters: Counters,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, entry| entry.is_alive(now));
        let removed = before.saturating_sub(self.store.len());
        self.counters
            .expired_count
            .fetch_add(removed, Ordering::Relaxed);
        removed
    }

    /// Periodic purge so keys that are never read again do not pile up.
    pub fn spawn_purge_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "purged expired cache entries");
                }
            }
        })
    }
}

impl CacheBackend for TtlCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();

        if let Some(entry) = self.store.get(key) {
            if entry.is_alive(now) {
                self.counters.hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.to_vec()));
            }
        } else {
            self.counters.miss_count.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        // Only remove if it is still the expired entry; a concurrent store may
        // already have replaced it.
        if self
            .store
            .remove_if(key, |_, entry| !entry.is_alive(now))
            .is_some()
        {
            self.counters.expired_count.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.miss_count.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn store(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        // Out-of-range TTLs are clamped instead of overflowing the clock.
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(crate::config::MAX_CACHE_TTL_SECS));
        let entry = CacheEntry {
            value: Arc::from(data),
            expires_at,
        };
        self.store.insert(key.to_string(), entry);
        Ok(())
    }

    fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.store.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        let size_bytes = self
            .store
            .iter()
            .map(|entry| entry.key().len() + entry.value.len())
            .sum();

        CacheStats {
            items_count: self.store.len(),
            size_bytes,
            hit_count: self.counters.hit_count.load(Ordering::Relaxed),
            miss_count: self.counters.miss_count.load(Ordering::Relaxed),
            expired_count: self.counters.expired_count.load(Ordering::Relaxed),
            skipped_empty_count: 0,
        }
    }
}

/// Namespaced get-or-compute over a `CacheBackend`.
///
/// Empty results are never stored, so an outage that produced nothing is
/// retried on the next call instead of being served for a whole TTL.
/// Concurrent misses on the same key each compute; the last store wins.
#[derive(Clone)]
pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    skipped_empty: Arc<AtomicUsize>,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            skipped_empty: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(TtlCache::new()))
    }

    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Vec<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let full_key = create_cache_key(namespace, key);

        if let Some(bytes) = self.backend.get(&full_key)? {
            match serde_json::from_slice::<Vec<T>>(&bytes) {
                Ok(values) => {
                    tracing::debug!(cache_key = %full_key, "cache hit");
                    return Ok(values);
                }
                Err(e) => {
                    tracing::warn!(cache_key = %full_key, error = %e, "discarding unreadable cache entry");
                }
            }
        }

        tracing::debug!(cache_key = %full_key, "cache miss");
        let values = compute().await?;

        if values.is_empty() {
            self.skipped_empty.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache_key = %full_key, "empty result not cached");
            return Ok(values);
        }

        let bytes = serde_json::to_vec(&values).map_err(CacheError::from)?;
        self.backend.store(&full_key, bytes, ttl)?;
        Ok(values)
    }

    pub fn invalidate_namespace(&self, namespace: &str) -> Result<usize, CacheError> {
        self.backend
            .invalidate_prefix(&create_cache_key(namespace, ""))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            skipped_empty_count: self.skipped_empty.load(Ordering::Relaxed),
            ..self.backend.stats()
        }
    }
}
