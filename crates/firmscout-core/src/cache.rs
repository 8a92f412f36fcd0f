//! TTL-keyed response cache.
//!
//! Thin facade over a `moka` future cache with a per-entry TTL policy.
//! Expired entries are absent on read; a periodic sweep task drives moka's
//! housekeeping so keys that are never re-read still get evicted instead of
//! accumulating for the process lifetime.

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use tokio::task::JoinHandle;

const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Default interval for the background eviction sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Shared TTL cache. Cloning is cheap and clones share storage.
#[derive(Clone)]
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, Entry<V>>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Returns the cached value, or `None` when absent or expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await.map(|e| e.value)
    }

    pub async fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.inner.insert(key.into(), Entry { value, ttl }).await;
    }

    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn remove(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of live entries (pending evictions included).
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a background task that periodically runs eviction housekeeping.
    /// Abort the returned handle to stop the sweep.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.run_pending_tasks().await;
                tracing::trace!(entries = cache.entry_count(), "Cache sweep complete");
            }
        })
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
