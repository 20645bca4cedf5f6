//! Time-bounded cache for upstream chain data.
//!
//! One lifetime is drawn per cache at construction, uniformly within the
//! configured bounds, so that many gateways fronting the same chain do not
//! refresh in lockstep. Entries are never deleted; they are overwritten on
//! refresh, which bounds the map by caller cardinality.
//!
//! Refreshes are single-flight per key: concurrent misses on one key wait on
//! a per-key lock and the first one to get it performs the upstream query.

use dashmap::DashMap;
use rand::Rng;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Draw one lifetime uniformly from `[lower, upper]`.
pub fn random_ttl(lower: Duration, upper: Duration) -> Duration {
    if lower >= upper {
        lower
    } else {
        rand::thread_rng().gen_range(lower..=upper)
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Key/value cache whose entries expire after a fixed per-instance lifetime.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
    refresh_locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Cache with an exact lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
        }
    }

    /// The lifetime chosen for this instance.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if present and unexpired (`Some` is a hit).
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if Instant::now() < entry.expires_at {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Store a value, restarting its lifetime.
    pub fn set(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Return the cached value, or run `fetch` once for this key and cache it.
    ///
    /// Callers that miss while another caller is fetching the same key wait
    /// for that fetch instead of issuing their own. A failed fetch caches
    /// nothing and its error is returned to the caller that ran it.
    pub async fn get_or_refresh<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let lock = Arc::clone(self.refresh_locks.entry(key.clone()).or_default().value());
        let _guard = lock.lock().await;

        // Someone else may have refreshed while we waited
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        debug!(key = ?key, ttl_secs = self.ttl.as_secs(), "Refreshing cache entry from upstream");
        let value = fetch().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Number of stored entries (expired ones included)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
