//! Read-through query result cache
//!
//! Results are keyed by the query [`Fingerprint`] and live for as long as the
//! cache does: there is no eviction and no TTL. A per-key stripe lock makes
//! "compute at most once per fingerprint" hold under concurrent callers.
//!
//! Queries without a usable fingerprint bypass the cache and call straight
//! through.
//!
//! The stripe lock is held while the result is computed. A `compute` closure
//! may itself read through the same cache: a nested miss on a stripe the
//! current thread already holds runs without locking again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use querypipe_core::{
    error::Result, observe, CacheConfig, Fingerprint, LockManager, Query,
};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

thread_local! {
    /// `(cache address, stripe)` pairs locked by this thread.
    static HELD_STRIPES: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a stripe as held by the current thread until dropped.
struct HeldStripe {
    owner: usize,
    stripe: usize,
}

impl HeldStripe {
    fn is_held(owner: usize, stripe: usize) -> bool {
        HELD_STRIPES.with(|held| held.borrow().contains(&(owner, stripe)))
    }

    fn enter(owner: usize, stripe: usize) -> Self {
        HELD_STRIPES.with(|held| held.borrow_mut().push((owner, stripe)));
        Self { owner, stripe }
    }
}

impl Drop for HeldStripe {
    fn drop(&mut self) {
        HELD_STRIPES.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|h| *h == (self.owner, self.stripe)) {
                held.remove(pos);
            }
        });
    }
}

struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
}

/// Thread-safe, injectable query cache
///
/// # Example
///
/// ```
/// use querypipe::{CacheConfig, Query, QueryCache};
///
/// let cache = QueryCache::new(CacheConfig::default());
/// let query = Query::new("SELECT * FROM users WHERE age > ?").bind(40);
///
/// let first = cache.get_or_compute(&query, |_| Ok(2)).unwrap();
/// let second = cache.get_or_compute(&query, |_| Ok(99)).unwrap();
/// assert_eq!((first, second), (2, 2));
/// ```
pub struct QueryCache<V> {
    entries: DashMap<Fingerprint, CacheEntry<V>>,
    locks: LockManager,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            locks: LockManager::new(config.lock_stripes.max(1), config.lock_timeout()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
        }
    }

    /// Create a disabled cache (every lookup calls through).
    pub fn disabled() -> Self {
        Self::new(CacheConfig::disabled())
    }

    fn fingerprint(&self, query: &Query) -> Option<Fingerprint> {
        if !self.config.enabled {
            return None;
        }
        query.fingerprint()
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Option<V> {
        self.entries.get(fingerprint).map(|entry| entry.value.clone())
    }

    /// Cached result for `query`, if one exists.
    pub fn get(&self, query: &Query) -> Option<V> {
        let fingerprint = self.fingerprint(query)?;
        self.lookup(&fingerprint)
    }

    /// When the cached result for `query` was computed.
    pub fn created_at(&self, query: &Query) -> Option<DateTime<Utc>> {
        let fingerprint = self.fingerprint(query)?;
        self.entries.get(&fingerprint).map(|entry| entry.created_at)
    }

    /// Return the cached result for `query`, computing and storing it on a
    /// miss.
    ///
    /// Errors from `compute` are returned as-is and nothing is stored, so a
    /// later call computes again.
    ///
    /// `compute` may call back into this cache. If a nested read misses on the
    /// key being computed, both frames run their closures and the first value
    /// stored wins.
    pub fn get_or_compute<F>(&self, query: &Query, compute: F) -> Result<V>
    where
        F: FnOnce(&Query) -> Result<V>,
    {
        let Some(fingerprint) = self.fingerprint(query) else {
            self.bypasses.fetch_add(1, Ordering::Relaxed);
            observe::record_cache_lookup("bypass");
            debug!(sql = query.text(), "No fingerprint, bypassing cache");
            return compute(query);
        };

        if let Some(value) = self.lookup(&fingerprint) {
            return Ok(self.hit(&fingerprint, value));
        }

        let owner = self as *const Self as usize;
        let stripe = self.locks.stripe_index(&fingerprint.stripe_key());
        let (_guard, _held) = if HeldStripe::is_held(owner, stripe) {
            debug!(fingerprint = %fingerprint, "Stripe already held by this thread");
            (None, None)
        } else {
            let guard = self.locks.lock_stripe(stripe, self.locks.default_timeout())?;
            (Some(guard), Some(HeldStripe::enter(owner, stripe)))
        };

        // Another caller may have filled the entry while we waited
        if let Some(value) = self.lookup(&fingerprint) {
            return Ok(self.hit(&fingerprint, value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        observe::record_cache_lookup("miss");
        debug!(fingerprint = %fingerprint, "Cache miss");

        let value = compute(query)?;
        let stored = self
            .entries
            .entry(fingerprint)
            .or_insert_with(|| CacheEntry {
                value,
                created_at: Utc::now(),
            })
            .value
            .clone();
        observe::set_cache_size(self.entries.len());
        Ok(stored)
    }

    fn hit(&self, fingerprint: &Fingerprint, value: V) -> V {
        self.hits.fetch_add(1, Ordering::Relaxed);
        observe::record_cache_lookup("hit");
        debug!(fingerprint = %fingerprint, "Cache hit");
        value
    }

    /// Turn a query-taking read into its cached counterpart.
    pub fn wrap<'a, F>(&'a self, operation: F) -> impl Fn(&Query) -> Result<V> + 'a
    where
        F: Fn(&Query) -> Result<V> + 'a,
    {
        move |query: &Query| self.get_or_compute(query, &operation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            enabled: self.config.enabled,
        }
    }
}

/// Statistics about the cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries in the cache
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Lookups that had no fingerprint and called through
    pub bypasses: u64,
    pub enabled: bool,
}
