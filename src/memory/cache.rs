//! Memory Cache Module
//!
//! Thread-safe in-memory tier combining the LRU list with count, cost and age
//! limits.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::debug;

use crate::config::MemoryCacheConfig;
use crate::memory::{CacheStats, LruList};

/// Maximum evictions per lock acquisition during a trim pass.
pub const TRIM_BATCH: usize = 64;

/// Callback run when a pressure signal reaches the cache.
pub type PressureHook<K, V> = Box<dyn Fn(&MemoryCache<K, V>) + Send + Sync>;

struct Inner<K, V> {
    lru: LruList<K, V>,
    stats: CacheStats,
    config: MemoryCacheConfig,
}

// == Memory Cache ==
/// Bounded in-memory cache ordered by access recency.
///
/// Every operation runs under a single mutex, so the hash index and the
/// recency list are never observed out of sync. Operations never fail.
pub struct MemoryCache<K, V> {
    name: Option<String>,
    inner: Mutex<Inner<K, V>>,
    /// Runtime used to drop evicted values off the caller's thread
    release_handle: Option<Handle>,
    on_memory_warning: Option<PressureHook<K, V>>,
    on_enter_background: Option<PressureHook<K, V>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates an empty cache with the given limits.
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            name: None,
            inner: Mutex::new(Inner {
                lru: LruList::new(),
                stats: CacheStats::new(),
                config,
            }),
            release_handle: None,
            on_memory_warning: None,
            on_enter_background: None,
        }
    }

    /// Names the cache for log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Drops evicted values on `handle`'s blocking pool when
    /// `release_asynchronously` is enabled.
    pub fn with_release_handle(mut self, handle: Handle) -> Self {
        self.release_handle = Some(handle);
        self
    }

    /// Registers a hook run by [`MemoryCache::handle_memory_warning`].
    pub fn with_memory_warning_hook(
        mut self,
        hook: impl Fn(&MemoryCache<K, V>) + Send + Sync + 'static,
    ) -> Self {
        self.on_memory_warning = Some(Box::new(hook));
        self
    }

    /// Registers a hook run by [`MemoryCache::handle_enter_background`].
    pub fn with_background_hook(
        mut self,
        hook: impl Fn(&MemoryCache<K, V>) + Send + Sync + 'static,
    ) -> Self {
        self.on_enter_background = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    // == Contains ==
    /// Checks membership without affecting recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().lru.contains(key)
    }

    // == Get ==
    /// Returns the value for `key` and marks it most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.lock();
        let value = inner
            .lru
            .get(key, Instant::now())
            .map(|entry| entry.value.clone());
        match value {
            Some(_) => inner.stats.record_hit(),
            None => inner.stats.record_miss(),
        }
        value
    }

    // == Set ==
    /// Inserts or replaces `key` with a cost of zero.
    pub fn set(&self, key: K, value: V) {
        self.set_with_cost(key, value, 0);
    }

    // == Set With Cost ==
    /// Inserts or replaces `key`, placing it at the head.
    ///
    /// When the insert pushes the cache past its count limit the tail entry
    /// is evicted immediately; exceeding the cost limit triggers a cost trim
    /// after the lock is released.
    pub fn set_with_cost(&self, key: K, value: V, cost: usize) {
        let mut released = Vec::new();
        let over_cost = {
            let mut inner = self.lock();
            if let Some(old) = inner.lru.insert(key, value, cost, Instant::now()) {
                released.push(old);
            }
            if inner.lru.len() > inner.config.count_limit {
                if let Some(evicted) = inner.lru.pop_tail() {
                    inner.stats.record_evictions(1);
                    released.push(evicted.value);
                }
            }
            inner.lru.total_cost() > inner.config.cost_limit
        };
        self.release(released);

        if over_cost {
            let limit = self.lock().config.cost_limit;
            self.trim_to_cost(limit);
        }
    }

    // == Remove ==
    /// Removes `key`; no-op if absent.
    pub fn remove<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.lock().lru.remove(key);
        if let Some(entry) = removed {
            self.release(vec![entry.value]);
        }
    }

    // == Remove All ==
    /// Clears every entry; count and cost reset to zero.
    pub fn remove_all(&self) {
        let values = self.lock().lru.clear();
        self.release(values);
    }

    // == Totals ==
    pub fn total_count(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn total_cost(&self) -> usize {
        self.lock().lru.total_cost()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.lock().lru.iter().map(|entry| entry.key.clone()).collect()
    }

    // == Stats ==
    /// Returns current statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.total_count = inner.lru.len();
        stats.total_cost = inner.lru.total_cost();
        stats
    }

    // == Limits ==
    pub fn config(&self) -> MemoryCacheConfig {
        self.lock().config.clone()
    }

    pub fn set_count_limit(&self, limit: usize) {
        self.lock().config.count_limit = limit;
    }

    pub fn set_cost_limit(&self, limit: usize) {
        self.lock().config.cost_limit = limit;
    }

    pub fn set_age_limit(&self, limit: Option<Duration>) {
        self.lock().config.age_limit = limit;
    }

    // == Trim To Count ==
    /// Evicts from the tail until at most `count` entries remain.
    ///
    /// Returns the number of evicted entries.
    pub fn trim_to_count(&self, count: usize) -> usize {
        if count == 0 {
            return self.evict_all();
        }
        self.trim_while(|lru, _| lru.len() > count)
    }

    // == Trim To Cost ==
    /// Evicts from the tail until the cumulative cost is at most `cost`.
    pub fn trim_to_cost(&self, cost: usize) -> usize {
        if cost == 0 {
            return self.evict_all();
        }
        self.trim_while(|lru, _| lru.total_cost() > cost)
    }

    // == Trim To Age ==
    /// Evicts from the tail while the tail entry is older than `max_age`.
    ///
    /// Stops at the first entry within the bound: `get` and `set` always move
    /// an entry to the head with a fresh timestamp, so access times never
    /// increase towards the tail.
    pub fn trim_to_age(&self, max_age: Duration) -> usize {
        self.trim_while(|lru, now| {
            lru.peek_tail()
                .is_some_and(|entry| entry.is_older_than(max_age, now))
        })
    }

    // == Trim ==
    /// Applies every configured limit: cost, then count, then age.
    pub fn trim(&self) -> usize {
        let config = self.config();
        let mut removed = self.trim_to_cost(config.cost_limit);
        removed += self.trim_to_count(config.count_limit);
        if let Some(age) = config.age_limit {
            removed += self.trim_to_age(age);
        }
        if removed > 0 {
            debug!(cache = self.name().unwrap_or("memory"), removed, "memory trim pass");
        }
        removed
    }

    // == Pressure Signals ==
    /// Entry point for a host memory warning.
    pub fn handle_memory_warning(&self) {
        if let Some(hook) = &self.on_memory_warning {
            hook(self);
        }
        if self.lock().config.remove_all_on_memory_warning {
            self.remove_all();
        }
    }

    /// Entry point for the host moving to the background.
    pub fn handle_enter_background(&self) {
        if let Some(hook) = &self.on_enter_background {
            hook(self);
        }
        if self.lock().config.remove_all_on_background {
            self.remove_all();
        }
    }

    fn evict_all(&self) -> usize {
        let values = {
            let mut inner = self.lock();
            let values = inner.lru.clear();
            inner.stats.record_evictions(values.len());
            values
        };
        let removed = values.len();
        self.release(values);
        removed
    }

    /// Pops tail entries while `over` holds, at most [`TRIM_BATCH`] per lock
    /// hold so foreground calls can interleave.
    fn trim_while<F>(&self, mut over: F) -> usize
    where
        F: FnMut(&LruList<K, V>, Instant) -> bool,
    {
        let mut removed = 0;
        loop {
            let mut released = Vec::new();
            let finished = {
                let mut inner = self.lock();
                let now = Instant::now();
                loop {
                    if !over(&inner.lru, now) {
                        break true;
                    }
                    if released.len() >= TRIM_BATCH {
                        break false;
                    }
                    match inner.lru.pop_tail() {
                        Some(entry) => released.push(entry.value),
                        None => break true,
                    }
                }
            };
            {
                self.lock().stats.record_evictions(released.len());
            }
            removed += released.len();
            self.release(released);
            if finished {
                return removed;
            }
        }
    }

    fn release(&self, values: Vec<V>) {
        if values.is_empty() {
            return;
        }
        let asynchronous = self.lock().config.release_asynchronously;
        match &self.release_handle {
            Some(handle) if asynchronous => {
                handle.spawn_blocking(move || drop(values));
            }
            _ => drop(values),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // A panic while holding the lock leaves the list consistent: every
        // mutation completes before any user code runs.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
