//! Memory Entry Module
//!
//! Defines the structure for individual entries of the in-memory tier.

use std::time::{Duration, Instant};

// == Memory Entry ==
/// Represents a single cached object with its cost and last access time.
#[derive(Debug, Clone)]
pub struct MemoryEntry<K, V> {
    /// Lookup key
    pub key: K,
    /// The stored object
    pub value: V,
    /// Caller-assigned weight used for cost-based eviction
    pub cost: usize,
    /// Last time the entry was set or read
    pub time: Instant,
}

impl<K, V> MemoryEntry<K, V> {
    // == Constructor ==
    /// Creates a new entry accessed at `now`.
    pub fn new(key: K, value: V, cost: usize, now: Instant) -> Self {
        Self {
            key,
            value,
            cost,
            time: now,
        }
    }

    // == Touch ==
    /// Refreshes the access time.
    pub fn touch(&mut self, now: Instant) {
        self.time = now;
    }

    // == Age ==
    /// Time elapsed since the last access, zero if `now` is earlier.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.time)
    }

    // == Is Older Than ==
    /// Checks whether the entry exceeds `max_age`.
    ///
    /// Boundary condition: an entry exactly `max_age` old is still kept, only
    /// strictly older entries are stale.
    pub fn is_older_than(&self, max_age: Duration, now: Instant) -> bool {
        self.age(now) > max_age
    }
}
