//! Memory Module
//!
//! Provides the in-memory tier: an LRU cache bounded by count, cost and age.

mod cache;
mod entry;
mod lru;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use cache::{MemoryCache, PressureHook, TRIM_BATCH};
pub use entry::MemoryEntry;
pub use lru::{Iter, LruList};
pub use stats::CacheStats;
