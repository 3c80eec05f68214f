//! Tiered Cache - A two-tier key-value cache
//!
//! Provides a bounded in-memory LRU tier in front of a persistent disk tier
//! that stores small values inline in SQLite and large values as files.

pub mod config;
pub mod disk;
pub mod error;
pub mod facade;
pub mod logging;
pub mod memory;
pub mod tasks;

pub use config::{CacheConfig, DiskCacheConfig, MemoryCacheConfig, StorageMode};
pub use disk::{DiskCache, KvStorage, StorageItem};
pub use error::{CacheError, Result};
pub use facade::{AutoTrimWorkers, Cache, SharedBytes};
pub use logging::init_tracing;
pub use memory::{CacheStats, MemoryCache};
pub use tasks::{AutoTrim, TrimWorker};
