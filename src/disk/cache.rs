//! Disk Cache Module
//!
//! Shares one `KvStorage` between threads. Every call takes the same
//! non-reentrant mutex, so exactly one caller touches the store at a time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{DiskCacheConfig, StorageMode};
use crate::disk::{unix_now, KvStorage, StorageItem};
use crate::error::Result;

// == Disk Cache ==
#[derive(Debug)]
pub struct DiskCache {
    storage: Mutex<KvStorage>,
    config: DiskCacheConfig,
}

impl DiskCache {
    // == Constructor ==
    /// Opens the store at `path` with the given placement policy and limits.
    pub fn open(
        path: impl AsRef<Path>,
        mode: StorageMode,
        inline_threshold: usize,
        config: DiskCacheConfig,
    ) -> Result<Self> {
        let storage = KvStorage::open(path, mode, inline_threshold)?;
        Ok(Self::from_storage(storage, config))
    }

    /// Takes ownership of an already open store.
    pub fn from_storage(storage: KvStorage, config: DiskCacheConfig) -> Self {
        Self {
            storage: Mutex::new(storage),
            config,
        }
    }

    pub fn config(&self) -> &DiskCacheConfig {
        &self.config
    }

    // == Access ==
    pub fn contains(&self, key: &str) -> Result<bool> {
        self.storage().item_exists(key)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.storage().get_value(key)
    }

    pub fn get_item(&self, key: &str) -> Result<Option<StorageItem>> {
        self.storage().get_item(key)
    }

    pub fn get_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<HashMap<String, Vec<u8>>> {
        self.storage().get_values(keys)
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.storage().save(key, value)
    }

    pub fn set_with(
        &self,
        key: &str,
        value: &[u8],
        filename: Option<&str>,
        extended_data: Option<&[u8]>,
    ) -> Result<()> {
        self.storage().save_with(key, value, filename, extended_data)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.storage().remove(key)
    }

    pub fn remove_all(&self) -> Result<()> {
        self.storage().remove_all()
    }

    pub fn remove_all_with_progress<F>(&self, progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        self.storage().remove_all_with_progress(progress)
    }

    // == Status ==
    pub fn total_count(&self) -> Result<u64> {
        self.storage().items_count()
    }

    pub fn total_size(&self) -> Result<u64> {
        self.storage().items_size()
    }

    pub fn integrity_violations(&self) -> u64 {
        self.storage().integrity_violations()
    }

    // == Trim ==
    pub fn trim_to_count(&self, count: u64) -> Result<usize> {
        self.storage().remove_items_to_fit_count(count)
    }

    pub fn trim_to_size(&self, size: u64) -> Result<usize> {
        self.storage().remove_items_to_fit_size(size)
    }

    /// Removes items not modified within `max_age`.
    pub fn trim_to_age(&self, max_age: Duration) -> Result<usize> {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = unix_now().saturating_sub(max_age);
        self.storage().remove_items_earlier_than(cutoff)
    }

    /// Applies every configured limit: count, then size, then age.
    pub fn trim(&self) -> Result<usize> {
        let mut removed = self.trim_to_count(self.config.count_limit)?;
        removed += self.trim_to_size(self.config.size_limit)?;
        if let Some(age) = self.config.age_limit {
            removed += self.trim_to_age(age)?;
        }
        if removed > 0 {
            debug!(removed, "disk trim pass");
        }
        Ok(removed)
    }

    /// Deletes unreferenced content files.
    pub fn reclaim_orphans(&self) -> Result<usize> {
        let removed = self.storage().reclaim_orphans()?;
        info!(removed, "orphan sweep finished");
        Ok(removed)
    }

    fn storage(&self) -> MutexGuard<'_, KvStorage> {
        // Store state lives in the manifest; a panicked holder leaves
        // nothing half-written in memory.
        self.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
