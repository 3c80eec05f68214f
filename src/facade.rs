//! Cache Facade
//!
//! Composes the memory tier (fast path) and the disk tier (durable path)
//! under one name with read-through and write-through semantics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::disk::{validate_filename, DiskCache};
use crate::error::{CacheError, Result};
use crate::memory::MemoryCache;
use crate::tasks::TrimWorker;

/// Value type held by the memory tier; cloning shares the bytes.
pub type SharedBytes = Arc<[u8]>;

// == Cache ==
/// A named two-tier cache.
///
/// Each name owns its own directory; two caches never share a store.
pub struct Cache {
    name: String,
    path: PathBuf,
    memory: Arc<MemoryCache<String, SharedBytes>>,
    disk: Arc<DiskCache>,
}

impl Cache {
    // == Constructors ==
    /// Opens the cache `name` under `root`, i.e. in `root/<name>`.
    pub fn open(root: impl AsRef<Path>, name: &str, config: CacheConfig) -> Result<Self> {
        validate_name(name)?;
        Self::open_path_with_runtime(root.as_ref().join(name), config, None)
    }

    /// Opens a cache whose directory is `path`; the name is its last component.
    pub fn open_path(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        Self::open_path_with_runtime(path, config, None)
    }

    /// Opens a cache at `path`, dropping evicted memory values on `runtime`'s
    /// blocking pool when `release_asynchronously` is configured.
    pub fn open_path_with_runtime(
        path: impl AsRef<Path>,
        config: CacheConfig,
        runtime: Option<Handle>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CacheError::InvalidArgument(format!("{} has no cache name", path.display()))
            })?
            .to_string();

        let disk = DiskCache::open(
            &path,
            config.storage_mode,
            config.inline_threshold,
            config.disk.clone(),
        )?;

        let mut memory = MemoryCache::new(config.memory.clone()).with_name(name.clone());
        if let Some(handle) = runtime {
            memory = memory.with_release_handle(handle);
        }

        info!(cache = %name, path = %path.display(), "cache opened");
        Ok(Self {
            name,
            path,
            memory: Arc::new(memory),
            disk: Arc::new(disk),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn memory(&self) -> &Arc<MemoryCache<String, SharedBytes>> {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<DiskCache> {
        &self.disk
    }

    // == Contains ==
    /// Checks the memory tier, then the disk tier.
    pub fn contains(&self, key: &str) -> Result<bool> {
        if self.memory.contains(key) {
            return Ok(true);
        }
        self.disk.contains(key)
    }

    // == Get ==
    /// Returns the value for `key`, promoting disk hits into memory with a
    /// cost equal to their byte size.
    pub fn get(&self, key: &str) -> Result<Option<SharedBytes>> {
        if let Some(value) = self.memory.get(key) {
            return Ok(Some(value));
        }
        let Some(bytes) = self.disk.get(key)? else {
            return Ok(None);
        };
        let value: SharedBytes = bytes.into();
        self.memory
            .set_with_cost(key.to_string(), value.clone(), value.len());
        Ok(Some(value))
    }

    // == Set ==
    /// Stores `value` in memory first, then persists it.
    ///
    /// Same-process readers see the value before the disk write lands; an
    /// `Err` means the value is cached in memory but not durable.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.set_with(key, value, None, None)
    }

    /// Like [`Cache::set`], with a filename hint and extended data for the
    /// disk tier.
    pub fn set_with(
        &self,
        key: &str,
        value: &[u8],
        filename: Option<&str>,
        extended_data: Option<&[u8]>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty".to_string()));
        }
        if let Some(name) = filename {
            validate_filename(name)?;
        }
        self.memory
            .set_with_cost(key.to_string(), SharedBytes::from(value), value.len());
        self.disk.set_with(key, value, filename, extended_data)
    }

    // == Typed Objects ==
    /// Encodes `object` as JSON and stores it.
    pub fn set_object<T: Serialize>(&self, key: &str, object: &T) -> Result<()> {
        let bytes = serde_json::to_vec(object)?;
        self.set(key, &bytes)
    }

    /// Loads and decodes a JSON object stored with [`Cache::set_object`].
    pub fn get_object<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // == Remove ==
    /// Removes `key` from both tiers. The memory removal always happens.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.memory.remove(key);
        self.disk.remove(key).map(|_| ())
    }

    /// Clears both tiers.
    pub fn remove_all(&self) -> Result<()> {
        self.memory.remove_all();
        self.disk.remove_all()
    }

    /// Clears both tiers, reporting `(removed, total)` as disk chunks commit.
    pub fn remove_all_with_progress<F>(&self, progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        self.memory.remove_all();
        let result = self.disk.remove_all_with_progress(progress);
        if let Err(e) = &result {
            warn!(cache = %self.name, error = %e, "remove all stopped early");
        }
        result
    }

    // == Pressure Signals ==
    pub fn handle_memory_warning(&self) {
        self.memory.handle_memory_warning();
    }

    pub fn handle_enter_background(&self) {
        self.memory.handle_enter_background();
    }

    // == Maintenance ==
    /// Deletes disk content files that no manifest row references.
    pub fn reclaim_orphans(&self) -> Result<usize> {
        self.disk.reclaim_orphans()
    }

    /// Starts the periodic trim workers of both tiers on `runtime`.
    pub fn spawn_auto_trim(&self, runtime: &Handle) -> AutoTrimWorkers {
        AutoTrimWorkers {
            memory: TrimWorker::spawn(self.memory.clone(), runtime),
            disk: TrimWorker::spawn(self.disk.clone(), runtime),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Trim workers of one cache.
#[derive(Debug)]
pub struct AutoTrimWorkers {
    pub memory: TrimWorker,
    pub disk: TrimWorker,
}

impl AutoTrimWorkers {
    /// Stops both workers and waits for them.
    pub async fn shutdown(self) {
        self.memory.shutdown().await;
        self.disk.shutdown().await;
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(CacheError::InvalidArgument(format!(
            "cache name '{}' must be a single path component",
            name
        )));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Cache {
        Cache::open(dir.path(), "images", CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_open_uses_name_subdirectory() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert_eq!(cache.name(), "images");
        assert!(dir.path().join("images").is_dir());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = TempDir::new().unwrap();
        for name in ["", "..", "a/b"] {
            assert!(matches!(
                Cache::open(dir.path(), name, CacheConfig::default()),
                Err(CacheError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_set_writes_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.set("k", b"value").unwrap();

        assert!(cache.memory().contains("k"));
        assert_eq!(cache.memory().total_cost(), 5);
        assert!(cache.disk().contains("k").unwrap());
    }

    #[test]
    fn test_get_promotes_disk_hit() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("k", b"value").unwrap();
        cache.memory().remove_all();

        let value = cache.get("k").unwrap().unwrap();

        assert_eq!(&*value, b"value");
        assert!(cache.memory().contains("k"));
        assert_eq!(cache.memory().total_cost(), 5);
    }

    #[test]
    fn test_get_miss() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        assert!(cache.get("absent").unwrap().is_none());
        assert!(!cache.contains("absent").unwrap());
    }

    #[test]
    fn test_remove_clears_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("k", b"v").unwrap();

        cache.remove("k").unwrap();

        assert!(!cache.memory().contains("k"));
        assert!(!cache.disk().contains("k").unwrap());
    }

    #[test]
    fn test_empty_key_rejected_before_memory_write() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert!(matches!(cache.set("", b"v"), Err(CacheError::InvalidArgument(_))));
        assert_eq!(cache.memory().total_count(), 0);
    }

    #[test]
    fn test_bad_filename_rejected_before_memory_write() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        let result = cache.set_with("k", b"v", Some("../x"), None);

        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        assert!(!cache.memory().contains("k"));
        assert!(!cache.contains("k").unwrap());
    }

    #[test]
    fn test_memory_warning_keeps_disk() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("k", b"v").unwrap();

        cache.handle_memory_warning();

        assert_eq!(cache.memory().total_count(), 0);
        assert_eq!(&*cache.get("k").unwrap().unwrap(), b"v");
    }
}
