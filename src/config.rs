//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Default inline threshold for mixed mode: 20 KiB.
pub const DEFAULT_INLINE_THRESHOLD: usize = 20 * 1024;

// == Storage Mode ==
/// Where the disk tier keeps item values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Every value is a standalone file.
    File,
    /// Every value is a blob inside the metadata database.
    Database,
    /// Per-item choice based on size or an explicit filename.
    #[default]
    Mixed,
}

impl FromStr for StorageMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageMode::File),
            "database" | "sqlite" => Ok(StorageMode::Database),
            "mixed" => Ok(StorageMode::Mixed),
            other => Err(CacheError::InvalidArgument(format!(
                "unknown storage mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageMode::File => "file",
            StorageMode::Database => "database",
            StorageMode::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// Limits and behaviour of the in-memory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries
    pub count_limit: usize,
    /// Maximum cumulative cost
    pub cost_limit: usize,
    /// Maximum time since last access, None = unbounded
    pub age_limit: Option<Duration>,
    /// Interval between background trim passes
    pub auto_trim_interval: Duration,
    /// Evict everything when a memory warning is delivered
    pub remove_all_on_memory_warning: bool,
    /// Evict everything when the host moves to the background
    pub remove_all_on_background: bool,
    /// Drop evicted values on a worker thread when one is available
    pub release_asynchronously: bool,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            count_limit: usize::MAX,
            cost_limit: usize::MAX,
            age_limit: None,
            auto_trim_interval: Duration::from_secs(5),
            remove_all_on_memory_warning: true,
            remove_all_on_background: true,
            release_asynchronously: true,
        }
    }
}

/// Limits of the disk tier, applied by the periodic trim pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Maximum number of items
    pub count_limit: u64,
    /// Maximum cumulative value size in bytes
    pub size_limit: u64,
    /// Maximum time since last modification, None = unbounded
    pub age_limit: Option<Duration>,
    /// Interval between background trim passes
    pub auto_trim_interval: Duration,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            count_limit: u64::MAX,
            size_limit: u64::MAX,
            age_limit: None,
            auto_trim_interval: Duration::from_secs(60),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Placement policy of the disk tier
    pub storage_mode: StorageMode,
    /// Values smaller than this are stored inline in mixed mode
    pub inline_threshold: usize,
    /// Memory tier limits
    pub memory: MemoryCacheConfig,
    /// Disk tier limits
    pub disk: DiskCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            memory: MemoryCacheConfig::default(),
            disk: DiskCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_STORAGE_MODE` - file, database or mixed (default: mixed)
    /// - `CACHE_INLINE_THRESHOLD` - inline size threshold in bytes (default: 20480)
    /// - `CACHE_MEMORY_COUNT_LIMIT` / `CACHE_MEMORY_COST_LIMIT` (default: unbounded)
    /// - `CACHE_MEMORY_AGE_LIMIT_SECS` (default: unbounded)
    /// - `CACHE_MEMORY_TRIM_INTERVAL_SECS` (default: 5)
    /// - `CACHE_DISK_COUNT_LIMIT` / `CACHE_DISK_SIZE_LIMIT` (default: unbounded)
    /// - `CACHE_DISK_AGE_LIMIT_SECS` (default: unbounded)
    /// - `CACHE_DISK_TRIM_INTERVAL_SECS` (default: 60)
    pub fn from_env() -> Self {
        let memory_defaults = MemoryCacheConfig::default();
        let disk_defaults = DiskCacheConfig::default();

        Self {
            storage_mode: env_parse("CACHE_STORAGE_MODE").unwrap_or_default(),
            inline_threshold: env_parse("CACHE_INLINE_THRESHOLD")
                .unwrap_or(DEFAULT_INLINE_THRESHOLD),
            memory: MemoryCacheConfig {
                count_limit: env_parse("CACHE_MEMORY_COUNT_LIMIT")
                    .unwrap_or(memory_defaults.count_limit),
                cost_limit: env_parse("CACHE_MEMORY_COST_LIMIT")
                    .unwrap_or(memory_defaults.cost_limit),
                age_limit: env_parse("CACHE_MEMORY_AGE_LIMIT_SECS").map(Duration::from_secs),
                auto_trim_interval: env_parse("CACHE_MEMORY_TRIM_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(memory_defaults.auto_trim_interval),
                ..memory_defaults
            },
            disk: DiskCacheConfig {
                count_limit: env_parse("CACHE_DISK_COUNT_LIMIT")
                    .unwrap_or(disk_defaults.count_limit),
                size_limit: env_parse("CACHE_DISK_SIZE_LIMIT")
                    .unwrap_or(disk_defaults.size_limit),
                age_limit: env_parse("CACHE_DISK_AGE_LIMIT_SECS").map(Duration::from_secs),
                auto_trim_interval: env_parse("CACHE_DISK_TRIM_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(disk_defaults.auto_trim_interval),
            },
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.inline_threshold, DEFAULT_INLINE_THRESHOLD);
        assert_eq!(config.storage_mode, StorageMode::Mixed);
        assert_eq!(config.memory.count_limit, usize::MAX);
        assert_eq!(config.memory.auto_trim_interval, Duration::from_secs(5));
        assert!(config.memory.age_limit.is_none());
        assert_eq!(config.disk.size_limit, u64::MAX);
        assert_eq!(config.disk.auto_trim_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "CACHE_STORAGE_MODE",
            "CACHE_INLINE_THRESHOLD",
            "CACHE_MEMORY_COUNT_LIMIT",
            "CACHE_MEMORY_COST_LIMIT",
            "CACHE_MEMORY_AGE_LIMIT_SECS",
            "CACHE_MEMORY_TRIM_INTERVAL_SECS",
            "CACHE_DISK_COUNT_LIMIT",
            "CACHE_DISK_SIZE_LIMIT",
            "CACHE_DISK_AGE_LIMIT_SECS",
            "CACHE_DISK_TRIM_INTERVAL_SECS",
        ] {
            env::remove_var(name);
        }

        let config = CacheConfig::from_env();
        assert_eq!(config.storage_mode, StorageMode::Mixed);
        assert_eq!(config.inline_threshold, DEFAULT_INLINE_THRESHOLD);
        assert_eq!(config.memory, MemoryCacheConfig::default());
        assert_eq!(config.disk, DiskCacheConfig::default());
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!("file".parse::<StorageMode>().unwrap(), StorageMode::File);
        assert_eq!("SQLite".parse::<StorageMode>().unwrap(), StorageMode::Database);
        assert_eq!(" mixed ".parse::<StorageMode>().unwrap(), StorageMode::Mixed);
        assert!(matches!(
            "tape".parse::<StorageMode>(),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_config_serde_roundtrip_keeps_mode_name() {
        let config = CacheConfig {
            storage_mode: StorageMode::Database,
            ..CacheConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"database\""));
        let back: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
