//! Integration Tests for the Tiered Cache
//!
//! Exercises the public API end to end against real directories.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tiered_cache::disk::DATA_DIR;
use tiered_cache::{
    init_tracing, Cache, CacheConfig, CacheError, DiskCacheConfig, KvStorage, MemoryCacheConfig,
    StorageMode,
};
use tokio::runtime::Handle;

// == Helper Functions ==

fn config(inline_threshold: usize) -> CacheConfig {
    CacheConfig {
        inline_threshold,
        ..CacheConfig::default()
    }
}

fn data_files(cache: &Cache) -> usize {
    std::fs::read_dir(cache.path().join(DATA_DIR)).unwrap().count()
}

// == Read-Through / Write-Through ==

#[test]
fn test_value_survives_reopen() {
    init_tracing();
    let root = TempDir::new().unwrap();

    {
        let cache = Cache::open(root.path(), "feeds", config(1024)).unwrap();
        cache.set("small", b"tiny").unwrap();
        cache.set("large", &vec![9u8; 4096]).unwrap();
    }

    let cache = Cache::open(root.path(), "feeds", config(1024)).unwrap();
    assert_eq!(cache.memory().total_count(), 0);
    assert_eq!(&*cache.get("small").unwrap().unwrap(), b"tiny");
    assert_eq!(cache.get("large").unwrap().unwrap().len(), 4096);
    assert_eq!(cache.memory().total_count(), 2);
}

#[test]
fn test_second_open_of_same_name_fails() {
    let root = TempDir::new().unwrap();
    let _cache = Cache::open(root.path(), "shared", CacheConfig::default()).unwrap();

    let second = Cache::open(root.path(), "shared", CacheConfig::default());
    assert!(matches!(second, Err(CacheError::AlreadyOpen(_))));
}

#[test]
fn test_names_are_isolated() {
    let root = TempDir::new().unwrap();
    let first = Cache::open(root.path(), "first", CacheConfig::default()).unwrap();
    let second = Cache::open(root.path(), "second", CacheConfig::default()).unwrap();

    first.set("k", b"one").unwrap();

    assert!(second.get("k").unwrap().is_none());
    assert_eq!(&*first.get("k").unwrap().unwrap(), b"one");
}

#[test]
fn test_memory_eviction_falls_back_to_disk() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(
        root.path(),
        "bounded",
        CacheConfig {
            memory: MemoryCacheConfig {
                count_limit: 2,
                ..MemoryCacheConfig::default()
            },
            ..CacheConfig::default()
        },
    )
    .unwrap();

    for key in ["x", "y", "z"] {
        cache.set(key, key.as_bytes()).unwrap();
    }

    assert!(!cache.memory().contains("x"));
    assert_eq!(&*cache.get("x").unwrap().unwrap(), b"x");
    assert_eq!(cache.memory().total_count(), 2);
    assert_eq!(cache.disk().total_count().unwrap(), 3);
}

// == Placement ==

#[test]
fn test_mixed_mode_places_by_size() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(root.path(), "mixed", config(1024)).unwrap();

    cache.set("a", &[1u8; 10]).unwrap();
    cache.set("b", &[2u8; 5000]).unwrap();

    assert!(!cache.disk().get_item("a").unwrap().unwrap().is_file_backed());
    assert!(cache.disk().get_item("b").unwrap().unwrap().is_file_backed());
    assert_eq!(data_files(&cache), 1);
}

#[test]
fn test_remove_larger_than_keeps_small_items() {
    let root = TempDir::new().unwrap();
    let mut storage = KvStorage::open(root.path().join("kv"), StorageMode::Mixed, 1024).unwrap();

    storage.save("a", &[1u8; 10]).unwrap();
    storage.save("b", &[2u8; 5000]).unwrap();
    assert_eq!(storage.remove_items_larger_than(1024).unwrap(), 1);

    assert_eq!(storage.items_count().unwrap(), 1);
    assert!(storage.item_exists("a").unwrap());
    assert!(!storage.item_exists("b").unwrap());
}

#[test]
fn test_database_mode_writes_no_files() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(
        root.path(),
        "db",
        CacheConfig {
            storage_mode: StorageMode::Database,
            ..CacheConfig::default()
        },
    )
    .unwrap();

    cache.set("big", &vec![7u8; 100_000]).unwrap();

    assert_eq!(data_files(&cache), 0);
    assert_eq!(cache.get("big").unwrap().unwrap().len(), 100_000);
}

#[test]
fn test_missing_content_file_is_integrity_error() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(root.path(), "broken", config(16)).unwrap();
    cache.set("k", &[3u8; 64]).unwrap();
    cache.memory().remove_all();

    for entry in std::fs::read_dir(cache.path().join(DATA_DIR)).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let err = cache.get("k").unwrap_err();
    assert!(err.is_integrity());
    assert_eq!(cache.disk().integrity_violations(), 1);
}

// == Typed Objects ==

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
}

#[test]
fn test_object_round_trip_through_disk() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(root.path(), "objects", CacheConfig::default()).unwrap();
    let profile = Profile {
        id: 7,
        name: "river".to_string(),
    };

    cache.set_object("profile:7", &profile).unwrap();
    cache.memory().remove_all();

    assert_eq!(cache.get_object::<Profile>("profile:7").unwrap(), Some(profile));
    assert!(cache.get_object::<Profile>("profile:8").unwrap().is_none());
}

#[test]
fn test_object_decode_failure_is_serialization_error() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(root.path(), "objects", CacheConfig::default()).unwrap();
    cache.set("raw", b"not json").unwrap();

    let result = cache.get_object::<Profile>("raw");
    assert!(matches!(result, Err(CacheError::Serialization(_))));
}

// == Remove All ==

#[test]
fn test_remove_all_with_progress_reports_chunks() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(root.path(), "bulk", config(8)).unwrap();
    for i in 0..40 {
        cache.set(&format!("k{:02}", i), &[i as u8; 16]).unwrap();
    }

    let mut reports = Vec::new();
    cache
        .remove_all_with_progress(|removed, total| reports.push((removed, total)))
        .unwrap();

    assert_eq!(reports, vec![(32, 40), (40, 40)]);
    assert_eq!(cache.memory().total_count(), 0);
    assert_eq!(cache.disk().total_count().unwrap(), 0);
    assert_eq!(data_files(&cache), 0);
}

#[test]
fn test_remove_all_then_reuse() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open(root.path(), "reuse", config(8)).unwrap();
    cache.set("k", &[1u8; 32]).unwrap();

    cache.remove_all().unwrap();
    assert!(!cache.contains("k").unwrap());

    cache.set("k", &[2u8; 32]).unwrap();
    assert_eq!(&*cache.get("k").unwrap().unwrap(), &[2u8; 32]);
}

// == Auto Trim ==

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_trim_enforces_both_tiers() {
    let root = TempDir::new().unwrap();
    let cache = Cache::open_path_with_runtime(
        root.path().join("trimmed"),
        CacheConfig {
            memory: MemoryCacheConfig {
                auto_trim_interval: Duration::from_millis(50),
                ..MemoryCacheConfig::default()
            },
            disk: DiskCacheConfig {
                count_limit: 3,
                auto_trim_interval: Duration::from_millis(50),
                ..DiskCacheConfig::default()
            },
            ..CacheConfig::default()
        },
        Some(Handle::current()),
    )
    .unwrap();
    for i in 0..8 {
        cache.set(&format!("k{}", i), b"v").unwrap();
    }
    cache.memory().set_count_limit(2);

    let workers = cache.spawn_auto_trim(&Handle::current());
    tokio::time::sleep(Duration::from_millis(400)).await;
    workers.shutdown().await;

    assert_eq!(cache.memory().keys(), vec!["k7", "k6"]);
    assert_eq!(cache.disk().total_count().unwrap(), 3);
}
