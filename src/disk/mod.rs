//! Disk Module
//!
//! Provides the persistent tier: a key-value store that keeps small values
//! inline in a SQLite manifest and large values as standalone files.

mod cache;
mod item;
mod manifest;
mod mode;
mod registry;
mod storage;

// Re-export public types
pub use cache::DiskCache;
pub use item::{unix_now, StorageItem};
pub use manifest::{Manifest, ManifestRecord, ManifestRow, Victim, SCHEMA_VERSION};
pub use mode::{select_placement, Placement};
pub use registry::PathLease;
pub(crate) use storage::validate_filename;
pub use storage::{KvStorage, DATA_DIR, MANIFEST_FILE, REMOVE_ALL_CHUNK, TRASH_DIR};
