//! Storage Item Module
//!
//! Defines the key-value record of the disk tier and its clock helper.

use chrono::Utc;

// == Storage Item ==
/// A stored value with its metadata.
///
/// When `filename` is set the value lives in a content file of that name,
/// otherwise it is stored inline in the manifest row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageItem {
    pub key: String,
    /// Value bytes, empty when only metadata was requested
    pub value: Vec<u8>,
    pub filename: Option<String>,
    /// Value size in bytes
    pub size: u64,
    /// Last write (Unix seconds)
    pub mod_time: i64,
    /// Last read or write (Unix seconds)
    pub access_time: i64,
    /// Caller-opaque attachment
    pub extended_data: Option<Vec<u8>>,
}

impl StorageItem {
    /// True when the value is kept in a content file.
    pub fn is_file_backed(&self) -> bool {
        self.filename.is_some()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
