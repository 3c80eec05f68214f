//! Error types for the cache
//!
//! Provides unified error handling using thiserror. A missing key is not an
//! error: lookups return `Ok(None)` for a normal miss.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the disk tier and the cache facade.
///
/// Memory-tier operations never fail and do not use this type.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A content file could not be read, written or deleted
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The embedded metadata database rejected a query or transaction
    #[error("Metadata failure: {0}")]
    Metadata(#[from] rusqlite::Error),

    /// Metadata references a content file that is missing or has the wrong size
    #[error("Integrity violation for key {key}: {detail}")]
    Integrity { key: String, detail: String },

    /// Empty key, malformed filename or similar caller error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Another live store already owns this directory
    #[error("Store already open: {}", .0.display())]
    AlreadyOpen(PathBuf),

    /// A typed object could not be encoded or decoded
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    // == Integrity ==
    /// Builds an integrity violation for `key`.
    pub fn integrity(key: &str, detail: impl Into<String>) -> Self {
        CacheError::Integrity {
            key: key.to_string(),
            detail: detail.into(),
        }
    }

    /// True when the error points at on-disk corruption rather than a
    /// transient failure.
    pub fn is_integrity(&self) -> bool {
        matches!(self, CacheError::Integrity { .. })
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_display_names_key() {
        let err = CacheError::integrity("avatar", "content file missing");
        assert!(err.is_integrity());
        assert_eq!(
            err.to_string(),
            "Integrity violation for key avatar: content file missing"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
        assert!(!err.is_integrity());
    }

    #[test]
    fn test_already_open_display() {
        let err = CacheError::AlreadyOpen(PathBuf::from("/tmp/store"));
        assert_eq!(err.to_string(), "Store already open: /tmp/store");
    }
}
