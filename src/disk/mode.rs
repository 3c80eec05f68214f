//! Backend selection
//!
//! Decides, per save, whether a value becomes a content file or an inline
//! manifest blob.

use crate::config::StorageMode;

/// Where a single value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inline,
    File,
}

/// Picks the placement for a value of `len` bytes.
///
/// File mode always writes a file and database mode never does. Mixed mode
/// writes a file when the caller supplied a filename or the value reaches
/// `inline_threshold`.
pub fn select_placement(
    mode: StorageMode,
    inline_threshold: usize,
    len: usize,
    explicit_filename: bool,
) -> Placement {
    match mode {
        StorageMode::File => Placement::File,
        StorageMode::Database => Placement::Inline,
        StorageMode::Mixed if explicit_filename || len >= inline_threshold => Placement::File,
        StorageMode::Mixed => Placement::Inline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_mode_always_file() {
        assert_eq!(select_placement(StorageMode::File, 1024, 0, false), Placement::File);
    }

    #[test]
    fn test_database_mode_ignores_filename() {
        assert_eq!(
            select_placement(StorageMode::Database, 1024, 1 << 20, true),
            Placement::Inline
        );
    }

    #[test]
    fn test_mixed_threshold_boundary() {
        assert_eq!(select_placement(StorageMode::Mixed, 1024, 1023, false), Placement::Inline);
        assert_eq!(select_placement(StorageMode::Mixed, 1024, 1024, false), Placement::File);
    }

    #[test]
    fn test_mixed_explicit_filename_forces_file() {
        assert_eq!(select_placement(StorageMode::Mixed, 1024, 10, true), Placement::File);
    }
}
