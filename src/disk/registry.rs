//! Process-wide registry of open store directories.
//!
//! Two live handles on one directory would corrupt it, so opening a path that
//! is already registered fails with `AlreadyOpen`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::{CacheError, Result};

fn open_paths() -> MutexGuard<'static, HashSet<PathBuf>> {
    static OPEN_PATHS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_PATHS
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration of one directory; released on drop.
#[derive(Debug)]
pub struct PathLease {
    path: PathBuf,
}

impl PathLease {
    /// Claims `path`, which should already be canonical.
    pub fn acquire(path: &Path) -> Result<Self> {
        if !open_paths().insert(path.to_path_buf()) {
            return Err(CacheError::AlreadyOpen(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        open_paths().remove(&self.path);
    }
}
