//! Key-Value Storage Module
//!
//! Hybrid disk store: small values inline in the SQLite manifest, large
//! values as content files in a managed directory.
//!
//! Ordering rule for every mutation: content files are written before the
//! manifest commit and deleted only after it. A crash in between leaves at
//! worst an orphan file, never a row pointing at missing content.
//!
//! A `KvStorage` is not safe for concurrent use; wrap it in
//! [`DiskCache`](crate::disk::DiskCache) to share it.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::StorageMode;
use crate::disk::manifest::{Manifest, ManifestRecord, ManifestRow, Victim};
use crate::disk::mode::{select_placement, Placement};
use crate::disk::registry::PathLease;
use crate::disk::{unix_now, StorageItem};
use crate::error::{CacheError, Result};

/// Manifest database file name inside the store directory.
pub const MANIFEST_FILE: &str = "manifest.sqlite";
/// Content file directory.
pub const DATA_DIR: &str = "data";
/// Staging directory for bulk deletion.
pub const TRASH_DIR: &str = "trash";

/// Rows deleted per transaction by [`KvStorage::remove_all_with_progress`].
pub const REMOVE_ALL_CHUNK: usize = 32;

// == KV Storage ==
pub struct KvStorage {
    path: PathBuf,
    data_dir: PathBuf,
    trash_dir: PathBuf,
    mode: StorageMode,
    inline_threshold: usize,
    manifest: Manifest,
    integrity_violations: AtomicU64,
    _lease: PathLease,
    /// Simulates a crash between the content write and the manifest commit.
    #[cfg(test)]
    crash_before_commit: bool,
}

impl KvStorage {
    // == Constructor ==
    /// Opens the store rooted at `path`, creating the directory layout and
    /// migrating the manifest as needed.
    ///
    /// Fails with `AlreadyOpen` while another `KvStorage` in this process
    /// owns the same directory.
    pub fn open(path: impl AsRef<Path>, mode: StorageMode, inline_threshold: usize) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        let path = fs::canonicalize(path)?;
        let lease = PathLease::acquire(&path)?;

        let data_dir = path.join(DATA_DIR);
        let trash_dir = path.join(TRASH_DIR);
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&trash_dir)?;
        let manifest = Manifest::open(&path.join(MANIFEST_FILE))?;

        info!(path = %path.display(), %mode, inline_threshold, "disk storage opened");
        Ok(Self {
            path,
            data_dir,
            trash_dir,
            mode,
            inline_threshold,
            manifest,
            integrity_violations: AtomicU64::new(0),
            _lease: lease,
            #[cfg(test)]
            crash_before_commit: false,
        })
    }

    /// Closes the store, releasing its directory for a future open.
    pub fn close(self) {
        debug!(path = %self.path.display(), "disk storage closed");
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Number of integrity violations seen since open.
    pub fn integrity_violations(&self) -> u64 {
        self.integrity_violations.load(Ordering::Relaxed)
    }

    // == Save ==
    /// Stores `value` under `key` with no filename or extended data.
    pub fn save(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.save_with(key, value, None, None)
    }

    /// Stores `value` under `key`.
    ///
    /// A supplied `filename` forces file placement in mixed mode and becomes
    /// the stem of the content file name. On failure the previous state of
    /// `key` is left untouched.
    pub fn save_with(
        &mut self,
        key: &str,
        value: &[u8],
        filename: Option<&str>,
        extended_data: Option<&[u8]>,
    ) -> Result<()> {
        validate_key(key)?;
        if let Some(name) = filename {
            validate_filename(name)?;
        }

        let placement =
            select_placement(self.mode, self.inline_threshold, value.len(), filename.is_some());
        let now = unix_now();

        let written = match placement {
            Placement::File => {
                let base = match filename {
                    Some(name) => name.to_string(),
                    None => hashed_name(key),
                };
                Some(write_content_file(&self.data_dir, &base, value)?)
            }
            Placement::Inline => None,
        };

        #[cfg(test)]
        if self.crash_before_commit {
            return Err(CacheError::Io(std::io::Error::new(
                ErrorKind::Interrupted,
                "simulated crash before manifest commit",
            )));
        }

        let row = ManifestRow {
            key,
            filename: written.as_deref(),
            size: value.len() as u64,
            inline_data: match placement {
                Placement::Inline => Some(value),
                Placement::File => None,
            },
            mod_time: now,
            access_time: now,
            extended_data,
        };

        match self.manifest.upsert(&row) {
            Ok(previous) => {
                if let Some(old) = previous.filter(|old| Some(old.as_str()) != written.as_deref()) {
                    self.delete_content_file(&old);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(name) = &written {
                    self.delete_content_file(name);
                }
                warn!(key, error = %e, "manifest commit failed, save rolled back");
                Err(e)
            }
        }
    }

    // == Get ==
    /// Returns the value and metadata for `key`, or `None` when absent.
    ///
    /// A row whose content file is missing or has the wrong length yields
    /// an `Integrity` error. A successful read refreshes the access time.
    pub fn get_item(&mut self, key: &str) -> Result<Option<StorageItem>> {
        validate_key(key)?;
        let Some(record) = self.manifest.get(key)? else {
            return Ok(None);
        };
        let item = self.resolve(record)?;
        self.refresh_access(&[key]);
        Ok(Some(item))
    }

    /// Returns only the value for `key`.
    pub fn get_value(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_item(key)?.map(|item| item.value))
    }

    /// Returns metadata for `key` without reading the value.
    pub fn get_item_info(&self, key: &str) -> Result<Option<StorageItem>> {
        validate_key(key)?;
        Ok(self.manifest.get_info(key)?.map(|record| StorageItem {
            key: record.key,
            value: Vec::new(),
            filename: record.filename,
            size: record.size,
            mod_time: record.mod_time,
            access_time: record.access_time,
            extended_data: record.extended_data,
        }))
    }

    /// Fetches every listed key in one manifest query.
    ///
    /// Keys that are absent or fail to resolve are left out.
    pub fn get_items<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<Vec<StorageItem>> {
        for key in keys {
            validate_key(key.as_ref())?;
        }
        let records = self.manifest.get_many(keys)?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key.clone();
            match self.resolve(record) {
                Ok(item) => items.push(item),
                Err(e) => debug!(key = %key, error = %e, "batch read skipped item"),
            }
        }
        let resolved: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();
        self.refresh_access(&resolved);
        Ok(items)
    }

    /// Like [`KvStorage::get_items`], keyed by item key.
    pub fn get_values<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<HashMap<String, Vec<u8>>> {
        Ok(self
            .get_items(keys)?
            .into_iter()
            .map(|item| (item.key, item.value))
            .collect())
    }

    // == Status ==
    pub fn item_exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.manifest.exists(key)
    }

    pub fn items_count(&self) -> Result<u64> {
        self.manifest.count()
    }

    /// Sum of all value sizes in bytes.
    pub fn items_size(&self) -> Result<u64> {
        self.manifest.total_size()
    }

    // == Remove ==
    /// Removes `key`. Returns whether a row existed.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.remove_many(&[key])? > 0)
    }

    /// Removes all listed keys in one transaction.
    pub fn remove_many<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<usize> {
        for key in keys {
            validate_key(key.as_ref())?;
        }
        let victims = self.manifest.delete_keys(keys)?;
        Ok(self.finish_removal(victims))
    }

    /// Removes items whose size is strictly greater than `size`.
    pub fn remove_items_larger_than(&mut self, size: u64) -> Result<usize> {
        // Stored sizes are SQLite integers, so none exceeds `i64::MAX`.
        let Ok(size) = i64::try_from(size) else {
            return Ok(0);
        };
        let victims = self.manifest.delete_larger_than(size)?;
        Ok(self.finish_removal(victims))
    }

    /// Removes items last modified strictly before `time` (Unix seconds).
    pub fn remove_items_earlier_than(&mut self, time: i64) -> Result<usize> {
        if time <= 0 {
            return Ok(0);
        }
        let victims = self.manifest.delete_earlier_than(time)?;
        Ok(self.finish_removal(victims))
    }

    /// Removes the oldest items until the total size is at most `max_size`.
    pub fn remove_items_to_fit_size(&mut self, max_size: u64) -> Result<usize> {
        if max_size == u64::MAX {
            return Ok(0);
        }
        let victims = self.manifest.delete_to_fit_size(max_size)?;
        Ok(self.finish_removal(victims))
    }

    /// Removes the oldest items until at most `max_count` remain.
    pub fn remove_items_to_fit_count(&mut self, max_count: u64) -> Result<usize> {
        if max_count == u64::MAX {
            return Ok(0);
        }
        let victims = self.manifest.delete_to_fit_count(max_count)?;
        Ok(self.finish_removal(victims))
    }

    // == Remove All ==
    /// Recreates the manifest and discards every content file.
    pub fn remove_all(&mut self) -> Result<()> {
        self.manifest.clear()?;

        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let staged = self.trash_dir.join(format!("data-{}", stamp));
        match fs::rename(&self.data_dir, &staged) {
            Ok(()) => {
                fs::create_dir_all(&self.data_dir)?;
                self.empty_trash()?;
            }
            Err(e) => {
                warn!(error = %e, "could not stage data directory, deleting in place");
                for entry in fs::read_dir(&self.data_dir)? {
                    fs::remove_file(entry?.path())?;
                }
            }
        }
        info!(path = %self.path.display(), "disk storage cleared");
        Ok(())
    }

    /// Removes every item in chunks, reporting `(removed, total)` after each.
    pub fn remove_all_with_progress<F>(&mut self, mut progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        let total = self.manifest.count()?;
        let mut removed = 0u64;
        loop {
            let victims = self.manifest.delete_oldest(REMOVE_ALL_CHUNK)?;
            if victims.is_empty() {
                break;
            }
            removed += self.finish_removal(victims) as u64;
            progress(removed, total);
        }
        Ok(())
    }

    // == Maintenance ==
    /// Deletes content files that no manifest row references and empties
    /// the trash. Returns the number of orphan files removed.
    pub fn reclaim_orphans(&mut self) -> Result<usize> {
        let referenced = self.manifest.filenames()?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !referenced.contains(name) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        self.empty_trash()?;
        if removed > 0 {
            info!(removed, "reclaimed orphan content files");
        }
        Ok(removed)
    }

    fn empty_trash(&self) -> Result<()> {
        for entry in fs::read_dir(&self.trash_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Deletes the content files of already-committed removals.
    fn finish_removal(&self, victims: Vec<Victim>) -> usize {
        for name in victims.iter().filter_map(|v| v.filename.as_deref()) {
            self.delete_content_file(name);
        }
        if !victims.is_empty() {
            debug!(removed = victims.len(), "items removed");
        }
        victims.len()
    }

    fn delete_content_file(&self, name: &str) {
        match fs::remove_file(self.data_dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            // The row is already gone; the file is now an orphan for the sweep.
            Err(e) => warn!(file = name, error = %e, "failed to delete content file"),
        }
    }

    fn resolve(&self, record: ManifestRecord) -> Result<StorageItem> {
        let value = match (&record.filename, record.inline_data) {
            (Some(name), _) => self.read_content_file(&record.key, name, record.size)?,
            (None, Some(data)) => data,
            (None, None) => {
                return Err(self.integrity(&record.key, "row has neither file nor inline value"));
            }
        };
        Ok(StorageItem {
            key: record.key,
            value,
            filename: record.filename,
            size: record.size,
            mod_time: record.mod_time,
            access_time: record.access_time,
            extended_data: record.extended_data,
        })
    }

    fn read_content_file(&self, key: &str, name: &str, size: u64) -> Result<Vec<u8>> {
        let bytes = match fs::read(self.data_dir.join(name)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(self.integrity(key, format!("content file {} is missing", name)));
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.len() as u64 != size {
            return Err(self.integrity(
                key,
                format!("content file {} has {} bytes, expected {}", name, bytes.len(), size),
            ));
        }
        Ok(bytes)
    }

    fn integrity(&self, key: &str, detail: impl Into<String>) -> CacheError {
        let err = CacheError::integrity(key, detail);
        self.integrity_violations.fetch_add(1, Ordering::Relaxed);
        warn!(path = %self.path.display(), error = %err, "integrity violation");
        err
    }

    fn refresh_access(&mut self, keys: &[&str]) {
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.manifest.touch(keys, unix_now()) {
            warn!(error = %e, "failed to refresh access time");
        }
    }
}

impl std::fmt::Debug for KvStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStorage")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("inline_threshold", &self.inline_threshold)
            .finish()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("key must not be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(CacheError::InvalidArgument(format!(
            "filename '{}' must be a single path component",
            name
        )));
    }
    Ok(())
}

/// Lowercase hex SHA-256 of the key.
fn hashed_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Writes `bytes` to `<base>.<n>` for the smallest free `n` and returns the
/// chosen name. The live file of a key is never overwritten in place.
fn write_content_file(dir: &Path, base: &str, bytes: &[u8]) -> Result<String> {
    for n in 0u32.. {
        let name = format!("{}.{}", base, n);
        let path = dir.join(&name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };
        let written = file.write_all(bytes).and_then(|_| file.sync_data());
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        return Ok(name);
    }
    Err(CacheError::InvalidArgument(format!(
        "no free content file name for '{}'",
        base
    )))
}
