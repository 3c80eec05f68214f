//! Manifest Module
//!
//! SQLite metadata store: one row per key with size, timestamps, optional
//! content filename, optional inline value and optional extended data.
//! Every mutation runs in its own transaction, and hot queries go through the
//! connection's prepared-statement cache.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

use crate::error::Result;

/// Schema version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Rows examined per step when trimming towards a target.
const TRIM_STEP: usize = 32;

/// Keys bound per `IN (...)` query, below SQLite's variable limit.
const MAX_KEYS_PER_QUERY: usize = 500;

const STATEMENT_CACHE_CAPACITY: usize = 64;

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS manifest (
        key TEXT PRIMARY KEY NOT NULL,
        filename TEXT,
        size INTEGER NOT NULL,
        inline_data BLOB,
        mod_time INTEGER NOT NULL,
        access_time INTEGER NOT NULL,
        extended_data BLOB
    );
    CREATE INDEX IF NOT EXISTS manifest_mod_time_idx ON manifest(mod_time);
    CREATE INDEX IF NOT EXISTS manifest_size_idx ON manifest(size);
    CREATE INDEX IF NOT EXISTS manifest_filename_idx ON manifest(filename);
";

const UPSERT: &str = "INSERT OR REPLACE INTO manifest
    (key, filename, size, inline_data, mod_time, access_time, extended_data)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const SELECT_FULL: &str = "SELECT key, filename, size, inline_data, mod_time, access_time, extended_data
    FROM manifest WHERE key = ?1";

const SELECT_INFO: &str = "SELECT key, filename, size, NULL, mod_time, access_time, extended_data
    FROM manifest WHERE key = ?1";

const SELECT_FILENAME: &str = "SELECT filename FROM manifest WHERE key = ?1";

const SELECT_VICTIM: &str = "SELECT key, filename, size FROM manifest WHERE key = ?1";

/// `INSERT OR REPLACE` assigns a fresh rowid on every write, so rowid breaks
/// `mod_time` ties in write order.
const SELECT_OLDEST: &str =
    "SELECT key, filename, size FROM manifest ORDER BY mod_time ASC, rowid ASC LIMIT ?1";

const DELETE_KEY: &str = "DELETE FROM manifest WHERE key = ?1";

const TOUCH: &str = "UPDATE manifest SET access_time = ?2 WHERE key = ?1";

// == Manifest Row ==
/// Borrowed row contents for an upsert.
#[derive(Debug, Clone, Copy)]
pub struct ManifestRow<'a> {
    pub key: &'a str,
    pub filename: Option<&'a str>,
    pub size: u64,
    pub inline_data: Option<&'a [u8]>,
    pub mod_time: i64,
    pub access_time: i64,
    pub extended_data: Option<&'a [u8]>,
}

/// A row read back from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub key: String,
    pub filename: Option<String>,
    pub size: u64,
    /// Always `None` for metadata-only reads
    pub inline_data: Option<Vec<u8>>,
    pub mod_time: i64,
    pub access_time: i64,
    pub extended_data: Option<Vec<u8>>,
}

/// A deleted row whose content file, if any, still has to be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Victim {
    pub key: String,
    pub filename: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
enum Measure {
    Count,
    Size,
}

// == Manifest ==
pub struct Manifest {
    conn: Connection,
}

impl Manifest {
    // == Constructor ==
    /// Opens or creates the database at `path` and migrates its schema.
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(journal = %journal, "manifest opened");

        let mut manifest = Self { conn };
        manifest.migrate()?;
        Ok(manifest)
    }

    fn migrate(&mut self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            let tx = self.conn.transaction()?;
            tx.execute_batch(CREATE_SCHEMA)?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
            debug!(from = version, to = SCHEMA_VERSION, "manifest schema migrated");
        }
        Ok(())
    }

    // == Upsert ==
    /// Inserts or replaces a row.
    ///
    /// Returns the filename recorded by the replaced row, if any, so the
    /// caller can delete it once this commit has landed.
    pub fn upsert(&mut self, row: &ManifestRow<'_>) -> Result<Option<String>> {
        let tx = self.conn.transaction()?;
        let previous = tx
            .prepare_cached(SELECT_FILENAME)?
            .query_row([row.key], |r| r.get::<_, Option<String>>(0))
            .optional()?
            .flatten();
        tx.prepare_cached(UPSERT)?.execute(params![
            row.key,
            row.filename,
            row.size as i64,
            row.inline_data,
            row.mod_time,
            row.access_time,
            row.extended_data,
        ])?;
        tx.commit()?;
        Ok(previous)
    }

    // == Touch ==
    /// Sets the access time of every listed key.
    pub fn touch<S: AsRef<str>>(&mut self, keys: &[S], time: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(TOUCH)?;
            for key in keys {
                stmt.execute(params![key.as_ref(), time])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // == Get ==
    /// Reads a full row including any inline value.
    pub fn get(&self, key: &str) -> Result<Option<ManifestRecord>> {
        let record = self
            .conn
            .prepare_cached(SELECT_FULL)?
            .query_row([key], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Reads a row without its inline value.
    pub fn get_info(&self, key: &str) -> Result<Option<ManifestRecord>> {
        let record = self
            .conn
            .prepare_cached(SELECT_INFO)?
            .query_row([key], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Reads all rows matching `keys` with as few queries as possible.
    pub fn get_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<ManifestRecord>> {
        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_KEYS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT key, filename, size, inline_data, mod_time, access_time, extended_data
                 FROM manifest WHERE key IN ({})",
                placeholders
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(chunk.iter().map(|k| k.as_ref())),
                record_from_row,
            )?;
            for record in rows {
                records.push(record?);
            }
        }
        Ok(records)
    }

    // == Exists ==
    pub fn exists(&self, key: &str) -> Result<bool> {
        let found = self
            .conn
            .prepare_cached("SELECT 1 FROM manifest WHERE key = ?1")?
            .query_row([key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    // == Aggregates ==
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .prepare_cached("SELECT count(*) FROM manifest")?
            .query_row([], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn total_size(&self) -> Result<u64> {
        let size: i64 = self
            .conn
            .prepare_cached("SELECT coalesce(sum(size), 0) FROM manifest")?
            .query_row([], |r| r.get(0))?;
        Ok(size as u64)
    }

    /// Every content filename referenced by a row.
    pub fn filenames(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT filename FROM manifest WHERE filename IS NOT NULL")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let names = rows.collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    // == Deletes ==
    /// Deletes the listed keys in a single transaction.
    pub fn delete_keys<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<Vec<Victim>> {
        let tx = self.conn.transaction()?;
        let mut victims = Vec::new();
        {
            let mut select = tx.prepare_cached(SELECT_VICTIM)?;
            let mut delete = tx.prepare_cached(DELETE_KEY)?;
            for key in keys {
                let key = key.as_ref();
                if let Some(victim) = select.query_row([key], victim_from_row).optional()? {
                    delete.execute([key])?;
                    victims.push(victim);
                }
            }
        }
        tx.commit()?;
        Ok(victims)
    }

    /// Deletes every row whose size is strictly greater than `size`.
    pub fn delete_larger_than(&mut self, size: i64) -> Result<Vec<Victim>> {
        self.delete_matching(
            "SELECT key, filename, size FROM manifest WHERE size > ?1",
            "DELETE FROM manifest WHERE size > ?1",
            size,
        )
    }

    /// Deletes every row modified strictly before `time`.
    pub fn delete_earlier_than(&mut self, time: i64) -> Result<Vec<Victim>> {
        self.delete_matching(
            "SELECT key, filename, size FROM manifest WHERE mod_time < ?1",
            "DELETE FROM manifest WHERE mod_time < ?1",
            time,
        )
    }

    /// Deletes oldest rows until the summed size is at most `max_size`.
    pub fn delete_to_fit_size(&mut self, max_size: u64) -> Result<Vec<Victim>> {
        self.delete_oldest_down_to(Measure::Size, max_size)
    }

    /// Deletes oldest rows until at most `max_count` remain.
    pub fn delete_to_fit_count(&mut self, max_count: u64) -> Result<Vec<Victim>> {
        self.delete_oldest_down_to(Measure::Count, max_count)
    }

    /// Deletes up to `limit` of the oldest rows.
    pub fn delete_oldest(&mut self, limit: usize) -> Result<Vec<Victim>> {
        let tx = self.conn.transaction()?;
        let victims = oldest(&tx, limit)?;
        {
            let mut delete = tx.prepare_cached(DELETE_KEY)?;
            for victim in &victims {
                delete.execute([&victim.key])?;
            }
        }
        tx.commit()?;
        Ok(victims)
    }

    // == Clear ==
    /// Drops and recreates the table.
    pub fn clear(&mut self) -> Result<()> {
        self.conn.flush_prepared_statement_cache();
        let tx = self.conn.transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS manifest;")?;
        tx.execute_batch(CREATE_SCHEMA)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_matching(&mut self, select: &str, delete: &str, bound: i64) -> Result<Vec<Victim>> {
        let tx = self.conn.transaction()?;
        let victims = {
            let mut stmt = tx.prepare_cached(select)?;
            let rows = stmt.query_map([bound], victim_from_row)?;
            let victims = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            victims
        };
        tx.prepare_cached(delete)?.execute([bound])?;
        tx.commit()?;
        Ok(victims)
    }

    fn delete_oldest_down_to(&mut self, measure: Measure, target: u64) -> Result<Vec<Victim>> {
        let tx = self.conn.transaction()?;
        let sql = match measure {
            Measure::Count => "SELECT count(*) FROM manifest",
            Measure::Size => "SELECT coalesce(sum(size), 0) FROM manifest",
        };
        let mut total = tx.prepare_cached(sql)?.query_row([], |r| r.get::<_, i64>(0))? as u64;
        let mut victims = Vec::new();

        while total > target {
            let batch = oldest(&tx, TRIM_STEP)?;
            if batch.is_empty() {
                break;
            }
            let mut delete = tx.prepare_cached(DELETE_KEY)?;
            for victim in batch {
                if total <= target {
                    break;
                }
                delete.execute([&victim.key])?;
                total -= match measure {
                    Measure::Count => 1,
                    Measure::Size => victim.size.min(total),
                };
                victims.push(victim);
            }
        }

        tx.commit()?;
        Ok(victims)
    }
}

fn oldest(tx: &Transaction<'_>, limit: usize) -> Result<Vec<Victim>> {
    let mut stmt = tx.prepare_cached(SELECT_OLDEST)?;
    let rows = stmt.query_map([limit as i64], victim_from_row)?;
    let victims = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(victims)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ManifestRecord> {
    Ok(ManifestRecord {
        key: row.get(0)?,
        filename: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        inline_data: row.get(3)?,
        mod_time: row.get(4)?,
        access_time: row.get(5)?,
        extended_data: row.get(6)?,
    })
}

fn victim_from_row(row: &Row<'_>) -> rusqlite::Result<Victim> {
    Ok(Victim {
        key: row.get(0)?,
        filename: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
    })
}
