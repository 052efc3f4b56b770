//! SQLite-backed key-value store with per-entry TTL.
//!
//! One database file per namespace. Values are opaque blobs; callers own
//! serialization. Writes are `INSERT OR REPLACE`, so concurrent writers of the
//! same key simply last-writer-wins.

use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// A single namespace's backing store.
pub struct KvStore {
    path: PathBuf,
    db: Connection,
}

impl KvStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let db = Connection::open(path)?;
        db.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&db)?;

        Ok(Self {
            path: path.to_path_buf(),
            db,
        })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        let _mode: String = db.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at);
            "#,
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a live entry. Entries whose age has reached their TTL are misses.
    pub fn get(&self, key: &str, now_ms: i64) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>, i64, i64)> = self
            .db
            .query_row(
                "SELECT value, created_at, ttl_ms FROM entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.and_then(|(value, created_at, ttl_ms)| {
            if now_ms.saturating_sub(created_at) >= ttl_ms {
                None
            } else {
                Some(value)
            }
        }))
    }

    pub fn put(&self, key: &str, value: &[u8], now_ms: i64, ttl_ms: i64) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO entries (key, value, created_at, ttl_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, value, now_ms, ttl_ms],
        )?;
        Ok(())
    }

    /// Delete every expired entry, returning how many were removed.
    pub fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let removed = self
            .db
            .execute("DELETE FROM entries WHERE ?1 - created_at >= ttl_ms", params![now_ms])?;
        Ok(removed)
    }

    /// Number of stored rows, expired or not.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self.db.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
