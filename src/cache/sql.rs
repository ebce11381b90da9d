//! Relational strategy on SQLite.
//!
//! Every write inserts a row; rows for the same key are never updated in
//! place. Reads pick the most recently written unexpired row, and stale rows stay until
//! [`SqlStrategy::reap_expired`] or a clear removes them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::strategy::CacheStrategy;
use crate::error::{Error, Result};

/// Rows deleted per statement when clearing.
pub const DEFAULT_BATCH_CLEAR_SIZE: usize = 1000;

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cached_resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL CHECK (length(key) <= 255),
    value BLOB NOT NULL,
    expires_at TEXT NOT NULL
);

-- Stale rows for a key may coexist; only (key, expires_at) is unique
CREATE UNIQUE INDEX IF NOT EXISTS idx_cached_resources_key_expires
    ON cached_resources(key, expires_at);

CREATE INDEX IF NOT EXISTS idx_cached_resources_expires
    ON cached_resources(expires_at);
"#;

/// SQLite-based cache strategy.
pub struct SqlStrategy {
  conn: Mutex<Connection>,
  batch_clear_size: usize,
}

impl SqlStrategy {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Backend(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Backend(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::with_connection(conn)
  }

  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::Backend(format!("Failed to open in-memory cache database: {}", e)))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let strategy = Self {
      conn: Mutex::new(conn),
      batch_clear_size: DEFAULT_BATCH_CLEAR_SIZE,
    };
    strategy.run_migrations()?;
    Ok(strategy)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Backend("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("cached-resource").join("cache.db"))
  }

  pub fn with_batch_clear_size(mut self, batch_clear_size: usize) -> Self {
    self.batch_clear_size = batch_clear_size.max(1);
    self
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }

  /// Run database migrations for the cache table.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::Backend(format!("Failed to run cache migrations: {}", e)))
  }

  /// Delete every expired row. Returns how many were removed.
  pub fn reap_expired(&self) -> Result<usize> {
    let now = timestamp(Utc::now());
    self
      .lock()?
      .execute(
        "DELETE FROM cached_resources WHERE expires_at <= ?",
        params![now],
      )
      .map_err(|e| Error::Backend(format!("Failed to reap expired rows: {}", e)))
  }

  /// Number of stored rows, expired ones included.
  pub fn row_count(&self) -> Result<usize> {
    let count: i64 = self
      .lock()?
      .query_row("SELECT COUNT(*) FROM cached_resources", [], |row| row.get(0))
      .map_err(|e| Error::Backend(format!("Failed to count rows: {}", e)))?;
    Ok(count as usize)
  }
}

impl CacheStrategy for SqlStrategy {
  fn name(&self) -> &'static str {
    "relational"
  }

  fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let now = timestamp(Utc::now());
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT value FROM cached_resources
         WHERE key = ? AND expires_at > ?
         ORDER BY id DESC
         LIMIT 1",
      )
      .map_err(|e| Error::Backend(format!("Failed to prepare query: {}", e)))?;

    let value: Option<Vec<u8>> = stmt
      .query_row(params![key, now], |row| row.get(0))
      .optional()
      .map_err(|e| Error::Backend(format!("Failed to read {}: {}", key, e)))?;

    Ok(value)
  }

  fn write_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
    let ttl = chrono::Duration::from_std(ttl)
      .map_err(|e| Error::InvalidArgument(format!("ttl out of range: {}", e)))?;
    let expires_at = timestamp(Utc::now() + ttl);

    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO cached_resources (key, value, expires_at) VALUES (?, ?, ?)",
        params![key, value, expires_at],
      )
      .map_err(|e| Error::Backend(format!("Failed to store {}: {}", key, e)))?;

    Ok(true)
  }

  fn delete_raw(&self, key: &str) -> Result<()> {
    self
      .lock()?
      .execute("DELETE FROM cached_resources WHERE key = ?", params![key])
      .map_err(|e| Error::Backend(format!("Failed to delete {}: {}", key, e)))?;
    Ok(())
  }

  fn clear_raw(&self, pattern: &str) -> Result<bool> {
    let like = format!("{}%", escape_like(pattern));
    let batch = self.batch_clear_size;

    // The lock is released between batches.
    loop {
      let deleted = self
        .lock()?
        .execute(
          r"DELETE FROM cached_resources WHERE id IN (
             SELECT id FROM cached_resources WHERE key LIKE ? ESCAPE '\' LIMIT ?
           )",
          params![like, batch as i64],
        )
        .map_err(|e| Error::Backend(format!("Failed to clear {}: {}", pattern, e)))?;

      if deleted < batch {
        break;
      }
    }

    Ok(true)
  }
}

/// Sortable UTC timestamp as stored in `expires_at`.
fn timestamp(at: DateTime<Utc>) -> String {
  at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Escape LIKE wildcards so patterns match literally.
fn escape_like(pattern: &str) -> String {
  let mut escaped = String::with_capacity(pattern.len());
  for c in pattern.chars() {
    if matches!(c, '\\' | '%' | '_') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}
