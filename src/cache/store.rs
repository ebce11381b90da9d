//! Strategy-independent cache contract.
//!
//! [`CacheStore`] hashes logical keys, compresses payloads and shields callers
//! from backend failures: a failing read is a miss, a failing write is `false`.
//! Only argument errors (missing ttl, malformed key) are returned as `Err`.

use std::sync::Arc;
use std::time::Duration;

use super::codec::{compress, decompress};
use super::key::hash_key;
use super::logger::CacheLogger;
use super::strategy::CacheStrategy;
use crate::error::{Error, Result};

/// Options for [`CacheStore::write`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
  /// Required. How long the entry lives.
  pub expires_in: Option<Duration>,
}

impl WriteOptions {
  pub fn expires_in(ttl: Duration) -> Self {
    Self {
      expires_in: Some(ttl),
    }
  }
}

/// A strategy plus the logger its failures are reported to.
#[derive(Clone)]
pub struct CacheStore {
  strategy: Arc<dyn CacheStrategy>,
  logger: CacheLogger,
}

impl CacheStore {
  pub fn new(strategy: Arc<dyn CacheStrategy>, logger: CacheLogger) -> Self {
    Self { strategy, logger }
  }

  pub fn strategy(&self) -> &Arc<dyn CacheStrategy> {
    &self.strategy
  }

  /// Read the payload stored under a logical `prefix-body` key.
  pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let storage_key = hash_key(key)?;

    let raw = match self.strategy.read_raw(&storage_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return Ok(None),
      Err(e) => {
        self
          .logger
          .error(key, format!("Failed to read from cache: {}", e));
        return Ok(None);
      }
    };

    match decompress(&raw) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        self
          .logger
          .debug(key, format!("Discarding undecodable cache entry: {}", e));
        Ok(None)
      }
    }
  }

  /// Store `value` under a logical key. `expires_in` is mandatory.
  pub fn write(&self, key: &str, value: &[u8], options: WriteOptions) -> Result<bool> {
    let ttl = options
      .expires_in
      .filter(|ttl| !ttl.is_zero())
      .ok_or_else(|| Error::InvalidArgument("`expires_in` option is required".to_string()))?;
    let storage_key = hash_key(key)?;

    let result = compress(value)
      .and_then(|compressed| self.strategy.write_raw(&storage_key, &compressed, ttl));

    match result {
      Ok(written) => Ok(written),
      Err(e) => {
        self
          .logger
          .error(key, format!("Failed to write to cache: {}", e));
        Ok(false)
      }
    }
  }

  /// Best-effort removal of a single entry.
  pub fn delete(&self, key: &str) -> Result<()> {
    let storage_key = hash_key(key)?;
    if let Err(e) = self.strategy.delete_raw(&storage_key) {
      self
        .logger
        .error(key, format!("Failed to delete from cache: {}", e));
    }
    Ok(())
  }

  /// Remove every entry whose storage key starts with `pattern`.
  pub fn clear(&self, pattern: &str) -> bool {
    match self.strategy.clear_raw(pattern) {
      Ok(cleared) => cleared,
      Err(e) => {
        self
          .logger
          .error(pattern, format!("Failed to clear cache: {}", e));
        false
      }
    }
  }
}
