//! Storage strategy trait.

use std::time::Duration;

use crate::error::Result;

/// Trait for cache storage backends.
///
/// Keys arrive already hashed (`<prefix>-<digest>`) and values already
/// compressed. Implementations report backend trouble as `Err`; the
/// [`CacheStore`](super::CacheStore) wrapper turns those into misses.
pub trait CacheStrategy: Send + Sync {
  /// Short backend name for diagnostics.
  fn name(&self) -> &'static str;

  /// Read the value stored under `key`, if present and not expired.
  fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Store `value` under `key` for `ttl`.
  fn write_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

  /// Remove the value stored under `key`.
  fn delete_raw(&self, key: &str) -> Result<()>;

  /// Remove every value whose key starts with `pattern`.
  ///
  /// Returns `false` when the backend cannot clear by pattern.
  fn clear_raw(&self, pattern: &str) -> Result<bool>;
}

/// Strategy that doesn't cache anything.
/// Used when caching is configured off - all operations are no-ops.
pub struct NoopStrategy;

impl CacheStrategy for NoopStrategy {
  fn name(&self) -> &'static str {
    "noop"
  }

  fn read_raw(&self, _key: &str) -> Result<Option<Vec<u8>>> {
    Ok(None) // Always miss
  }

  fn write_raw(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<bool> {
    Ok(false) // Discard
  }

  fn delete_raw(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear_raw(&self, _pattern: &str) -> Result<bool> {
    Ok(false)
  }
}
