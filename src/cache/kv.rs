//! Key/value strategy.
//!
//! Generic TTL stores cannot enumerate keys, so [`KvStrategy`] keeps its own
//! bookkeeping next to the data:
//!
//! - one index entry per prefix (`<prefix>-_index`) listing the storage keys
//!   written under that prefix,
//! - one directory entry (`acr-_prefixes`) listing every prefix with an index.
//!
//! Every member carries the deadline of the entry it names. Writes drop members
//! whose deadline has passed, and the index itself lives twice as long as its
//! longest-lived member. `clear_raw` consults both to find what to delete.
//! Concurrent writers may drop each other's index updates; an entry missing
//! from its index simply survives a clear until it expires.

use moka::sync::Cache;
use moka::Expiry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::key::{split_storage_key, GLOBAL_PREFIX, PREFIX_SEPARATOR};
use super::strategy::CacheStrategy;
use crate::error::{Error, Result};

/// Default number of entries kept by a [`MemoryStore`].
pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Marker for index entries. Hex digests never contain `_`.
const INDEX_MARKER: &str = "_index";

/// A TTL-capable key/value backend.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
struct StoredValue {
  bytes: Vec<u8>,
  ttl: Duration,
}

/// Expires every entry after its own ttl.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
  fn expire_after_create(
    &self,
    _key: &String,
    value: &StoredValue,
    _created_at: Instant,
  ) -> Option<Duration> {
    Some(value.ttl)
  }

  fn expire_after_update(
    &self,
    _key: &String,
    value: &StoredValue,
    _updated_at: Instant,
    _duration_until_expiry: Option<Duration>,
  ) -> Option<Duration> {
    Some(value.ttl)
  }
}

/// In-process store backed by moka.
#[derive(Clone)]
pub struct MemoryStore {
  cache: Cache<String, StoredValue>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_CAPACITY)
  }
}

impl MemoryStore {
  pub fn new(max_capacity: u64) -> Self {
    let cache = Cache::builder()
      .max_capacity(max_capacity)
      .expire_after(PerEntryTtl)
      .build();
    Self { cache }
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.cache.get(key).map(|v| v.bytes))
  }

  fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
    self
      .cache
      .insert(key.to_string(), StoredValue { bytes: value, ttl });
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.cache.invalidate(key);
    Ok(())
  }
}

/// Bookkeeping entry: names mapped to the unix millisecond they expire at.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
  members: BTreeMap<String, i64>,
}

impl Index {
  fn prune(&mut self, now: i64) {
    self.members.retain(|_, deadline| *deadline > now);
  }

  /// Twice the remaining life of the longest-lived member.
  fn ttl(&self, now: i64) -> Duration {
    let remaining = self
      .members
      .values()
      .map(|deadline| deadline.saturating_sub(now))
      .max()
      .unwrap_or(0)
      .max(1);
    Duration::from_millis(remaining as u64).saturating_mul(2)
  }
}

fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// [`CacheStrategy`] over any [`KeyValueStore`].
pub struct KvStrategy<S> {
  store: S,
}

impl<S: KeyValueStore> KvStrategy<S> {
  pub fn new(store: S) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  fn index_key(prefix: &str) -> String {
    format!("{}{}{}", prefix, PREFIX_SEPARATOR, INDEX_MARKER)
  }

  fn directory_key() -> String {
    format!("{}{}_prefixes", GLOBAL_PREFIX, PREFIX_SEPARATOR)
  }

  fn load_index(&self, key: &str) -> Result<Index> {
    match self.store.get(key)? {
      Some(bytes) => serde_json::from_slice(&bytes)
        .map_err(|e| Error::Backend(format!("Failed to parse index {}: {}", key, e))),
      None => Ok(Index::default()),
    }
  }

  fn save_index(&self, key: &str, index: &Index, now: i64) -> Result<()> {
    if index.members.is_empty() {
      return self.store.remove(key);
    }
    let bytes = serde_json::to_vec(index)?;
    self.store.set(key, bytes, index.ttl(now))
  }

  /// Record that `member` lives for `ttl` from now, dropping expired members.
  fn track(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
    let now = now_millis();
    let lifetime = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

    let mut index = self.load_index(key)?;
    index.prune(now);
    index
      .members
      .insert(member.to_string(), now.saturating_add(lifetime));
    self.save_index(key, &index, now)
  }
}

impl<S: KeyValueStore> CacheStrategy for KvStrategy<S> {
  fn name(&self) -> &'static str {
    "kv"
  }

  fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self.store.get(key)
  }

  fn write_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
    let (prefix, _) = split_storage_key(key)?;
    self.store.set(key, value.to_vec(), ttl)?;

    // A prefix stays listed for as long as its index entry can live.
    let tracked = self
      .track(&Self::index_key(prefix), key, ttl)
      .and_then(|_| self.track(&Self::directory_key(), prefix, ttl.saturating_mul(2)));
    if let Err(e) = tracked {
      tracing::warn!(target: "cached_resource", key, "Failed to update cache index: {}", e);
    }

    Ok(true)
  }

  fn delete_raw(&self, key: &str) -> Result<()> {
    self.store.remove(key)
  }

  fn clear_raw(&self, pattern: &str) -> Result<bool> {
    let now = now_millis();
    let directory_key = Self::directory_key();
    let mut directory = self.load_index(&directory_key)?;
    let mut emptied = Vec::new();

    for prefix in directory.members.keys() {
      let index_key = Self::index_key(prefix);
      let mut index = self.load_index(&index_key)?;

      let doomed: Vec<String> = index
        .members
        .keys()
        .filter(|member| member.starts_with(pattern))
        .cloned()
        .collect();
      for member in &doomed {
        self.store.remove(member)?;
        index.members.remove(member);
      }

      if index.members.is_empty() {
        emptied.push(prefix.clone());
      }
      if !doomed.is_empty() || index.members.is_empty() {
        self.save_index(&index_key, &index, now)?;
      }
    }

    if !emptied.is_empty() {
      for prefix in &emptied {
        directory.members.remove(prefix);
      }
      self.save_index(&directory_key, &directory, now)?;
    }

    Ok(true)
  }
}
