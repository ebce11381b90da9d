//! Caching overlay for remote resources.
//!
//! This module provides:
//! - key derivation with prefix-preserving hashed storage keys
//! - pluggable storage strategies (key/value with a side index, SQLite)
//! - the cache policy wrapping a [`RawFinder`](crate::resource::RawFinder)
//! - lazy collections that cache as a unit, extra attributes included

mod codec;
mod collection;
mod configuration;
mod key;
mod kv;
mod logger;
mod policy;
mod registry;
mod sql;
mod store;
mod strategy;

pub use codec::{decode, encode, Cached, RequestContext};
pub use collection::Collection;
pub use configuration::{Configuration, ConfigurationBuilder, StrategyKind, DEFAULT_TTL};
pub use key::{
  derive_storage_key, hash_key, split_storage_key, underscore, CacheKey, KeyPrefix,
  GLOBAL_PREFIX, PREFIX_SEPARATOR, RELOAD_PARAM,
};
pub use kv::{KeyValueStore, KvStrategy, MemoryStore, DEFAULT_MAX_CAPACITY};
pub use logger::CacheLogger;
pub use policy::{CacheCandidate, CachedFinder, Found};
pub use registry::CacheRegistry;
pub use sql::{SqlStrategy, DEFAULT_BATCH_CLEAR_SIZE};
pub use store::{CacheStore, WriteOptions};
pub use strategy::{CacheStrategy, NoopStrategy};
