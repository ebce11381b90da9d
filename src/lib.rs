//! Transparent caching in front of remote REST resources.
//!
//! Wrap a [`RawFinder`] in a [`CachedFinder`] to serve repeated finds from a
//! [`CacheStrategy`] (in-process key/value or SQLite) until they expire or are
//! cleared. Collections resolve lazily and are cached as a unit.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod resource;

#[cfg(test)]
mod test_support;

pub use cache::{
  CacheRegistry, CacheStrategy, CachedFinder, Collection, Configuration, Found, KvStrategy,
  MemoryStore, SqlStrategy,
};
pub use error::{Error, Result};
pub use resource::{FindOptions, HttpFinder, Params, RawFinder, Record, ResourceDefinition, Scope, Source};
