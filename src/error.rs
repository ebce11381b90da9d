//! Error type shared by the cache layer and the resource collaborators.
//!
//! Only argument errors, prefix errors and upstream fetch errors ever reach a
//! caller of [`CachedFinder`](crate::cache::CachedFinder). Backend failures are
//! produced by strategies and swallowed (after logging) at the
//! [`CacheStore`](crate::cache::CacheStore) boundary.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
  /// Programming error: bad options, missing ttl, unknown strategy.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// A configured or computed key prefix is unusable.
  #[error("invalid cache key prefix: {0}")]
  InvalidPrefix(String),

  /// A key handed to a store has no `<prefix>-<body>` shape.
  #[error("malformed cache key `{0}`: expected a prefix and a key separated by a dash")]
  MalformedKey(String),

  /// The remote resource does not exist.
  #[error("{resource} {id} not found")]
  NotFound { resource: String, id: String },

  /// The remote resource could not be fetched.
  #[error("request failed: {0}")]
  Fetch(String),

  /// The storage medium behind a cache strategy failed.
  #[error("cache backend failure: {0}")]
  Backend(String),

  #[error("lock poisoned: {0}")]
  Poisoned(String),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Http(#[from] reqwest::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Build a [`Error::NotFound`] for a resource/id pair.
  pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
    Self::NotFound {
      resource: resource.into(),
      id: id.into(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }
}
