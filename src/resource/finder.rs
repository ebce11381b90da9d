//! The fetch collaborator contract.
//!
//! A [`RawFinder`] knows how to load records from the remote service. It knows
//! nothing about caching; [`CachedFinder`](crate::cache::CachedFinder) wraps one
//! and decides when it must be called.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

use super::{Params, Record};
use crate::error::Result;

/// The kind of find request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
  All,
  First,
  Last,
  /// Lookup of a single record by identifier.
  Id(String),
}

impl Scope {
  pub fn id(id: impl Into<String>) -> Self {
    Self::Id(id.into())
  }

  /// Identifier lookups raise `NotFound`; scope lookups come back empty.
  pub fn is_identifier(&self) -> bool {
    matches!(self, Self::Id(_))
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::All => f.write_str("all"),
      Self::First => f.write_str("first"),
      Self::Last => f.write_str("last"),
      Self::Id(id) => f.write_str(id),
    }
  }
}

impl From<u64> for Scope {
  fn from(id: u64) -> Self {
    Self::Id(id.to_string())
  }
}

impl From<i32> for Scope {
  fn from(id: i32) -> Self {
    Self::Id(id.to_string())
  }
}

impl From<&str> for Scope {
  fn from(id: &str) -> Self {
    Self::Id(id.to_string())
  }
}

impl From<String> for Scope {
  fn from(id: String) -> Self {
    Self::Id(id)
  }
}

/// Alternate endpoint for a find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
  /// Custom method on the collection, e.g. `/people/managers.json`.
  Method(String),
  /// Literal path, e.g. `/people/active.json`.
  Path(String),
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Method(m) => write!(f, ":{}", m),
      Self::Path(p) => f.write_str(p),
    }
  }
}

/// Options recognised by a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
  /// Bypass the cache for this request.
  pub reload: bool,
  pub from: Option<Source>,
  /// Path, query and prefix parameters, merged.
  pub params: Params,
}

impl FindOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reload(mut self, reload: bool) -> Self {
    self.reload = reload;
    self
  }

  /// Load from an alternate endpoint.
  pub fn via(mut self, source: Source) -> Self {
    self.from = Some(source);
    self
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  pub fn params(mut self, params: Params) -> Self {
    self.params.extend(params);
    self
  }
}

/// Everything needed to resolve a collection lazily.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionRequest {
  pub from: Option<Source>,
  pub path_params: Params,
  pub query_params: Params,
  pub prefix_options: Params,
}

impl CollectionRequest {
  pub fn new(options: &FindOptions, prefix_parameters: &[String]) -> Self {
    let (prefix_options, query_params) = split_options(&options.params, prefix_parameters);
    Self {
      from: options.from.clone(),
      path_params: options.params.clone(),
      query_params,
      prefix_options,
    }
  }
}

/// A fetched collection: the records plus whatever extra top-level fields the
/// response carried (pagination cursors and the like).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionPage {
  pub elements: Vec<Record>,
  pub attributes: Map<String, Value>,
}

impl CollectionPage {
  pub fn new(elements: Vec<Record>) -> Self {
    Self {
      elements,
      attributes: Map::new(),
    }
  }

  pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.attributes.insert(name.into(), value.into());
    self
  }
}

/// Loads records from the remote service.
#[async_trait]
pub trait RawFinder: Send + Sync + 'static {
  /// Model type name, e.g. `Person` or `Admin::Person`.
  fn model_name(&self) -> &str;

  /// Parameter names that address an owning resource rather than filter.
  fn prefix_parameters(&self) -> &[String] {
    &[]
  }

  /// Extra collection fields that travel with a cached collection.
  fn persisted_attributes(&self) -> &[String] {
    &[]
  }

  /// Fetch a single record.
  ///
  /// Fails with `NotFound` for a missing identifier; returns `None` for
  /// `First`/`Last` when there is nothing to return.
  async fn fetch(&self, scope: &Scope, options: &FindOptions) -> Result<Option<Record>>;

  /// Fetch every record addressed by `request`.
  async fn collection_fetch(&self, request: &CollectionRequest) -> Result<CollectionPage>;
}

/// Split `params` into (prefix options, query options).
pub fn split_options(params: &Params, prefix_parameters: &[String]) -> (Params, Params) {
  let mut prefix_options = Params::new();
  let mut query_options = Params::new();
  for (name, value) in params {
    if prefix_parameters.iter().any(|p| p == name) {
      prefix_options.insert(name.clone(), value.clone());
    } else {
      query_options.insert(name.clone(), value.clone());
    }
  }
  (prefix_options, query_options)
}
