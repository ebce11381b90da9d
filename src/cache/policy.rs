//! Cache-aware finder.
//!
//! [`CachedFinder`] decorates a [`RawFinder`]. A single-record find goes
//!
//! ```text
//! decide reload -> cache read -> (miss) fetch -> eligibility -> cache write
//! ```
//!
//! while `Scope::All` returns a lazy [`Collection`] that runs the same steps
//! when first consumed. A forced reload of a collection travels with it as the
//! `_acr_reload` query parameter.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::codec::{self, Cached, RequestContext};
use super::collection::Collection;
use super::configuration::Configuration;
use super::key::{params_part, CacheKey, RELOAD_PARAM};
use super::store::WriteOptions;
use crate::error::{Error, Result};
use crate::resource::{
  split_options, CollectionRequest, FindOptions, Params, RawFinder, Record, Scope,
};

/// Result of [`CachedFinder::find`].
pub enum Found<F: RawFinder> {
  Record(Record),
  /// Lazy collection; nothing has been fetched yet.
  Collection(Collection<F>),
  /// A `First`/`Last` lookup with nothing to return.
  Nothing,
}

impl<F: RawFinder> Found<F> {
  pub fn into_record(self) -> Option<Record> {
    match self {
      Self::Record(record) => Some(record),
      _ => None,
    }
  }

  pub fn into_collection(self) -> Option<Collection<F>> {
    match self {
      Self::Collection(collection) => Some(collection),
      _ => None,
    }
  }

  pub fn is_nothing(&self) -> bool {
    matches!(self, Self::Nothing)
  }
}

impl<F: RawFinder> fmt::Debug for Found<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Record(record) => f.debug_tuple("Record").field(record).finish(),
      Self::Collection(collection) => f.debug_tuple("Collection").field(collection).finish(),
      Self::Nothing => f.write_str("Nothing"),
    }
  }
}

/// Something that might be written to the cache.
pub enum CacheCandidate<'a> {
  Record(Option<&'a Record>),
  Collection {
    /// Whether the collection has resolved. Unresolved collections are never
    /// inspected, since that would trigger the fetch.
    requested: bool,
    elements: &'a [Record],
  },
}

/// A [`RawFinder`] with a cache in front of it.
pub struct CachedFinder<F> {
  inner: Arc<F>,
  config: Arc<Configuration>,
}

impl<F> Clone for CachedFinder<F> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      config: Arc::clone(&self.config),
    }
  }
}

impl<F: RawFinder> CachedFinder<F> {
  pub fn new(inner: F, config: Arc<Configuration>) -> Self {
    Self::from_arc(Arc::new(inner), config)
  }

  pub fn from_arc(inner: Arc<F>, config: Arc<Configuration>) -> Self {
    Self { inner, config }
  }

  pub fn inner(&self) -> &Arc<F> {
    &self.inner
  }

  pub fn config(&self) -> &Arc<Configuration> {
    &self.config
  }

  /// Find through the cache.
  ///
  /// `NotFound` from the collaborator is returned for identifier lookups and
  /// becomes [`Found::Nothing`] for `First`/`Last`.
  pub async fn find(&self, scope: impl Into<Scope>, options: FindOptions) -> Result<Found<F>> {
    let scope = scope.into();
    if scope == Scope::All {
      return Ok(Found::Collection(self.collection(&options)));
    }

    let should_reload = options.reload || !self.config.enabled();
    let record = if should_reload {
      self.find_via_reload(&scope, &options).await?
    } else {
      self.find_via_cache(&scope, &options).await?
    };

    Ok(record.map_or(Found::Nothing, Found::Record))
  }

  /// Find a record by id. A missing record is `NotFound`.
  pub async fn find_one(&self, id: impl Into<String>, options: FindOptions) -> Result<Record> {
    let id = id.into();
    self
      .find(Scope::Id(id.clone()), options)
      .await?
      .into_record()
      .ok_or_else(|| Error::not_found(self.inner.model_name(), id))
  }

  pub async fn first(&self, options: FindOptions) -> Result<Option<Record>> {
    Ok(self.find(Scope::First, options).await?.into_record())
  }

  pub async fn last(&self, options: FindOptions) -> Result<Option<Record>> {
    Ok(self.find(Scope::Last, options).await?.into_record())
  }

  /// Lazy collection of every record matching `options`.
  pub fn all(&self, options: FindOptions) -> Collection<F> {
    self.collection(&options)
  }

  /// Lazy collection filtered by `clauses`.
  pub fn where_(&self, clauses: Params) -> Collection<F> {
    self.collection(&FindOptions::new().params(clauses))
  }

  pub(crate) fn collection(&self, options: &FindOptions) -> Collection<F> {
    let mut request = CollectionRequest::new(options, self.inner.prefix_parameters());
    if options.reload || !self.config.enabled() {
      request
        .query_params
        .insert(RELOAD_PARAM.to_string(), Value::Bool(true));
    }
    Collection::new(self.clone(), request)
  }

  /// Clear cached entries.
  ///
  /// Without a pattern every entry under this configuration's key prefix goes;
  /// with one, only entries whose key starts with `acr/<key prefix>/<pattern>`.
  pub fn clear_cache(&self, pattern: Option<&str>) -> Result<bool> {
    let namespace = self.config.key_prefix().namespace()?;
    let pattern = format!("{}{}", namespace, pattern.unwrap_or_default());
    Ok(self.config.store().clear(&pattern))
  }

  /// Drop the cached result of a single-record find.
  pub fn invalidate(&self, scope: impl Into<Scope>, options: &FindOptions) -> Result<()> {
    let key = self.cache_key(&single_key_parts(&scope.into(), options))?;
    self.config.store().delete(&key.to_string())
  }

  /// Store `record` as the result of `find(record.id, options)`.
  pub fn prime(&self, record: &Record, options: &FindOptions) -> Result<bool> {
    let id = record
      .id()
      .ok_or_else(|| Error::InvalidArgument("cannot prime a record without an id".to_string()))?;
    if !self.should_cache(CacheCandidate::Record(Some(record))) {
      return Ok(false);
    }

    let parts = single_key_parts(&Scope::Id(id), options);
    self.cache_write(
      &Cached::Record(record.clone()),
      &parts,
      &self.single_context(options),
    )
  }

  /// Eligibility of a fetched result for caching. Empty results never are.
  pub fn should_cache(&self, candidate: CacheCandidate<'_>) -> bool {
    if !self.config.enabled() {
      return false;
    }
    match candidate {
      CacheCandidate::Record(record) => record.is_some(),
      CacheCandidate::Collection {
        requested,
        elements,
      } => requested && !elements.is_empty(),
    }
  }

  async fn find_via_cache(&self, scope: &Scope, options: &FindOptions) -> Result<Option<Record>> {
    let parts = single_key_parts(scope, options);
    if let Some(Cached::Record(record)) = self.cache_read(&parts)? {
      return Ok(Some(record));
    }
    self.find_via_reload(scope, options).await
  }

  async fn find_via_reload(&self, scope: &Scope, options: &FindOptions) -> Result<Option<Record>> {
    let record = match self.inner.fetch(scope, options).await {
      Ok(record) => record,
      Err(e) if e.is_not_found() && !scope.is_identifier() => None,
      Err(e) => return Err(e),
    };

    if let Some(found) = record.as_ref() {
      if self.should_cache(CacheCandidate::Record(Some(found))) {
        let parts = single_key_parts(scope, options);
        self.cache_write(
          &Cached::Record(found.clone()),
          &parts,
          &self.single_context(options),
        )?;
      }
    }

    Ok(record)
  }

  fn single_context(&self, options: &FindOptions) -> RequestContext {
    let (prefix_options, _) = split_options(&options.params, self.inner.prefix_parameters());
    RequestContext {
      prefix_options,
      ..RequestContext::default()
    }
  }

  fn cache_key(&self, parts: &[String]) -> Result<CacheKey> {
    CacheKey::build(self.inner.model_name(), self.config.key_prefix(), parts)
  }

  pub(crate) fn cache_read(&self, parts: &[String]) -> Result<Option<Cached>> {
    let key = self.cache_key(parts)?.to_string();
    let logger = self.config.logger();

    let Some(bytes) = self.config.store().read(&key)? else {
      return Ok(None);
    };
    match codec::decode(&bytes) {
      Ok(cached) => {
        logger.debug(&key, "Cache hit");
        Ok(Some(cached))
      }
      Err(e) => {
        logger.debug(&key, format!("Discarding undecodable cache entry: {}", e));
        Ok(None)
      }
    }
  }

  pub(crate) fn cache_write(
    &self,
    cached: &Cached,
    parts: &[String],
    context: &RequestContext,
  ) -> Result<bool> {
    let key = self.cache_key(parts)?.to_string();
    let payload = match codec::encode(cached, context) {
      Ok(payload) => payload,
      Err(e) => {
        self
          .config
          .logger()
          .error(&key, format!("Failed to write to cache: {}", e));
        return Ok(false);
      }
    };

    self
      .config
      .store()
      .write(&key, &payload, WriteOptions::expires_in(self.config.ttl()))
  }
}

/// Key parts of a single-record find: scope, endpoint and parameters.
fn single_key_parts(scope: &Scope, options: &FindOptions) -> Vec<String> {
  let scope = match scope {
    Scope::Id(id) => id.clone(),
    other => format!(":{}", other),
  };
  vec![
    scope,
    options
      .from
      .as_ref()
      .map(ToString::to_string)
      .unwrap_or_default(),
    params_part(&options.params),
  ]
}

/// Key parts of a collection: endpoint, path, query and prefix parameters.
pub(crate) fn collection_key_parts(request: &CollectionRequest) -> Vec<String> {
  vec![
    ":all".to_string(),
    request
      .from
      .as_ref()
      .map(ToString::to_string)
      .unwrap_or_default(),
    params_part(&request.path_params),
    params_part(&request.query_params),
    params_part(&request.prefix_options),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::hash_key;
  use crate::cache::kv::{KvStrategy, MemoryStore};
  use crate::cache::registry::CacheRegistry;
  use crate::cache::sql::SqlStrategy;
  use crate::cache::strategy::CacheStrategy;
  use crate::test_support::{FailingStrategy, LogCapture, MapStrategy, MockFinder};
  use std::time::Duration;

  fn config_with(strategy: Arc<dyn CacheStrategy>) -> Arc<Configuration> {
    Arc::new(
      Configuration::builder("TestResource")
        .shared_strategy(strategy)
        .key_prefix("app")
        .build()
        .unwrap(),
    )
  }

  fn finder(mock: MockFinder) -> (CachedFinder<MockFinder>, Arc<MapStrategy>) {
    let backend = Arc::new(MapStrategy::default());
    let finder = CachedFinder::new(mock, config_with(backend.clone()));
    (finder, backend)
  }

  #[tokio::test]
  async fn test_find_by_id_is_cached() {
    let (finder, _) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));

    let first = finder.find_one("1", FindOptions::new()).await.unwrap();
    let second = finder.find_one("1", FindOptions::new()).await.unwrap();

    assert_eq!(finder.inner().fetch_calls(), 1);
    assert_eq!(first, second);
    assert!(second.is_persisted());
    assert_eq!(second.get("name"), Some(&Value::from("Alice")));
  }

  #[tokio::test]
  async fn test_reload_and_clear_scenario() {
    let (finder, _) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));

    finder.find(1, FindOptions::new()).await.unwrap();
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 1);

    finder.find(1, FindOptions::new().reload(true)).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 2);

    assert!(finder.clear_cache(None).unwrap());
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 3);
  }

  #[tokio::test]
  async fn test_reload_refreshes_the_entry() {
    let (finder, _) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));
    finder.find_one("1", FindOptions::new()).await.unwrap();

    finder.inner().add_record(1, "Alicia");
    let reloaded = finder
      .find_one("1", FindOptions::new().reload(true))
      .await
      .unwrap();
    let cached = finder.find_one("1", FindOptions::new()).await.unwrap();

    assert_eq!(reloaded.get("name"), Some(&Value::from("Alicia")));
    assert_eq!(cached.get("name"), Some(&Value::from("Alicia")));
    assert_eq!(finder.inner().fetch_calls(), 2);
  }

  #[tokio::test]
  async fn test_params_are_part_of_the_key() {
    let (finder, backend) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));

    finder.find(1, FindOptions::new()).await.unwrap();
    finder
      .find(1, FindOptions::new().param("expand", "owner"))
      .await
      .unwrap();

    assert_eq!(finder.inner().fetch_calls(), 2);
    assert_eq!(backend.len(), 2);
  }

  #[tokio::test]
  async fn test_missing_id_propagates_not_found() {
    let (finder, backend) = finder(MockFinder::new("TestResource"));

    let err = finder.find(99, FindOptions::new()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(backend.len(), 0);
  }

  #[tokio::test]
  async fn test_empty_first_is_nothing_and_not_cached() {
    let (finder, backend) = finder(MockFinder::new("TestResource"));

    assert!(finder
      .find(Scope::First, FindOptions::new())
      .await
      .unwrap()
      .is_nothing());
    assert!(finder.last(FindOptions::new()).await.unwrap().is_none());
    assert_eq!(backend.len(), 0);

    finder.inner().add_record(1, "Alice");
    let first = finder.first(FindOptions::new()).await.unwrap().unwrap();
    assert_eq!(first.id().as_deref(), Some("1"));
    finder.first(FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 3);
  }

  #[tokio::test]
  async fn test_first_and_id_lookups_do_not_share_keys() {
    let (finder, backend) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));

    finder.first(FindOptions::new()).await.unwrap();
    finder.find_one("1", FindOptions::new()).await.unwrap();
    assert_eq!(backend.len(), 2);
  }

  #[tokio::test]
  async fn test_disabled_configuration_passes_through() {
    let (finder, backend) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));
    finder.config().off();

    finder.find(1, FindOptions::new()).await.unwrap();
    finder.find(1, FindOptions::new()).await.unwrap();

    assert_eq!(finder.inner().fetch_calls(), 2);
    assert_eq!(backend.len(), 0);

    finder.config().on();
    finder.find(1, FindOptions::new()).await.unwrap();
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 3);
  }

  #[tokio::test]
  async fn test_failing_backend_still_returns_results() {
    let finder = CachedFinder::new(
      MockFinder::new("TestResource").with_record(1, "Alice"),
      config_with(Arc::new(FailingStrategy)),
    );
    let capture = LogCapture::start();

    let record = finder.find_one("1", FindOptions::new()).await.unwrap();
    finder.find_one("1", FindOptions::new()).await.unwrap();

    assert_eq!(record.get("name"), Some(&Value::from("Alice")));
    assert_eq!(finder.inner().fetch_calls(), 2);
    assert!(!finder.clear_cache(None).unwrap());

    let output = capture.output();
    assert!(output.contains("Failed to read from cache"));
    assert!(output.contains("Failed to write to cache"));
  }

  #[tokio::test]
  async fn test_cache_hit_is_logged() {
    let (finder, _) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));
    let capture = LogCapture::start();

    finder.find(1, FindOptions::new()).await.unwrap();
    assert!(!capture.output().contains("Cache hit"));
    finder.find(1, FindOptions::new()).await.unwrap();
    assert!(capture.output().contains("Cache hit"));
  }

  #[tokio::test]
  async fn test_corrupt_entry_is_a_miss() {
    let (finder, backend) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));
    finder.find(1, FindOptions::new()).await.unwrap();

    let key = finder
      .cache_key(&single_key_parts(&Scope::from(1), &FindOptions::new()))
      .unwrap();
    let not_json = codec::compress(b"not json").unwrap();
    backend
      .write_raw(&hash_key(&key.to_string()).unwrap(), &not_json, Duration::from_secs(60))
      .unwrap();

    let record = finder.find_one("1", FindOptions::new()).await.unwrap();
    assert_eq!(record.id().as_deref(), Some("1"));
    assert_eq!(finder.inner().fetch_calls(), 2);
  }

  #[tokio::test]
  async fn test_prefix_options_survive_a_cache_hit() {
    let (finder, _) = finder(
      MockFinder::new("TestResource")
        .with_record(1, "Alice")
        .with_prefix_parameters(&["team_id"]),
    );
    let options = FindOptions::new().param("team_id", 7);

    finder.find_one("1", options.clone()).await.unwrap();
    let cached = finder.find_one("1", options).await.unwrap();

    assert_eq!(finder.inner().fetch_calls(), 1);
    assert_eq!(cached.prefix_options().get("team_id"), Some(&Value::from(7)));
  }

  #[tokio::test]
  async fn test_clear_with_pattern_is_model_scoped() {
    let backend: Arc<dyn CacheStrategy> = Arc::new(KvStrategy::new(MemoryStore::default()));
    let shared = |model: &str| {
      Arc::new(
        Configuration::builder(model)
          .shared_strategy(Arc::clone(&backend))
          .key_prefix("app")
          .build()
          .unwrap(),
      )
    };
    let people = CachedFinder::new(MockFinder::new("Person").with_record(1, "Alice"), shared("Person"));
    let companies = CachedFinder::new(
      MockFinder::new("Company").with_record(1, "Acme"),
      shared("Company"),
    );

    people.find(1, FindOptions::new()).await.unwrap();
    companies.find(1, FindOptions::new()).await.unwrap();

    assert!(people.clear_cache(Some("person-")).unwrap());
    people.find(1, FindOptions::new()).await.unwrap();
    companies.find(1, FindOptions::new()).await.unwrap();

    assert_eq!(people.inner().fetch_calls(), 2);
    assert_eq!(companies.inner().fetch_calls(), 1);
  }

  #[tokio::test]
  async fn test_clear_leaves_other_key_prefixes() {
    let backend: Arc<dyn CacheStrategy> = Arc::new(SqlStrategy::open_in_memory().unwrap());
    let people = CachedFinder::new(
      MockFinder::new("Person").with_record(1, "Alice"),
      Arc::new(
        Configuration::builder("Person")
          .shared_strategy(Arc::clone(&backend))
          .build()
          .unwrap(),
      ),
    );
    let companies = CachedFinder::new(
      MockFinder::new("Company").with_record(1, "Acme"),
      Arc::new(
        Configuration::builder("Company")
          .shared_strategy(Arc::clone(&backend))
          .build()
          .unwrap(),
      ),
    );

    people.find(1, FindOptions::new()).await.unwrap();
    companies.find(1, FindOptions::new()).await.unwrap();
    people.clear_cache(None).unwrap();
    people.find(1, FindOptions::new()).await.unwrap();
    companies.find(1, FindOptions::new()).await.unwrap();

    assert_eq!(people.inner().fetch_calls(), 2);
    assert_eq!(companies.inner().fetch_calls(), 1);
  }

  #[tokio::test]
  async fn test_computed_prefix_partitions_entries() {
    use std::sync::Mutex;
    let tenant = Arc::new(Mutex::new("alpha".to_string()));
    let current = Arc::clone(&tenant);
    let config = Configuration::builder("TestResource")
      .strategy(MapStrategy::default())
      .key_prefix_with(move || current.lock().unwrap().clone())
      .build()
      .unwrap();
    let finder = CachedFinder::new(
      MockFinder::new("TestResource").with_record(1, "Alice"),
      Arc::new(config),
    );

    finder.find(1, FindOptions::new()).await.unwrap();
    *tenant.lock().unwrap() = "beta".to_string();
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 2);

    *tenant.lock().unwrap() = String::new();
    let err = finder.find(1, FindOptions::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPrefix(_)));
  }

  #[tokio::test]
  async fn test_clear_through_kv_only_touches_current_tenant() {
    use std::sync::Mutex;
    let tenant = Arc::new(Mutex::new("alpha".to_string()));
    let current = Arc::clone(&tenant);
    let config = Configuration::builder("TestResource")
      .strategy(KvStrategy::new(MemoryStore::default()))
      .key_prefix_with(move || current.lock().unwrap().clone())
      .build()
      .unwrap();
    let finder = CachedFinder::new(
      MockFinder::new("TestResource").with_record(1, "Alice"),
      Arc::new(config),
    );

    finder.find(1, FindOptions::new()).await.unwrap();
    *tenant.lock().unwrap() = "beta".to_string();
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 2);

    assert!(finder.clear_cache(None).unwrap());
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 3);

    *tenant.lock().unwrap() = "alpha".to_string();
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 3);
  }

  #[tokio::test]
  async fn test_invalidate_and_prime() {
    let (finder, _) = finder(MockFinder::new("TestResource").with_record(1, "Alice"));
    finder.find(1, FindOptions::new()).await.unwrap();

    finder.invalidate(1, &FindOptions::new()).unwrap();
    finder.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(finder.inner().fetch_calls(), 2);

    let mut saved = Record::new(serde_json::Map::new());
    saved.set("id", 2);
    saved.set("name", "Bob");
    saved.mark_persisted();
    assert!(finder.prime(&saved, &FindOptions::new()).unwrap());

    let found = finder.find_one("2", FindOptions::new()).await.unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("Bob")));
    assert_eq!(finder.inner().fetch_calls(), 2);

    let anonymous = Record::new(serde_json::Map::new());
    assert!(matches!(
      finder.prime(&anonymous, &FindOptions::new()),
      Err(Error::InvalidArgument(_))
    ));
  }

  #[tokio::test]
  async fn test_subtype_inherits_configuration() {
    let registry = CacheRegistry::new();
    registry
      .cached_resource("Person", |b| b.strategy(MapStrategy::default()).key_prefix("app"))
      .unwrap();
    registry.inherit("Person", "Admin::Person").unwrap();

    let admins = registry
      .finder(MockFinder::new("Admin::Person").with_record(1, "Root"))
      .unwrap();
    admins.find(1, FindOptions::new()).await.unwrap();
    admins.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(admins.inner().fetch_calls(), 1);

    registry.get("Person").unwrap().unwrap().off();
    admins.find(1, FindOptions::new()).await.unwrap();
    assert_eq!(admins.inner().fetch_calls(), 2);
  }

  #[test]
  fn test_should_cache() {
    let (finder, _) = finder(MockFinder::new("TestResource"));
    let record = Record::new(serde_json::Map::new());
    let elements = vec![record.clone()];

    assert!(finder.should_cache(CacheCandidate::Record(Some(&record))));
    assert!(!finder.should_cache(CacheCandidate::Record(None)));
    assert!(finder.should_cache(CacheCandidate::Collection {
      requested: true,
      elements: &elements,
    }));
    assert!(!finder.should_cache(CacheCandidate::Collection {
      requested: false,
      elements: &elements,
    }));
    assert!(!finder.should_cache(CacheCandidate::Collection {
      requested: true,
      elements: &[],
    }));

    finder.config().off();
    assert!(!finder.should_cache(CacheCandidate::Record(Some(&record))));
  }
}
