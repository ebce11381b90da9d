//! Lazy, cacheable collections.
//!
//! A [`Collection`] is created without touching the cache or the network.
//! The first read resolves it, after which it answers from memory until
//! [`Collection::reload`] is called.
//!
//! Resolution drops the `_acr_reload` marker from the request, then either
//! adopts a cached collection or fetches one and caches it whole, declared
//! persisted attributes included.

use serde_json::{Map, Value};
use std::fmt;

use super::codec::{Cached, RequestContext};
use super::key::RELOAD_PARAM;
use super::policy::{collection_key_parts, CacheCandidate, CachedFinder};
use crate::error::{Error, Result};
use crate::resource::{CollectionPage, CollectionRequest, FindOptions, Params, RawFinder, Record};

pub struct Collection<F: RawFinder> {
  finder: CachedFinder<F>,
  request: CollectionRequest,
  elements: Vec<Record>,
  attributes: Map<String, Value>,
  requested: bool,
}

impl<F: RawFinder> Collection<F> {
  pub(crate) fn new(finder: CachedFinder<F>, request: CollectionRequest) -> Self {
    Self {
      finder,
      request,
      elements: Vec::new(),
      attributes: Map::new(),
      requested: false,
    }
  }

  /// The request this collection resolves.
  pub fn request(&self) -> &CollectionRequest {
    &self.request
  }

  /// Whether resolution has run, successfully or not.
  pub fn requested(&self) -> bool {
    self.requested
  }

  /// Resolve if needed and return the elements.
  pub async fn load(&mut self) -> Result<&[Record]> {
    if !self.requested {
      let resolved = self.request_resources().await;
      self.requested = true;
      resolved?;
    }
    Ok(&self.elements)
  }

  /// Resolve now.
  pub async fn call(&mut self) -> Result<&mut Self> {
    self.load().await?;
    Ok(self)
  }

  /// Resolve again, bypassing the cache once.
  pub async fn reload(&mut self) -> Result<&mut Self> {
    self
      .request
      .query_params
      .insert(RELOAD_PARAM.to_string(), Value::Bool(true));
    self.requested = false;
    self.call().await
  }

  pub async fn len(&mut self) -> Result<usize> {
    Ok(self.load().await?.len())
  }

  pub async fn is_empty(&mut self) -> Result<bool> {
    Ok(self.load().await?.is_empty())
  }

  pub async fn first(&mut self) -> Result<Option<&Record>> {
    Ok(self.load().await?.first())
  }

  pub async fn contains(&mut self, record: &Record) -> Result<bool> {
    Ok(self.load().await?.contains(record))
  }

  pub async fn into_vec(mut self) -> Result<Vec<Record>> {
    self.load().await?;
    Ok(self.elements)
  }

  /// Elements resolved so far, without resolving.
  pub fn elements(&self) -> &[Record] {
    &self.elements
  }

  /// Value of a declared persisted attribute.
  pub fn attribute(&self, name: &str) -> Option<&Value> {
    self.attributes.get(name)
  }

  /// Set a declared persisted attribute.
  pub fn set_attribute(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
    if !self.is_persisted_attribute(name) {
      return Err(Error::InvalidArgument(format!(
        "{} is not a persisted attribute of {}",
        name,
        self.finder.inner().model_name()
      )));
    }
    self.attributes.insert(name.to_string(), value.into());
    Ok(())
  }

  pub fn persisted_attributes(&self) -> &[String] {
    self.finder.inner().persisted_attributes()
  }

  /// A new lazy collection with `clauses` merged into the query parameters.
  pub fn where_(&self, clauses: Params) -> Collection<F> {
    let mut params = self.request.prefix_options.clone();
    params.extend(self.request.query_params.clone());
    params.remove(RELOAD_PARAM);
    params.extend(clauses);

    let mut options = FindOptions::new().params(params);
    options.from = self.request.from.clone();
    self.finder.collection(&options)
  }

  fn is_persisted_attribute(&self, name: &str) -> bool {
    self.persisted_attributes().iter().any(|a| a == name)
  }

  /// Keep the declared attributes of `attributes`.
  fn adopt_attributes(&mut self, attributes: Map<String, Value>) {
    self.attributes = attributes
      .into_iter()
      .filter(|(name, _)| self.is_persisted_attribute(name))
      .collect();
  }

  async fn request_resources(&mut self) -> Result<()> {
    let should_reload = self
      .request
      .query_params
      .remove(RELOAD_PARAM)
      .is_some_and(|marker| is_truthy(&marker));
    self.request.path_params.remove(RELOAD_PARAM);
    let parts = collection_key_parts(&self.request);

    if !should_reload && self.finder.config().enabled() {
      if let Some(Cached::Collection {
        elements,
        attributes,
      }) = self.finder.cache_read(&parts)?
      {
        self.elements = elements;
        self.adopt_attributes(attributes);
        return Ok(());
      }
    }

    let page = match self.finder.inner().collection_fetch(&self.request).await {
      Ok(page) => page,
      Err(e) if e.is_not_found() => CollectionPage::default(),
      Err(e) => return Err(e),
    };
    self.elements = page.elements;
    self.adopt_attributes(page.attributes);

    let eligible = self.finder.should_cache(CacheCandidate::Collection {
      requested: true,
      elements: &self.elements,
    });
    if eligible {
      let cached = Cached::Collection {
        elements: self.elements.clone(),
        attributes: self.attributes.clone(),
      };
      let context = RequestContext {
        prefix_options: self.request.prefix_options.clone(),
        path_params: self.request.path_params.clone(),
        query_params: self.request.query_params.clone(),
      };
      self.finder.cache_write(&cached, &parts, &context)?;
    }

    Ok(())
  }
}

impl<F: RawFinder> fmt::Debug for Collection<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Collection")
      .field("model", &self.finder.inner().model_name())
      .field("request", &self.request)
      .field("requested", &self.requested)
      .field("elements", &self.elements)
      .field("attributes", &self.attributes)
      .finish()
  }
}

/// Only `null` and `false` read as unset.
fn is_truthy(marker: &Value) -> bool {
  !matches!(marker, Value::Null | Value::Bool(false))
}
