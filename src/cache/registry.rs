//! Per-model-type configuration registry.
//!
//! Configurations are looked up by model name. A subtype registered with
//! [`CacheRegistry::inherit`] shares its parent's [`Configuration`] by
//! reference until it is given one of its own with [`CacheRegistry::setup`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::configuration::{Configuration, ConfigurationBuilder};
use super::policy::CachedFinder;
use crate::error::{Error, Result};
use crate::resource::RawFinder;

#[derive(Default)]
pub struct CacheRegistry {
  configs: RwLock<HashMap<String, Arc<Configuration>>>,
}

impl CacheRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Arc<Configuration>>>> {
    self
      .configs
      .read()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }

  fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Arc<Configuration>>>> {
    self
      .configs
      .write()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }

  /// Register `config` for its model, replacing any previous one.
  pub fn setup(&self, config: Configuration) -> Result<Arc<Configuration>> {
    let config = Arc::new(config);
    self
      .write()?
      .insert(config.model_name().to_string(), Arc::clone(&config));
    tracing::debug!(target: "cached_resource", model = config.model_name(), "Cache configured");
    Ok(config)
  }

  /// Return the configuration of `model`, creating it with `init` on first use.
  pub fn cached_resource<I>(&self, model: &str, init: I) -> Result<Arc<Configuration>>
  where
    I: FnOnce(ConfigurationBuilder) -> ConfigurationBuilder,
  {
    let mut configs = self.write()?;
    if let Some(config) = configs.get(model) {
      return Ok(Arc::clone(config));
    }

    let config = Arc::new(init(Configuration::builder(model)).build()?);
    configs.insert(model.to_string(), Arc::clone(&config));
    Ok(config)
  }

  pub fn get(&self, model: &str) -> Result<Option<Arc<Configuration>>> {
    Ok(self.read()?.get(model).cloned())
  }

  /// Link `child` to the configuration of `parent`.
  pub fn inherit(&self, parent: &str, child: &str) -> Result<Arc<Configuration>> {
    let mut configs = self.write()?;
    let config = configs
      .get(parent)
      .cloned()
      .ok_or_else(|| Error::InvalidArgument(format!("{} has no cache configuration", parent)))?;
    configs.insert(child.to_string(), Arc::clone(&config));
    Ok(config)
  }

  /// Wrap `inner` with the configuration registered for its model.
  pub fn finder<F: RawFinder>(&self, inner: F) -> Result<CachedFinder<F>> {
    let config = self.get(inner.model_name())?.ok_or_else(|| {
      Error::InvalidArgument(format!("{} has no cache configuration", inner.model_name()))
    })?;
    Ok(CachedFinder::new(inner, config))
  }
}
