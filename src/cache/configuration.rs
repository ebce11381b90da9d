//! Per-model cache configuration.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::key::{underscore, KeyPrefix};
use super::logger::CacheLogger;
use super::store::CacheStore;
use super::strategy::CacheStrategy;
use crate::error::{Error, Result};

/// Default time-to-live of cached entries (one day).
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Built-in storage strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
  /// Key/value store with a side index for prefix clears.
  Kv,
  /// SQL table with `key`, `value` and `expires_at` columns.
  Relational,
}

impl FromStr for StrategyKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "kv" => Ok(Self::Kv),
      "relational" => Ok(Self::Relational),
      other => Err(Error::InvalidArgument(format!(
        "Invalid cache strategy: {}",
        other
      ))),
    }
  }
}

/// Cache settings of one model type.
///
/// Everything but the enabled flag is fixed once built. Subtypes share their
/// parent's configuration through [`CacheRegistry::inherit`](super::CacheRegistry::inherit).
pub struct Configuration {
  model_name: String,
  store: CacheStore,
  key_prefix: KeyPrefix,
  ttl: Duration,
  enabled: AtomicBool,
  logger: CacheLogger,
}

impl Configuration {
  pub fn builder(model_name: impl Into<String>) -> ConfigurationBuilder {
    ConfigurationBuilder::new(model_name)
  }

  /// Model type the configuration was created for.
  pub fn model_name(&self) -> &str {
    &self.model_name
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn key_prefix(&self) -> &KeyPrefix {
    &self.key_prefix
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn logger(&self) -> &CacheLogger {
    &self.logger
  }

  pub fn enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }

  /// Enable caching.
  pub fn on(&self) {
    self.enabled.store(true, Ordering::SeqCst);
  }

  /// Disable caching: reads are skipped and writes suppressed.
  pub fn off(&self) {
    self.enabled.store(false, Ordering::SeqCst);
  }
}

impl fmt::Debug for Configuration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Configuration")
      .field("model_name", &self.model_name)
      .field("strategy", &self.store.strategy().name())
      .field("key_prefix", &self.key_prefix)
      .field("ttl", &self.ttl)
      .field("enabled", &self.enabled())
      .finish()
  }
}

/// Builder for [`Configuration`].
pub struct ConfigurationBuilder {
  model_name: String,
  strategy: Option<Arc<dyn CacheStrategy>>,
  key_prefix: Option<KeyPrefix>,
  ttl: Duration,
  enabled: bool,
  logger: Option<CacheLogger>,
}

impl ConfigurationBuilder {
  fn new(model_name: impl Into<String>) -> Self {
    Self {
      model_name: model_name.into(),
      strategy: None,
      key_prefix: None,
      ttl: DEFAULT_TTL,
      enabled: true,
      logger: None,
    }
  }

  pub fn strategy(self, strategy: impl CacheStrategy + 'static) -> Self {
    self.shared_strategy(Arc::new(strategy))
  }

  pub fn shared_strategy(mut self, strategy: Arc<dyn CacheStrategy>) -> Self {
    self.strategy = Some(strategy);
    self
  }

  pub fn key_prefix(mut self, prefix: impl Into<KeyPrefix>) -> Self {
    self.key_prefix = Some(prefix.into());
    self
  }

  /// Compute the prefix on every use, e.g. from the current tenant.
  pub fn key_prefix_with<F>(mut self, f: F) -> Self
  where
    F: Fn() -> String + Send + Sync + 'static,
  {
    self.key_prefix = Some(KeyPrefix::computed(f));
    self
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn logger(mut self, logger: CacheLogger) -> Self {
    self.logger = Some(logger);
    self
  }

  pub fn build(self) -> Result<Configuration> {
    let strategy = self.strategy.ok_or_else(|| {
      Error::InvalidArgument(format!(
        "a cache strategy must be provided for {}",
        self.model_name
      ))
    })?;
    if self.ttl.is_zero() {
      return Err(Error::InvalidArgument("ttl must be positive".to_string()));
    }

    let key_prefix = self
      .key_prefix
      .unwrap_or_else(|| KeyPrefix::Literal(underscore(&self.model_name)));
    if let KeyPrefix::Literal(_) = key_prefix {
      key_prefix.resolve()?;
    }

    let logger = self
      .logger
      .unwrap_or_else(|| CacheLogger::new(&self.model_name));

    Ok(Configuration {
      store: CacheStore::new(strategy, logger.clone()),
      model_name: self.model_name,
      key_prefix,
      ttl: self.ttl,
      enabled: AtomicBool::new(self.enabled),
      logger,
    })
  }
}
