use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{
  CacheStrategy, Configuration, KvStrategy, MemoryStore, NoopStrategy, SqlStrategy, StrategyKind,
  DEFAULT_BATCH_CLEAR_SIZE, DEFAULT_MAX_CAPACITY, DEFAULT_TTL,
};
use crate::resource::ResourceDefinition;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the remote service, e.g. `https://api.example.com`
  pub site: String,
  /// Basic auth user; the password comes from the environment
  pub user: Option<String>,
  #[serde(default)]
  pub log: LogConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub resources: Vec<ResourceDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Optional log file, rotated daily
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_log_level() -> String {
  "warn".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  /// Storage strategy: kv or relational
  #[serde(default = "default_strategy")]
  pub strategy: StrategyKind,
  /// Database file for the relational strategy (defaults to the user data dir)
  pub path: Option<PathBuf>,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Key prefix shared by every resource (defaults to the resource name)
  pub key_prefix: Option<String>,
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Entry limit of the in-memory kv store
  #[serde(default = "default_max_capacity")]
  pub max_capacity: u64,
  #[serde(default = "default_batch_clear_size")]
  pub batch_clear_size: usize,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      strategy: default_strategy(),
      path: None,
      ttl_secs: default_ttl_secs(),
      key_prefix: None,
      enabled: true,
      max_capacity: default_max_capacity(),
      batch_clear_size: default_batch_clear_size(),
    }
  }
}

fn default_strategy() -> StrategyKind {
  StrategyKind::Relational
}

fn default_ttl_secs() -> u64 {
  DEFAULT_TTL.as_secs()
}

fn default_true() -> bool {
  true
}

fn default_max_capacity() -> u64 {
  DEFAULT_MAX_CAPACITY
}

fn default_batch_clear_size() -> usize {
  DEFAULT_BATCH_CLEAR_SIZE
}

impl CacheSettings {
  /// Open the configured storage. A disabled cache gets a strategy that stores nothing.
  pub fn build_strategy(&self) -> Result<Arc<dyn CacheStrategy>> {
    if !self.enabled {
      return Ok(Arc::new(NoopStrategy));
    }

    match self.strategy {
      StrategyKind::Kv => Ok(Arc::new(KvStrategy::new(MemoryStore::new(
        self.max_capacity,
      )))),
      StrategyKind::Relational => {
        let sql = match &self.path {
          Some(path) => SqlStrategy::open(path)?,
          None => SqlStrategy::open_default()?,
        };
        Ok(Arc::new(sql.with_batch_clear_size(self.batch_clear_size)))
      }
    }
  }

  /// Cache configuration of `model` on top of `strategy`.
  pub fn configuration(&self, model: &str, strategy: Arc<dyn CacheStrategy>) -> Result<Configuration> {
    let mut builder = Configuration::builder(model)
      .shared_strategy(strategy)
      .ttl(Duration::from_secs(self.ttl_secs))
      .enabled(self.enabled);
    if let Some(prefix) = &self.key_prefix {
      builder = builder.key_prefix(prefix.as_str());
    }
    Ok(builder.build()?)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cached-resource.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cached-resource/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cached-resource/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("cached-resource.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cached-resource").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Definition of `model`, or the conventional layout if none is configured.
  pub fn resource(&self, model: &str) -> ResourceDefinition {
    self
      .resources
      .iter()
      .find(|r| r.name.eq_ignore_ascii_case(model))
      .cloned()
      .unwrap_or_else(|| ResourceDefinition::new(model))
  }

  /// Basic auth password from CACHED_RESOURCE_PASSWORD.
  pub fn get_password() -> Option<String> {
    std::env::var("CACHED_RESOURCE_PASSWORD").ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = r#"
site: https://api.example.com
user: bot
log:
  level: debug
cache:
  strategy: kv
  ttl_secs: 600
  key_prefix: myapp
  max_capacity: 50
resources:
  - name: Person
    collection_name: people
    prefix: /teams/:team_id/
    collection_key: people
    persisted_attributes: [next_page]
"#;

  #[test]
  fn test_parse_full_config() {
    let config = Config::from_yaml(FULL).unwrap();

    assert_eq!(config.site, "https://api.example.com");
    assert_eq!(config.user.as_deref(), Some("bot"));
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.cache.strategy, StrategyKind::Kv);
    assert_eq!(config.cache.ttl_secs, 600);
    assert_eq!(config.cache.batch_clear_size, DEFAULT_BATCH_CLEAR_SIZE);

    let person = config.resource("person");
    assert_eq!(person.collection_name.as_deref(), Some("people"));
    assert_eq!(person.persisted_attributes, vec!["next_page".to_string()]);
  }

  #[test]
  fn test_defaults() {
    let config = Config::from_yaml("site: https://api.example.com").unwrap();

    assert_eq!(config.log.level, "warn");
    assert_eq!(config.cache.strategy, StrategyKind::Relational);
    assert_eq!(config.cache.ttl_secs, 86_400);
    assert!(config.cache.enabled);
    assert_eq!(config.resource("Company").name, "Company");
  }

  #[test]
  fn test_unknown_strategy_is_rejected() {
    let yaml = "site: https://api.example.com\ncache:\n  strategy: redis\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_build_configuration() {
    let config = Config::from_yaml(FULL).unwrap();
    let strategy = config.cache.build_strategy().unwrap();
    assert_eq!(strategy.name(), "kv");

    let person = config.cache.configuration("Person", strategy).unwrap();
    assert_eq!(person.key_prefix().resolve().unwrap(), "myapp");
    assert_eq!(person.ttl(), Duration::from_secs(600));
  }

  #[test]
  fn test_relational_strategy_at_path() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
      "site: https://api.example.com\ncache:\n  strategy: relational\n  path: {}\n",
      dir.path().join("cache.db").display()
    );
    let config = Config::from_yaml(&yaml).unwrap();

    assert_eq!(config.cache.build_strategy().unwrap().name(), "relational");
    assert!(dir.path().join("cache.db").exists());
  }

  #[test]
  fn test_disabled_cache_stores_nothing() {
    let yaml = "site: https://api.example.com\ncache:\n  enabled: false\n";
    let config = Config::from_yaml(yaml).unwrap();
    let strategy = config.cache.build_strategy().unwrap();
    assert_eq!(strategy.name(), "noop");

    let configuration = config.cache.configuration("Person", strategy).unwrap();
    assert!(!configuration.enabled());
  }
}
