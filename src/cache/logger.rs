//! Per-model cache diagnostics.

use std::fmt::Display;
use std::sync::Arc;

/// Emits cache hits and backend failures for one model on `tracing`.
#[derive(Debug, Clone)]
pub struct CacheLogger {
  model: Arc<str>,
  enabled: bool,
}

impl CacheLogger {
  pub fn new(model: impl AsRef<str>) -> Self {
    Self {
      model: Arc::from(model.as_ref()),
      enabled: true,
    }
  }

  /// A logger that drops everything.
  pub fn silent(model: impl AsRef<str>) -> Self {
    Self {
      enabled: false,
      ..Self::new(model)
    }
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  pub fn debug(&self, key: &str, message: impl Display) {
    if self.enabled {
      tracing::debug!(target: "cached_resource", model = %self.model, key, "[CACHE][ACR] {}", message);
    }
  }

  pub fn error(&self, key: &str, message: impl Display) {
    if self.enabled {
      tracing::error!(target: "cached_resource", model = %self.model, key, "[CACHE][ACR] {}", message);
    }
  }
}
