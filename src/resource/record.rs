//! Resource records as returned by a remote REST endpoint.

use serde_json::{Map, Value};

use super::Params;

/// A single remote record.
///
/// Attributes are kept as loose JSON since their schema belongs to the remote
/// service. `persisted` tells whether the record came from the server (or was
/// saved to it) as opposed to being built locally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
  attributes: Map<String, Value>,
  persisted: bool,
  prefix_options: Params,
}

impl Record {
  /// A new, not yet persisted record.
  pub fn new(attributes: Map<String, Value>) -> Self {
    Self {
      attributes,
      persisted: false,
      prefix_options: Params::new(),
    }
  }

  /// A record loaded from the remote service.
  pub fn instantiate(attributes: Map<String, Value>, prefix_options: Params) -> Self {
    Self {
      attributes,
      persisted: true,
      prefix_options,
    }
  }

  /// Rebuild a record from its stored parts.
  pub fn restore(attributes: Map<String, Value>, persisted: bool) -> Self {
    Self {
      attributes,
      persisted,
      prefix_options: Params::new(),
    }
  }

  pub fn attributes(&self) -> &Map<String, Value> {
    &self.attributes
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.attributes.get(name)
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    self.attributes.insert(name.into(), value.into());
  }

  /// The `id` attribute rendered as a path segment.
  pub fn id(&self) -> Option<String> {
    match self.attributes.get("id")? {
      Value::Null => None,
      Value::String(s) => Some(s.clone()),
      other => Some(other.to_string()),
    }
  }

  pub fn is_persisted(&self) -> bool {
    self.persisted
  }

  pub fn mark_persisted(&mut self) {
    self.persisted = true;
  }

  pub fn prefix_options(&self) -> &Params {
    &self.prefix_options
  }

  pub fn set_prefix_options(&mut self, prefix_options: Params) {
    self.prefix_options = prefix_options;
  }
}
