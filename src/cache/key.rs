//! Cache key derivation.
//!
//! A logical key is `<prefix>-<body>`:
//! - `prefix` is `acr/<key prefix>/<model path>` and identifies a model namespace,
//! - `body` is the request signature (scope, endpoint, parameters).
//!
//! Stores only ever see `<prefix>-sha256(<body>)`. The prefix stays readable so
//! that every entry of a model can be cleared by prefix.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::resource::Params;

/// Global namespace of every key written by this crate.
pub const GLOBAL_PREFIX: &str = "acr";

/// Separates the prefix from the body. Never valid inside a prefix.
pub const PREFIX_SEPARATOR: char = '-';

/// Joins the parts of a key body.
pub const BODY_SEPARATOR: &str = "/";

/// Transient query parameter asking a collection to bypass the cache once.
pub const RELOAD_PARAM: &str = "_acr_reload";

/// Configured key prefix: a literal or a function evaluated on every use.
#[derive(Clone)]
pub enum KeyPrefix {
  Literal(String),
  Computed(Arc<dyn Fn() -> String + Send + Sync>),
}

impl KeyPrefix {
  pub fn computed<F>(f: F) -> Self
  where
    F: Fn() -> String + Send + Sync + 'static,
  {
    Self::Computed(Arc::new(f))
  }

  /// Evaluate the prefix, rejecting empty values and values containing the separator.
  pub fn resolve(&self) -> Result<String> {
    let raw = match self {
      Self::Literal(prefix) => prefix.clone(),
      Self::Computed(f) => f(),
    };
    let prefix = normalize(&raw);

    if prefix.is_empty() {
      return Err(Error::InvalidPrefix(
        "cache_key_prefix must resolve to a non-empty string".to_string(),
      ));
    }
    if prefix.contains(PREFIX_SEPARATOR) {
      return Err(Error::InvalidPrefix(format!(
        "cache_key_prefix `{}` must not contain `{}`",
        prefix, PREFIX_SEPARATOR
      )));
    }
    Ok(prefix)
  }

  /// `acr/<prefix>/`: every key of every model sharing this prefix starts with it.
  pub fn namespace(&self) -> Result<String> {
    Ok(format!("{}/{}/", GLOBAL_PREFIX, self.resolve()?))
  }
}

impl fmt::Debug for KeyPrefix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Literal(prefix) => f.debug_tuple("Literal").field(prefix).finish(),
      Self::Computed(_) => f.write_str("Computed(..)"),
    }
  }
}

impl From<&str> for KeyPrefix {
  fn from(prefix: &str) -> Self {
    Self::Literal(prefix.to_string())
  }
}

impl From<String> for KeyPrefix {
  fn from(prefix: String) -> Self {
    Self::Literal(prefix)
  }
}

/// A logical cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
  prefix: String,
  body: String,
}

impl CacheKey {
  /// Build the key for a request made through `model_name`.
  pub fn build(model_name: &str, key_prefix: &KeyPrefix, parts: &[String]) -> Result<Self> {
    let prefix = model_prefix(model_name, key_prefix)?;
    let body = normalize(&parts.join(BODY_SEPARATOR));
    if body.is_empty() {
      return Err(Error::InvalidArgument(
        "a cache key needs at least one non-empty part".to_string(),
      ));
    }
    Ok(Self { prefix, body })
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  pub fn body(&self) -> &str {
    &self.body
  }

  /// The key as stores see it.
  pub fn storage_key(&self) -> String {
    derive_storage_key(&self.prefix, &self.body)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}{}", self.prefix, PREFIX_SEPARATOR, self.body)
  }
}

/// `acr/<key prefix>/<model path>` for a model.
pub fn model_prefix(model_name: &str, key_prefix: &KeyPrefix) -> Result<String> {
  Ok(format!(
    "{}{}",
    key_prefix.namespace()?,
    normalize(&model_path(model_name))
  ))
}

/// `prefix-sha256(body)`.
pub fn derive_storage_key(prefix: &str, body: &str) -> String {
  format!("{}{}{}", prefix, PREFIX_SEPARATOR, hash_body(body))
}

/// Split a key on its first separator. Both halves must be non-empty.
pub fn split_storage_key(key: &str) -> Result<(&str, &str)> {
  match key.split_once(PREFIX_SEPARATOR) {
    Some((prefix, rest)) if !prefix.is_empty() && !rest.is_empty() => Ok((prefix, rest)),
    _ => Err(Error::MalformedKey(key.to_string())),
  }
}

/// Turn a logical `prefix-body` key into its storage form.
pub fn hash_key(key: &str) -> Result<String> {
  let (prefix, body) = split_storage_key(key)?;
  Ok(derive_storage_key(prefix, body))
}

/// SHA256 hash for stable, fixed-length keys.
pub fn hash_body(body: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body.as_bytes());
  hex::encode(hasher.finalize())
}

/// Deterministic rendering of a parameter map as one key part.
pub fn params_part(params: &Params) -> String {
  serde_json::to_string(params).unwrap_or_default()
}

/// `Admin::TestResource` -> `admin/test_resource`.
pub fn underscore(name: &str) -> String {
  let chars: Vec<char> = name.replace("::", "/").chars().collect();
  let mut out = String::with_capacity(chars.len() + 4);
  for (i, &c) in chars.iter().enumerate() {
    if c.is_uppercase() {
      let prev = if i > 0 { chars.get(i - 1) } else { None };
      let next = chars.get(i + 1);
      let boundary = match prev {
        Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
        Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
        _ => false,
      };
      if boundary {
        out.push('_');
      }
      out.extend(c.to_lowercase());
    } else {
      out.push(c);
    }
  }
  out
}

/// Model name as a key path. Dashes would collide with the separator.
pub fn model_path(name: &str) -> String {
  underscore(name).replace(PREFIX_SEPARATOR, "/")
}

/// Lowercase and strip whitespace for consistent hashing.
fn normalize(s: &str) -> String {
  s.chars()
    .filter(|c| !c.is_whitespace())
    .flat_map(char::to_lowercase)
    .collect()
}
