//! Payload encoding for cached results.
//!
//! Results are stored as JSON envelopes:
//!
//! ```text
//! single:     {"resource": {"object": {..}, "persistence": true}, "prefix_options": {..}}
//! collection: {"resource": [{"object": {..}, "persistence": true}, ..],
//!              "prefix_options": {..}, "path_params": {..}, "query_params": {..},
//!              "attributes": {..}}
//! ```
//!
//! The shape of `resource` tells the two apart. Stores additionally compress the
//! JSON with zlib.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{Read, Write};

use crate::error::Result;
use crate::resource::{Params, Record};

/// A result as it lives in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached {
  Record(Record),
  Collection {
    elements: Vec<Record>,
    /// Extra persisted attributes of the collection.
    attributes: Map<String, Value>,
  },
}

/// Request data captured alongside a result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
  pub prefix_options: Params,
  pub path_params: Params,
  pub query_params: Params,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
  object: Map<String, Value>,
  persistence: bool,
}

impl From<&Record> for StoredRecord {
  fn from(record: &Record) -> Self {
    Self {
      object: record.attributes().clone(),
      persistence: record.is_persisted(),
    }
  }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredResource {
  Many(Vec<StoredRecord>),
  One(StoredRecord),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
  resource: StoredResource,
  #[serde(default)]
  prefix_options: Params,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  path_params: Option<Params>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  query_params: Option<Params>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  attributes: Map<String, Value>,
}

/// Serialize a result together with its request context.
pub fn encode(cached: &Cached, context: &RequestContext) -> Result<Vec<u8>> {
  let envelope = match cached {
    Cached::Record(record) => Envelope {
      resource: StoredResource::One(record.into()),
      prefix_options: context.prefix_options.clone(),
      path_params: None,
      query_params: None,
      attributes: Map::new(),
    },
    Cached::Collection {
      elements,
      attributes,
    } => Envelope {
      resource: StoredResource::Many(elements.iter().map(StoredRecord::from).collect()),
      prefix_options: context.prefix_options.clone(),
      path_params: Some(context.path_params.clone()),
      query_params: Some(context.query_params.clone()),
      attributes: attributes.clone(),
    },
  };
  Ok(serde_json::to_vec(&envelope)?)
}

/// Rebuild a result. Prefix options are restored onto every record.
pub fn decode(bytes: &[u8]) -> Result<Cached> {
  let envelope: Envelope = serde_json::from_slice(bytes)?;
  let prefix_options = envelope.prefix_options;
  let restore = |stored: StoredRecord| {
    let mut record = Record::restore(stored.object, stored.persistence);
    record.set_prefix_options(prefix_options.clone());
    record
  };

  Ok(match envelope.resource {
    StoredResource::One(stored) => Cached::Record(restore(stored)),
    StoredResource::Many(stored) => Cached::Collection {
      elements: stored.into_iter().map(restore).collect(),
      attributes: envelope.attributes,
    },
  })
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
  let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(bytes)?;
  Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
  let mut decoder = ZlibDecoder::new(bytes);
  let mut out = Vec::new();
  decoder.read_to_end(&mut out)?;
  Ok(out)
}
