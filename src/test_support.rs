//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::subscriber::DefaultGuard;

use crate::cache::CacheStrategy;
use crate::error::{Error, Result};
use crate::resource::{
  split_options, CollectionPage, CollectionRequest, FindOptions, RawFinder, Record, Scope,
};

/// Collects formatted `tracing` output for the current thread.
pub struct LogCapture {
  buffer: Arc<Mutex<Vec<u8>>>,
  _guard: DefaultGuard,
}

impl LogCapture {
  pub fn start() -> Self {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::DEBUG)
      .with_ansi(false)
      .with_writer(move || SharedWriter(Arc::clone(&writer)))
      .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    Self {
      buffer,
      _guard: guard,
    }
  }

  pub fn output(&self) -> String {
    String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
  }
}

pub fn capture_logs<F: FnOnce()>(f: F) -> String {
  let capture = LogCapture::start();
  f();
  capture.output()
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// Unbounded strategy over a plain map. Ignores ttls.
#[derive(Default)]
pub struct MapStrategy {
  entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MapStrategy {
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
    self.entries.lock().unwrap().get(key).cloned()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap().len()
  }
}

impl CacheStrategy for MapStrategy {
  fn name(&self) -> &'static str {
    "map"
  }

  fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.raw(key))
  }

  fn write_raw(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<bool> {
    self
      .entries
      .lock()
      .unwrap()
      .insert(key.to_string(), value.to_vec());
    Ok(true)
  }

  fn delete_raw(&self, key: &str) -> Result<()> {
    self.entries.lock().unwrap().remove(key);
    Ok(())
  }

  fn clear_raw(&self, pattern: &str) -> Result<bool> {
    self
      .entries
      .lock()
      .unwrap()
      .retain(|key, _| !key.starts_with(pattern));
    Ok(true)
  }
}

/// Strategy whose backend is always down.
pub struct FailingStrategy;

impl CacheStrategy for FailingStrategy {
  fn name(&self) -> &'static str {
    "failing"
  }

  fn read_raw(&self, _key: &str) -> Result<Option<Vec<u8>>> {
    Err(Error::Backend("connection refused".to_string()))
  }

  fn write_raw(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<bool> {
    Err(Error::Backend("connection refused".to_string()))
  }

  fn delete_raw(&self, _key: &str) -> Result<()> {
    Err(Error::Backend("connection refused".to_string()))
  }

  fn clear_raw(&self, _pattern: &str) -> Result<bool> {
    Err(Error::Backend("connection refused".to_string()))
  }
}

/// In-memory fetch collaborator that counts its calls.
pub struct MockFinder {
  model: String,
  records: Mutex<BTreeMap<String, Map<String, Value>>>,
  page_attributes: Mutex<Map<String, Value>>,
  prefix_parameters: Vec<String>,
  persisted_attributes: Vec<String>,
  fetch_calls: AtomicUsize,
  collection_calls: AtomicUsize,
  last_request: Mutex<Option<CollectionRequest>>,
}

impl MockFinder {
  pub fn new(model: &str) -> Self {
    Self {
      model: model.to_string(),
      records: Mutex::new(BTreeMap::new()),
      page_attributes: Mutex::new(Map::new()),
      prefix_parameters: Vec::new(),
      persisted_attributes: Vec::new(),
      fetch_calls: AtomicUsize::new(0),
      collection_calls: AtomicUsize::new(0),
      last_request: Mutex::new(None),
    }
  }

  pub fn with_record(self, id: u64, name: &str) -> Self {
    self.add_record(id, name);
    self
  }

  pub fn with_page_attribute(self, name: &str, value: Value) -> Self {
    self.set_page_attribute(name, value);
    self
  }

  pub fn with_prefix_parameters(mut self, names: &[&str]) -> Self {
    self.prefix_parameters = names.iter().map(|n| n.to_string()).collect();
    self
  }

  pub fn with_persisted_attributes(mut self, names: &[&str]) -> Self {
    self.persisted_attributes = names.iter().map(|n| n.to_string()).collect();
    self
  }

  pub fn add_record(&self, id: u64, name: &str) {
    let attributes = json!({ "id": id, "name": name });
    if let Value::Object(map) = attributes {
      self.records.lock().unwrap().insert(id.to_string(), map);
    }
  }

  pub fn set_page_attribute(&self, name: &str, value: Value) {
    self
      .page_attributes
      .lock()
      .unwrap()
      .insert(name.to_string(), value);
  }

  pub fn fetch_calls(&self) -> usize {
    self.fetch_calls.load(Ordering::SeqCst)
  }

  pub fn collection_calls(&self) -> usize {
    self.collection_calls.load(Ordering::SeqCst)
  }

  pub fn last_request(&self) -> Option<CollectionRequest> {
    self.last_request.lock().unwrap().clone()
  }

  fn all_records(&self, prefix_options: &crate::resource::Params) -> Vec<Record> {
    self
      .records
      .lock()
      .unwrap()
      .values()
      .map(|attrs| Record::instantiate(attrs.clone(), prefix_options.clone()))
      .collect()
  }
}

#[async_trait]
impl RawFinder for MockFinder {
  fn model_name(&self) -> &str {
    &self.model
  }

  fn prefix_parameters(&self) -> &[String] {
    &self.prefix_parameters
  }

  fn persisted_attributes(&self) -> &[String] {
    &self.persisted_attributes
  }

  async fn fetch(&self, scope: &Scope, options: &FindOptions) -> Result<Option<Record>> {
    self.fetch_calls.fetch_add(1, Ordering::SeqCst);
    let (prefix_options, _) = split_options(&options.params, &self.prefix_parameters);
    let records = self.all_records(&prefix_options);

    match scope {
      Scope::Id(id) => records
        .into_iter()
        .find(|r| r.id().as_deref() == Some(id.as_str()))
        .map(Some)
        .ok_or_else(|| Error::not_found(&self.model, id)),
      Scope::First => Ok(records.into_iter().next()),
      Scope::Last => Ok(records.into_iter().last()),
      Scope::All => Err(Error::InvalidArgument(
        "collections are fetched with collection_fetch".to_string(),
      )),
    }
  }

  async fn collection_fetch(&self, request: &CollectionRequest) -> Result<CollectionPage> {
    self.collection_calls.fetch_add(1, Ordering::SeqCst);
    *self.last_request.lock().unwrap() = Some(request.clone());

    Ok(CollectionPage {
      elements: self.all_records(&request.prefix_options),
      attributes: self.page_attributes.lock().unwrap().clone(),
    })
  }
}
