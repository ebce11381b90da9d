//! JSON-over-HTTP fetch collaborator.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::finder::{split_options, CollectionPage, CollectionRequest, FindOptions, RawFinder};
use super::{Params, Record, Scope, Source};
use crate::error::{Error, Result};

/// How a remote resource is laid out on the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDefinition {
  /// Model type name, e.g. `Person`.
  pub name: String,
  /// Path segment of the collection; defaults to the underscored name plus `s`.
  pub collection_name: Option<String>,
  /// Path prefix with `:param` placeholders, e.g. `/companies/:company_id/`.
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Key holding the records when collection bodies are wrapped objects.
  pub collection_key: Option<String>,
  /// Sibling fields of `collection_key` kept on cached collections.
  #[serde(default)]
  pub persisted_attributes: Vec<String>,
  #[serde(default = "default_true")]
  pub include_format_in_path: bool,
}

fn default_prefix() -> String {
  "/".to_string()
}

fn default_true() -> bool {
  true
}

impl ResourceDefinition {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      collection_name: None,
      prefix: default_prefix(),
      collection_key: None,
      persisted_attributes: Vec::new(),
      include_format_in_path: true,
    }
  }

  fn collection_name(&self) -> String {
    match &self.collection_name {
      Some(name) => name.clone(),
      None => {
        let base = self.name.rsplit("::").next().unwrap_or(&self.name);
        format!("{}s", crate::cache::underscore(base))
      }
    }
  }

  /// Placeholder names found in the prefix.
  fn prefix_parameters(&self) -> Vec<String> {
    self
      .prefix
      .split('/')
      .filter_map(|segment| segment.strip_prefix(':'))
      .map(String::from)
      .collect()
  }
}

/// Fetches records from a JSON REST endpoint.
#[derive(Clone)]
pub struct HttpFinder {
  client: reqwest::Client,
  site: String,
  definition: ResourceDefinition,
  prefix_parameters: Vec<String>,
  credentials: Option<(String, Option<String>)>,
}

impl HttpFinder {
  pub fn new(site: &str, definition: ResourceDefinition) -> Result<Self> {
    let parsed = url::Url::parse(site)
      .map_err(|e| Error::InvalidArgument(format!("Invalid site {}: {}", site, e)))?;
    let prefix_parameters = definition.prefix_parameters();

    Ok(Self {
      client: reqwest::Client::new(),
      site: parsed.as_str().trim_end_matches('/').to_string(),
      definition,
      prefix_parameters,
      credentials: None,
    })
  }

  pub fn with_basic_auth(mut self, user: impl Into<String>, password: Option<String>) -> Self {
    self.credentials = Some((user.into(), password));
    self
  }

  fn extension(&self) -> &'static str {
    if self.definition.include_format_in_path {
      ".json"
    } else {
      ""
    }
  }

  /// Prefix with every `:param` placeholder substituted.
  fn prefix_path(&self, prefix_options: &Params) -> Result<String> {
    let mut path = self.definition.prefix.clone();
    for name in &self.prefix_parameters {
      let value = prefix_options.get(name).ok_or_else(|| {
        Error::InvalidArgument(format!(
          "Missing prefix parameter `{}` for {}",
          name, self.definition.name
        ))
      })?;
      path = path.replace(&format!(":{}", name), &param_to_string(value));
    }
    if !path.ends_with('/') {
      path.push('/');
    }
    Ok(path)
  }

  fn element_path(&self, id: &str, prefix_options: &Params, query: &Params) -> Result<String> {
    Ok(format!(
      "{}{}/{}{}{}",
      self.prefix_path(prefix_options)?,
      self.definition.collection_name(),
      id,
      self.extension(),
      query_string(query)
    ))
  }

  fn collection_path(&self, prefix_options: &Params, query: &Params) -> Result<String> {
    Ok(format!(
      "{}{}{}{}",
      self.prefix_path(prefix_options)?,
      self.definition.collection_name(),
      self.extension(),
      query_string(query)
    ))
  }

  fn custom_method_path(
    &self,
    method: &str,
    prefix_options: &Params,
    query: &Params,
  ) -> Result<String> {
    Ok(format!(
      "{}{}/{}{}{}",
      self.prefix_path(prefix_options)?,
      self.definition.collection_name(),
      method,
      self.extension(),
      query_string(query)
    ))
  }

  /// GET `path`, returning `None` on 404.
  async fn get(&self, path: &str) -> Result<Option<Value>> {
    let url = format!("{}{}", self.site, path);
    let mut request = self
      .client
      .get(&url)
      .header(reqwest::header::ACCEPT, "application/json");
    if let Some((user, password)) = &self.credentials {
      request = request.basic_auth(user, password.as_deref());
    }

    let response = request
      .send()
      .await
      .map_err(|e| Error::Fetch(format!("Failed to get {}: {}", url, e)))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !response.status().is_success() {
      return Err(Error::Fetch(format!(
        "Failed to get {}: status {}",
        url,
        response.status()
      )));
    }

    let body = response.text().await?;
    if body.trim().is_empty() {
      return Ok(Some(Value::Null));
    }
    Ok(Some(serde_json::from_str(&body)?))
  }

  fn instantiate(&self, value: Value, prefix_options: &Params) -> Result<Record> {
    match value {
      Value::Object(attributes) => Ok(Record::instantiate(attributes, prefix_options.clone())),
      other => Err(Error::Fetch(format!(
        "Expected a {} object, got {}",
        self.definition.name, other
      ))),
    }
  }

  /// Turn a collection body into records plus sibling attributes.
  fn parse_collection(&self, body: Value, prefix_options: &Params) -> Result<CollectionPage> {
    let (elements, attributes) = match (body, &self.definition.collection_key) {
      (Value::Array(elements), _) => (elements, Map::new()),
      (Value::Object(mut object), Some(key)) => {
        let elements = match object.remove(key) {
          Some(Value::Array(elements)) => elements,
          _ => Vec::new(),
        };
        (elements, object)
      }
      (Value::Null, _) => (Vec::new(), Map::new()),
      (other, _) => {
        return Err(Error::Fetch(format!(
          "Unexpected collection body for {}: {}",
          self.definition.name, other
        )))
      }
    };

    let elements = elements
      .into_iter()
      .map(|e| self.instantiate(e, prefix_options))
      .collect::<Result<Vec<_>>>()?;

    Ok(CollectionPage {
      elements,
      attributes,
    })
  }
}

#[async_trait]
impl RawFinder for HttpFinder {
  fn model_name(&self) -> &str {
    &self.definition.name
  }

  fn prefix_parameters(&self) -> &[String] {
    &self.prefix_parameters
  }

  fn persisted_attributes(&self) -> &[String] {
    &self.definition.persisted_attributes
  }

  async fn fetch(&self, scope: &Scope, options: &FindOptions) -> Result<Option<Record>> {
    match scope {
      Scope::Id(id) => {
        let (prefix_options, query) = split_options(&options.params, &self.prefix_parameters);
        let path = match &options.from {
          Some(Source::Path(path)) => format!("{}{}", path, query_string(&query)),
          Some(Source::Method(method)) => self.custom_method_path(method, &prefix_options, &query)?,
          None => self.element_path(id, &prefix_options, &query)?,
        };

        match self.get(&path).await? {
          Some(body) => self.instantiate(body, &prefix_options).map(Some),
          None => Err(Error::not_found(&self.definition.name, id)),
        }
      }
      Scope::First | Scope::Last => {
        let request = CollectionRequest::new(options, &self.prefix_parameters);
        let mut elements = match self.collection_fetch(&request).await {
          Ok(page) => page.elements,
          Err(e) if e.is_not_found() => return Ok(None),
          Err(e) => return Err(e),
        };
        Ok(if *scope == Scope::First {
          (!elements.is_empty()).then(|| elements.remove(0))
        } else {
          elements.pop()
        })
      }
      Scope::All => Err(Error::InvalidArgument(
        "`all` is resolved through collection_fetch".to_string(),
      )),
    }
  }

  async fn collection_fetch(&self, request: &CollectionRequest) -> Result<CollectionPage> {
    let path = match &request.from {
      Some(Source::Method(method)) => {
        self.custom_method_path(method, &request.prefix_options, &request.query_params)?
      }
      Some(Source::Path(path)) => format!("{}{}", path, query_string(&request.query_params)),
      None => self.collection_path(&request.prefix_options, &request.query_params)?,
    };

    match self.get(&path).await? {
      Some(body) => self.parse_collection(body, &request.prefix_options),
      None => Err(Error::not_found(&self.definition.name, path)),
    }
  }
}

fn param_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn query_string(params: &Params) -> String {
  if params.is_empty() {
    return String::new();
  }
  let mut serializer = url::form_urlencoded::Serializer::new(String::new());
  for (name, value) in params {
    serializer.append_pair(name, &param_to_string(value));
  }
  format!("?{}", serializer.finish())
}
