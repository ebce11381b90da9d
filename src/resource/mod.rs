//! Remote resource access: records, the fetch collaborator contract and an
//! HTTP implementation of it.

mod finder;
mod http;
mod record;

use serde_json::Value;
use std::collections::BTreeMap;

pub use finder::{
  split_options, CollectionPage, CollectionRequest, FindOptions, RawFinder, Scope, Source,
};
pub use http::{HttpFinder, ResourceDefinition};
pub use record::Record;

/// Request parameters. Ordered so that derived cache keys are deterministic.
pub type Params = BTreeMap<String, Value>;
