//! Operation parameter values.
//!
//! A parameter is either a literal JSON value or a *deferred reference* to a
//! field of another operation's response. References may be nested anywhere
//! inside lists and maps:
//!
//! ```json
//! {
//!   "InstanceId": { "$ref": "instance", "path": "Arn" },
//!   "SecurityProfileArns": [{ "$ref": "admin_profile", "path": "SecurityProfiles.0.Arn" }],
//!   "PhoneConfig": { "PhoneType": "SOFT_PHONE" }
//! }
//! ```
//!
//! References are resolved by the executor when the operation runs, not when
//! the plan is built.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::FieldPath;

/// Named parameters of an external call.
pub type Params = BTreeMap<String, Param>;

/// "Field `path` of operation `operation`'s response."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeferredRef {
  #[serde(rename = "$ref")]
  pub operation: String,
  #[serde(default)]
  pub path: String,
}

impl DeferredRef {
  pub fn new(operation: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      operation: operation.into(),
      path: path.into(),
    }
  }

  pub fn field_path(&self) -> FieldPath {
    FieldPath::parse(&self.path)
  }
}

impl fmt::Display for DeferredRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.path.is_empty() {
      write!(f, "{}", self.operation)
    } else {
      write!(f, "{}.{}", self.operation, self.path)
    }
  }
}

/// A parameter value: literal, deferred reference, or a container of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
  Ref(DeferredRef),
  List(Vec<Param>),
  Map(BTreeMap<String, Param>),
  Literal(serde_json::Value),
}

impl Param {
  pub fn literal(value: impl Into<serde_json::Value>) -> Self {
    Param::Literal(value.into())
  }

  pub fn reference(operation: impl Into<String>, path: impl Into<String>) -> Self {
    Param::Ref(DeferredRef::new(operation, path))
  }

  /// All deferred references contained in this value, depth first.
  pub fn refs(&self) -> Vec<&DeferredRef> {
    let mut out = Vec::new();
    self.collect_refs(&mut out);
    out
  }

  fn collect_refs<'a>(&'a self, out: &mut Vec<&'a DeferredRef>) {
    match self {
      Param::Ref(r) => out.push(r),
      Param::List(items) => items.iter().for_each(|p| p.collect_refs(out)),
      Param::Map(map) => map.values().for_each(|p| p.collect_refs(out)),
      Param::Literal(_) => {}
    }
  }
}

impl From<&str> for Param {
  fn from(value: &str) -> Self {
    Param::Literal(serde_json::Value::String(value.to_string()))
  }
}

impl From<String> for Param {
  fn from(value: String) -> Self {
    Param::Literal(serde_json::Value::String(value))
  }
}

impl From<DeferredRef> for Param {
  fn from(value: DeferredRef) -> Self {
    Param::Ref(value)
  }
}

impl From<serde_json::Value> for Param {
  fn from(value: serde_json::Value) -> Self {
    Param::Literal(value)
  }
}

/// Collect every reference inside a parameter map.
pub(crate) fn params_refs(params: &Params) -> impl Iterator<Item = &DeferredRef> {
  params.values().flat_map(Param::refs)
}
