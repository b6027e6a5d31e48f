use serde::{Deserialize, Serialize};

use crate::param::{Params, params_refs};
use crate::DeferredRef;

/// How an operation's idempotency key (physical resource id) is derived.
///
/// One rule governs every lifecycle hook of an operation, so create, update
/// and delete calls always target the same logical resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyRule {
  /// A fixed key.
  Literal { value: String },
  /// A minijinja template rendered against the operation's resolved create
  /// parameters, e.g. `"outbound-{{ QueueId }}"`.
  Template { template: String },
  /// The key is a field of the operation's own create response. It is only
  /// known after the first successful create and is cached from then on.
  FromResponse {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lookup: Option<Lookup>,
  },
}

impl KeyRule {
  pub fn literal(value: impl Into<String>) -> Self {
    KeyRule::Literal {
      value: value.into(),
    }
  }

  pub fn template(template: impl Into<String>) -> Self {
    KeyRule::Template {
      template: template.into(),
    }
  }

  pub fn from_response(path: impl Into<String>) -> Self {
    KeyRule::FromResponse {
      path: path.into(),
      lookup: None,
    }
  }

  /// Attach a natural-key lookup to a response-derived rule. Other rules are
  /// returned unchanged.
  pub fn with_lookup(self, lookup: Lookup) -> Self {
    match self {
      KeyRule::FromResponse { path, .. } => KeyRule::FromResponse {
        path,
        lookup: Some(lookup),
      },
      other => other,
    }
  }

  pub fn is_response_derived(&self) -> bool {
    matches!(self, KeyRule::FromResponse { .. })
  }
}

/// Alternate resolution path for a response-derived key: an external call that
/// searches for the resource by its natural key (a name, a username) and the
/// field of the search response that holds the identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
  pub action: String,
  #[serde(default)]
  pub parameters: Params,
  pub key_path: String,
}

impl Lookup {
  pub fn new(action: impl Into<String>, key_path: impl Into<String>) -> Self {
    Self {
      action: action.into(),
      parameters: Params::new(),
      key_path: key_path.into(),
    }
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<crate::Param>) -> Self {
    self.parameters.insert(name.into(), value.into());
    self
  }

  pub(crate) fn refs(&self) -> impl Iterator<Item = &DeferredRef> {
    params_refs(&self.parameters)
  }
}
