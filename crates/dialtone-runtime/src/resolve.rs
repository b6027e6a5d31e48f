//! Deferred reference resolution and key templates.
//!
//! Parameters are resolved at the moment an operation runs. Every
//! [`Param::Ref`] is replaced by the referenced field of another operation's
//! response, read through [`ResultStore::lookup`]:
//!
//! ```json
//! { "QueueId": { "$ref": "basic_queue", "path": "Queues.0.QueueId" } }
//! ```
//! becomes
//! ```json
//! { "QueueId": "q-1" }
//! ```
//!
//! Key templates are rendered with minijinja against the resolved parameters,
//! so `"outbound-{{ QueueId }}"` yields `"outbound-q-1"`.

use dialtone_config::{Param, Params};
use dialtone_store::ResultStore;
use minijinja::{Environment, UndefinedBehavior, Value};

use crate::error::NodeError;

/// Resolve a parameter map into a JSON object.
pub fn resolve_params(params: &Params, store: &ResultStore) -> Result<serde_json::Value, NodeError> {
  let mut resolved = serde_json::Map::with_capacity(params.len());
  for (name, param) in params {
    resolved.insert(name.clone(), resolve_param(param, store)?);
  }
  Ok(serde_json::Value::Object(resolved))
}

fn resolve_param(param: &Param, store: &ResultStore) -> Result<serde_json::Value, NodeError> {
  match param {
    Param::Literal(value) => Ok(value.clone()),
    Param::Ref(reference) => store
      .lookup(&reference.operation, &reference.path)
      .map_err(|e| NodeError::UnresolvedDependency {
        reference: reference.to_string(),
        reason: e.to_string(),
      }),
    Param::List(items) => items
      .iter()
      .map(|item| resolve_param(item, store))
      .collect::<Result<Vec<_>, _>>()
      .map(serde_json::Value::Array),
    Param::Map(map) => {
      let mut resolved = serde_json::Map::with_capacity(map.len());
      for (name, item) in map {
        resolved.insert(name.clone(), resolve_param(item, store)?);
      }
      Ok(serde_json::Value::Object(resolved))
    }
  }
}

/// Render a key template against resolved parameters.
///
/// Unlike plan-file templating this is strict: an unknown variable fails,
/// since a key with a hole in it would silently target the wrong resource.
pub fn render_key(template: &str, parameters: &serde_json::Value) -> Result<String, NodeError> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);

  let key = env
    .render_str(template, Value::from_serialize(parameters))
    .map_err(|e| NodeError::KeyDerivation {
      message: format!("failed to render key template '{}': {}", template, e),
    })?;

  if key.trim().is_empty() {
    return Err(NodeError::KeyDerivation {
      message: format!("key template '{}' rendered to an empty key", template),
    });
  }
  Ok(key)
}
