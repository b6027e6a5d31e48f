//! Per-operation preparation and execution.
//!
//! Preparation is synchronous and reads the [`ResultStore`]: it resolves the
//! call parameters and decides how the idempotency key will be obtained.
//! Execution runs on a spawned task and only talks to the transport.

use std::sync::Arc;

use dialtone_config::{KeyRule, Lifecycle, LifecycleVariant, Lookup, OperationDef};
use dialtone_store::ResultStore;
use dialtone_transport::{Request, Response, Transport};
use tracing::info;

use crate::error::NodeError;
use crate::resolve::{render_key, resolve_params};

/// Everything a spawned task needs to execute one operation.
#[derive(Debug, Clone)]
pub(crate) struct PreparedNode {
  pub operation: String,
  pub lifecycle: Lifecycle,
  pub action: String,
  pub parameters: serde_json::Value,
  pub key: KeyPlan,
}

impl PreparedNode {
  /// The key, when it is known before any call is made.
  pub fn known_key(&self) -> Option<String> {
    match &self.key {
      KeyPlan::Fixed(key) => Some(key.clone()),
      KeyPlan::Derive { expected, .. } => expected.clone(),
      _ => None,
    }
  }
}

/// How the idempotency key of a prepared operation is obtained.
#[derive(Debug, Clone)]
pub(crate) enum KeyPlan {
  /// Known before the call.
  Fixed(String),
  /// Read from the create response. A cached key must match.
  Derive {
    path: String,
    expected: Option<String>,
  },
  /// Search first and adopt the resource if found, otherwise create.
  LookupOrCreate {
    lookup: PreparedLookup,
    path: String,
    adopt: Adoption,
  },
  /// Update or delete whose key can only come from a search.
  LookupOnly { lookup: PreparedLookup },
}

#[derive(Debug, Clone)]
pub(crate) struct PreparedLookup {
  pub action: String,
  pub parameters: serde_json::Value,
  pub key_path: String,
}

/// What adopting a found resource means for the operation's variant.
#[derive(Debug, Clone)]
pub(crate) enum Adoption {
  /// Run the update hook against the found resource.
  Update {
    action: String,
    parameters: serde_json::Value,
  },
  /// Record the lookup response as the result.
  Record,
}

/// Result of a successful execution.
#[derive(Debug, Clone)]
pub(crate) struct Completed {
  pub response: serde_json::Value,
  pub key: String,
  pub adopted: bool,
}

/// What preparation decided for one operation.
#[derive(Debug)]
pub(crate) enum Preparation {
  Ready(PreparedNode),
  /// The operation has no hook for the lifecycle.
  NoHook,
  /// Delete of an operation that was never created.
  NotProvisioned,
}

/// Resolve parameters and plan the key for one operation.
pub(crate) fn prepare(
  op: &OperationDef,
  lifecycle: Lifecycle,
  store: &ResultStore,
) -> Result<Preparation, NodeError> {
  let Some((action, params)) = op.call_for(lifecycle) else {
    return Ok(Preparation::NoHook);
  };
  // Checked before resolving: delete hooks often reference the operation's
  // own response, which does not exist here
  if lifecycle == Lifecycle::Delete && never_provisioned(op, store) {
    return Ok(Preparation::NotProvisioned);
  }

  let parameters = resolve_params(params, store)?;
  let key = plan_key(op, lifecycle, &parameters, store)?;

  Ok(Preparation::Ready(PreparedNode {
    operation: op.id.clone(),
    lifecycle,
    action: action.to_string(),
    parameters,
    key,
  }))
}

/// A response-keyed operation without a lookup can only be known through an
/// earlier successful create. With neither a cached key nor a response, no
/// such create happened.
fn never_provisioned(op: &OperationDef, store: &ResultStore) -> bool {
  matches!(&op.key, KeyRule::FromResponse { lookup: None, .. })
    && store.cached_key(&op.id).is_none()
    && store.response(&op.id).is_none()
}

fn plan_key(
  op: &OperationDef,
  lifecycle: Lifecycle,
  parameters: &serde_json::Value,
  store: &ResultStore,
) -> Result<KeyPlan, NodeError> {
  let cached = store.cached_key(&op.id).map(str::to_string);

  match &op.key {
    KeyRule::Literal { value } => Ok(KeyPlan::Fixed(value.clone())),

    KeyRule::Template { template } => {
      // The key is always rendered from the create parameters
      let rendered = match lifecycle {
        Lifecycle::Create => render_key(template, parameters),
        _ => resolve_params(&op.parameters, store).and_then(|p| render_key(template, &p)),
      };
      match (rendered, cached) {
        (Ok(key), _) => Ok(KeyPlan::Fixed(key)),
        (Err(_), Some(cached)) if lifecycle != Lifecycle::Create => Ok(KeyPlan::Fixed(cached)),
        (Err(e), _) => Err(e),
      }
    }

    KeyRule::FromResponse { path, lookup } => match (lifecycle, cached, lookup) {
      (Lifecycle::Create, Some(cached), _) => Ok(KeyPlan::Derive {
        path: path.clone(),
        expected: Some(cached),
      }),
      (Lifecycle::Create, None, Some(lookup)) => Ok(KeyPlan::LookupOrCreate {
        lookup: prepare_lookup(lookup, store)?,
        path: path.clone(),
        adopt: adoption(op, store)?,
      }),
      (Lifecycle::Create, None, None) => Ok(KeyPlan::Derive {
        path: path.clone(),
        expected: None,
      }),
      (_, Some(cached), _) => Ok(KeyPlan::Fixed(cached)),
      (_, None, Some(lookup)) => Ok(KeyPlan::LookupOnly {
        lookup: prepare_lookup(lookup, store)?,
      }),
      (_, None, None) => Err(NodeError::MissingKey),
    },
  }
}

fn prepare_lookup(lookup: &Lookup, store: &ResultStore) -> Result<PreparedLookup, NodeError> {
  Ok(PreparedLookup {
    action: lookup.action.clone(),
    parameters: resolve_params(&lookup.parameters, store)?,
    key_path: lookup.key_path.clone(),
  })
}

fn adoption(op: &OperationDef, store: &ResultStore) -> Result<Adoption, NodeError> {
  if op.variant == LifecycleVariant::CreateOnly {
    return Ok(Adoption::Record);
  }
  match op.call_for(Lifecycle::Update) {
    Some((action, params)) => Ok(Adoption::Update {
      action: action.to_string(),
      parameters: resolve_params(params, store)?,
    }),
    None => Ok(Adoption::Record),
  }
}

/// Execute a prepared operation against the transport.
pub(crate) async fn execute(
  transport: Arc<dyn Transport>,
  node: PreparedNode,
) -> Result<Completed, NodeError> {
  let PreparedNode {
    operation,
    lifecycle,
    action,
    parameters,
    key,
  } = node;

  match key {
    KeyPlan::Fixed(key) => {
      let response = call(&*transport, &operation, &action, parameters, Some(key.clone())).await?;
      Ok(Completed {
        response: response.into_value(),
        key,
        adopted: false,
      })
    }

    KeyPlan::Derive { path, expected } => {
      create_and_derive(&*transport, &operation, &action, parameters, &path, expected).await
    }

    KeyPlan::LookupOrCreate {
      lookup,
      path,
      adopt,
    } => match search(&*transport, &operation, &lookup).await? {
      Some((key, found)) => {
        info!(operation = %operation, key = %key, "adopting existing resource");
        let response = match adopt {
          Adoption::Update { action, parameters } => {
            call(&*transport, &operation, &action, parameters, Some(key.clone()))
              .await?
              .into_value()
          }
          Adoption::Record => found.into_value(),
        };
        Ok(Completed {
          response,
          key,
          adopted: true,
        })
      }
      None => create_and_derive(&*transport, &operation, &action, parameters, &path, None).await,
    },

    KeyPlan::LookupOnly { lookup } => {
      let Some((key, _)) = search(&*transport, &operation, &lookup).await? else {
        info!(operation = %operation, lifecycle = %lifecycle, "lookup found nothing");
        return Err(NodeError::MissingKey);
      };
      let response = call(&*transport, &operation, &action, parameters, Some(key.clone())).await?;
      Ok(Completed {
        response: response.into_value(),
        key,
        adopted: false,
      })
    }
  }
}

async fn create_and_derive(
  transport: &dyn Transport,
  operation: &str,
  action: &str,
  parameters: serde_json::Value,
  path: &str,
  expected: Option<String>,
) -> Result<Completed, NodeError> {
  let response = call(transport, operation, action, parameters, expected.clone()).await?;
  let derived = key_at(&response, path).ok_or_else(|| NodeError::KeyDerivation {
    message: format!("response of '{}' has no key at '{}'", action, path),
  })?;

  if let Some(cached) = expected {
    if cached != derived {
      return Err(NodeError::UnstableKey { cached, derived });
    }
  }

  Ok(Completed {
    response: response.into_value(),
    key: derived,
    adopted: false,
  })
}

/// Run a lookup. `Some((key, response))` when the key path yields a value.
async fn search(
  transport: &dyn Transport,
  operation: &str,
  lookup: &PreparedLookup,
) -> Result<Option<(String, Response)>, NodeError> {
  let response = call(
    transport,
    operation,
    &lookup.action,
    lookup.parameters.clone(),
    None,
  )
  .await?;
  Ok(key_at(&response, &lookup.key_path).map(|key| (key, response)))
}

async fn call(
  transport: &dyn Transport,
  operation: &str,
  action: &str,
  parameters: serde_json::Value,
  key: Option<String>,
) -> Result<Response, NodeError> {
  info!(
    operation = %operation,
    action = %action,
    key = ?key,
    "invoking transport"
  );
  let request = Request::new(action, parameters).with_key(key);
  Ok(transport.invoke(&request).await?)
}

/// A key field as a string. Null and missing fields are no key.
fn key_at(response: &Response, path: &str) -> Option<String> {
  match response.field(path)? {
    serde_json::Value::Null => None,
    serde_json::Value::String(s) if s.is_empty() => None,
    serde_json::Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}
