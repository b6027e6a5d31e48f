use serde::{Deserialize, Serialize};

use crate::enums::{Lifecycle, LifecycleVariant};
use crate::key::KeyRule;
use crate::param::{DeferredRef, Param, Params, params_refs};

/// An external call made by a lifecycle hook other than create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
  pub action: String,
  #[serde(default)]
  pub parameters: Params,
}

impl Hook {
  pub fn new(action: impl Into<String>) -> Self {
    Self {
      action: action.into(),
      parameters: Params::new(),
    }
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
    self.parameters.insert(name.into(), value.into());
    self
  }
}

/// Declarative description of one external side-effecting operation.
///
/// `action` and `parameters` form the create call. Updates replay the create
/// call unless `on_update` is set; deletes require `on_delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDef {
  pub id: String,
  pub action: String,
  #[serde(default)]
  pub parameters: Params,
  pub key: KeyRule,
  #[serde(default)]
  pub variant: LifecycleVariant,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_update: Option<Hook>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_delete: Option<Hook>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
}

impl OperationDef {
  /// A create-update operation keyed by its own id.
  pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
    let id = id.into();
    Self {
      key: KeyRule::literal(id.clone()),
      id,
      action: action.into(),
      parameters: Params::new(),
      variant: LifecycleVariant::default(),
      on_update: None,
      on_delete: None,
      depends_on: Vec::new(),
    }
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
    self.parameters.insert(name.into(), value.into());
    self
  }

  pub fn key(mut self, key: KeyRule) -> Self {
    self.key = key;
    self
  }

  pub fn variant(mut self, variant: LifecycleVariant) -> Self {
    self.variant = variant;
    self
  }

  pub fn on_update(mut self, hook: Hook) -> Self {
    self.on_update = Some(hook);
    self
  }

  /// Set the delete hook. Also upgrades the variant to
  /// [`LifecycleVariant::CreateUpdateDelete`].
  pub fn on_delete(mut self, hook: Hook) -> Self {
    self.on_delete = Some(hook);
    self.variant = LifecycleVariant::CreateUpdateDelete;
    self
  }

  pub fn depends_on(mut self, id: impl Into<String>) -> Self {
    let id = id.into();
    if !self.depends_on.contains(&id) {
      self.depends_on.push(id);
    }
    self
  }

  /// The action and parameters to call for a lifecycle, if the operation has
  /// a hook for it.
  pub fn call_for(&self, lifecycle: Lifecycle) -> Option<(&str, &Params)> {
    match lifecycle {
      Lifecycle::Create => Some((self.action.as_str(), &self.parameters)),
      Lifecycle::Update => Some(match &self.on_update {
        Some(hook) => (hook.action.as_str(), &hook.parameters),
        None => (self.action.as_str(), &self.parameters),
      }),
      Lifecycle::Delete => self
        .on_delete
        .as_ref()
        .map(|hook| (hook.action.as_str(), &hook.parameters)),
    }
  }

  /// Every deferred reference in any hook or lookup of this operation.
  pub fn references(&self) -> Vec<&DeferredRef> {
    let mut refs = self.references_where(true);
    refs.extend(self.references_where(false));
    refs
  }

  /// Explicit dependencies followed by reference targets, without duplicates,
  /// in declaration order.
  ///
  /// Update and delete hooks may reference the operation itself to read its
  /// own earlier response; those references are not edges. A self reference
  /// in the create parameters or the lookup is kept and reported as a cycle.
  pub fn dependencies(&self) -> Vec<&str> {
    let mut deps: Vec<&str> = Vec::new();
    let explicit = self.depends_on.iter().map(String::as_str);
    let implicit = self
      .references_where(true)
      .into_iter()
      .chain(
        self
          .references_where(false)
          .into_iter()
          .filter(|r| r.operation != self.id),
      )
      .map(|r| r.operation.as_str());
    for dep in explicit.chain(implicit) {
      if !deps.contains(&dep) {
        deps.push(dep);
      }
    }
    deps
  }

  /// References of the create call and lookup (`create == true`) or of the
  /// update and delete hooks.
  fn references_where(&self, create: bool) -> Vec<&DeferredRef> {
    if create {
      let mut refs: Vec<&DeferredRef> = params_refs(&self.parameters).collect();
      if let KeyRule::FromResponse {
        lookup: Some(lookup),
        ..
      } = &self.key
      {
        refs.extend(lookup.refs());
      }
      refs
    } else {
      self
        .on_update
        .iter()
        .chain(self.on_delete.iter())
        .flat_map(|hook| params_refs(&hook.parameters))
        .collect()
    }
  }
}
