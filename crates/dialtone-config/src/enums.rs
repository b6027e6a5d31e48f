use std::fmt;

use serde::{Deserialize, Serialize};

/// A requested lifecycle phase for a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
  Create,
  Update,
  Delete,
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Lifecycle::Create => f.write_str("create"),
      Lifecycle::Update => f.write_str("update"),
      Lifecycle::Delete => f.write_str("delete"),
    }
  }
}

/// Which lifecycle hooks an operation supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleVariant {
  CreateOnly,
  #[default]
  CreateUpdate,
  CreateUpdateDelete,
}

impl LifecycleVariant {
  /// Whether an operation of this variant takes part in the given lifecycle.
  pub fn supports(self, lifecycle: Lifecycle) -> bool {
    match lifecycle {
      Lifecycle::Create => true,
      Lifecycle::Update => !matches!(self, LifecycleVariant::CreateOnly),
      Lifecycle::Delete => matches!(self, LifecycleVariant::CreateUpdateDelete),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  #[default]
  Exponential,
}
