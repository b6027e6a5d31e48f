use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state of a plan: the last known response and idempotency key
/// of every operation that is currently provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub plan: String,
  #[serde(default)]
  pub responses: BTreeMap<String, serde_json::Value>,
  #[serde(default)]
  pub keys: BTreeMap<String, String>,
  pub updated_at: DateTime<Utc>,
}

impl Snapshot {
  pub fn new(plan: impl Into<String>) -> Self {
    Self {
      plan: plan.into(),
      responses: BTreeMap::new(),
      keys: BTreeMap::new(),
      updated_at: Utc::now(),
    }
  }

  pub fn response(&self, operation: &str) -> Option<&serde_json::Value> {
    self.responses.get(operation)
  }

  pub fn key(&self, operation: &str) -> Option<&str> {
    self.keys.get(operation).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.responses.is_empty() && self.keys.is_empty()
  }

  pub(crate) fn forget(&mut self, operation: &str) {
    self.responses.remove(operation);
    self.keys.remove(operation);
  }
}
