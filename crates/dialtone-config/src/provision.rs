use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::operation::OperationDef;

/// A provisioning plan file.
///
/// `variables` are the defaults substituted into `{{name}}` placeholders of
/// the file before it is parsed; callers can override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub variables: BTreeMap<String, String>,
  pub operations: Vec<OperationDef>,
}
