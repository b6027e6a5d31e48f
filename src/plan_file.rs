use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use dialtone_config::{KeyRule, ProvisionDef};
use dialtone_plan::{Plan, submit};
use tracing::warn;

/// Parse `--var` arguments of the form `name=value`.
pub fn parse_vars(args: &[String]) -> Result<HashMap<String, String>> {
  let mut vars = HashMap::new();
  for arg in args {
    let Some((name, value)) = arg.split_once('=') else {
      bail!("invalid variable '{}': expected name=value", arg);
    };
    let name = name.trim();
    if name.is_empty() {
      bail!("invalid variable '{}': empty name", arg);
    }
    vars.insert(name.to_string(), value.to_string());
  }
  Ok(vars)
}

/// Read a JSON object of string variables.
pub fn read_vars_file(path: &Path) -> Result<HashMap<String, String>> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read vars file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse vars file: {}", path.display()))
}

/// Render a plan document and validate it.
///
/// Defaults come from the document's own `variables`; `overrides` win. The
/// defaults are read from the unrendered document, so they must not contain
/// placeholders themselves.
pub fn load(source: &str, overrides: &HashMap<String, String>) -> Result<Plan> {
  let raw: ProvisionDef = serde_json::from_str(source).context("failed to parse plan file")?;

  let mut vars: HashMap<String, String> = raw.variables.clone().into_iter().collect();
  vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

  // Key templates are rendered per operation at run time
  let key_placeholders: HashSet<String> = raw
    .operations
    .iter()
    .filter_map(|op| match &op.key {
      KeyRule::Template { template } => Some(dialtone_template::placeholders(template)),
      _ => None,
    })
    .flatten()
    .collect();

  let rendered = dialtone_template::render_json(source, &vars);
  let unresolved: Vec<&String> = rendered
    .unresolved
    .iter()
    .filter(|name| !key_placeholders.contains(*name))
    .collect();
  if !unresolved.is_empty() {
    warn!(
      plan = %raw.name,
      unresolved = ?unresolved,
      "plan file has placeholders without a value"
    );
  }

  let def: ProvisionDef =
    serde_json::from_str(&rendered.output).context("failed to parse rendered plan file")?;
  let plan = submit(def.operations)
    .with_context(|| format!("invalid plan '{}'", def.name))?
    .with_name(def.name);
  Ok(plan)
}

pub fn load_file(path: &Path, overrides: &HashMap<String, String>) -> Result<Plan> {
  let source = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read plan file: {}", path.display()))?;
  load(&source, overrides).with_context(|| format!("failed to load {}", path.display()))
}
