use dialtone_config::Lifecycle;
use thiserror::Error;

/// Errors that reject a plan before anything is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
  /// The dependency graph contains a cycle. Members are listed in dependency
  /// order: each member depends on the next, and the last on the first.
  #[error("dependency cycle detected: {}", members.join(" -> "))]
  Cycle { members: Vec<String> },

  /// A dependency or deferred reference names an operation that was not
  /// submitted.
  #[error("operation '{operation}' depends on unknown operation '{missing}'")]
  DanglingDependency { operation: String, missing: String },

  #[error("duplicate operation id: {0}")]
  DuplicateOperation(String),

  /// The operation supports delete but has no delete hook.
  #[error("operation '{0}' supports delete but has no delete hook")]
  MissingDeleteHook(String),

  /// The operation has a hook for a lifecycle its variant never runs.
  #[error("operation '{operation}' has a hook for {lifecycle}, which its variant never runs")]
  UnusedHook {
    operation: String,
    lifecycle: Lifecycle,
  },
}
