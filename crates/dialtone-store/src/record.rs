use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an operation was not executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  /// An operation this one waits on failed (directly or transitively).
  UpstreamFailed { failed: String },
  /// The operation's variant does not take part in the requested lifecycle.
  Unsupported,
  /// The run was cancelled before the operation started.
  Cancelled,
  /// Delete of an operation that no earlier run created.
  NotProvisioned,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::UpstreamFailed { failed } => write!(f, "upstream operation '{}' failed", failed),
      SkipReason::Unsupported => f.write_str("lifecycle not supported"),
      SkipReason::Cancelled => f.write_str("run cancelled"),
      SkipReason::NotProvisioned => f.write_str("never provisioned"),
    }
  }
}

/// State of one operation within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped(SkipReason),
}

impl RecordState {
  /// Whether the record has reached its final state for this run.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RecordState::Succeeded | RecordState::Failed | RecordState::Skipped(_)
    )
  }

  pub fn name(&self) -> &'static str {
    match self {
      RecordState::Pending => "pending",
      RecordState::Running => "running",
      RecordState::Succeeded => "succeeded",
      RecordState::Failed => "failed",
      RecordState::Skipped(_) => "skipped",
    }
  }
}

impl fmt::Display for RecordState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordState::Skipped(reason) => write!(f, "skipped ({})", reason),
      other => f.write_str(other.name()),
    }
  }
}

/// Outcome of one operation in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
  pub operation: String,
  pub state: RecordState,
  /// Raw response, present only once Succeeded.
  pub response: Option<serde_json::Value>,
  /// Parameters after deferred references were resolved.
  pub resolved_parameters: Option<serde_json::Value>,
  pub idempotency_key: Option<String>,
  pub error: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
  pub fn pending(operation: impl Into<String>) -> Self {
    Self {
      operation: operation.into(),
      state: RecordState::Pending,
      response: None,
      resolved_parameters: None,
      idempotency_key: None,
      error: None,
      started_at: None,
      completed_at: None,
    }
  }

  pub fn is_succeeded(&self) -> bool {
    self.state == RecordState::Succeeded
  }
}
