//! Run report types.

use chrono::{DateTime, Utc};
use dialtone_config::Lifecycle;
use dialtone_store::{RecordState, ResultStore, SkipReason, Snapshot, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Terminal outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
  pub operation: String,
  pub state: RecordState,
  pub idempotency_key: Option<String>,
  /// Present when the operation failed.
  pub error: Option<NodeError>,
}

/// What happened to an operation at one point of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
  Started,
  Succeeded,
  Failed,
  Skipped(SkipReason),
}

/// One entry of the ordered execution trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
  pub seq: u64,
  pub operation: String,
  pub kind: TraceKind,
}

/// Result of a complete run. Produced only after every operation is terminal.
#[derive(Debug)]
pub struct RunReport {
  pub run_id: String,
  pub plan: String,
  pub lifecycle: Lifecycle,
  /// The run was cancelled before every operation could start.
  pub cancelled: bool,
  /// Outcomes in traversal order.
  pub outcomes: Vec<NodeOutcome>,
  pub trace: Vec<TraceEvent>,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
  pub(crate) store: ResultStore,
}

impl RunReport {
  /// Read a field of an operation's response after the run.
  pub fn lookup(&self, operation: &str, path: &str) -> Result<serde_json::Value, StoreError> {
    self.store.lookup(operation, path)
  }

  pub fn outcome(&self, operation: &str) -> Option<&NodeOutcome> {
    self.outcomes.iter().find(|o| o.operation == operation)
  }

  pub fn state(&self, operation: &str) -> Option<&RecordState> {
    self.outcome(operation).map(|o| &o.state)
  }

  /// No failure, no upstream skip and no cancellation. Operations skipped
  /// because they do not take part in the lifecycle, or because there was
  /// nothing to delete, do not count.
  pub fn is_success(&self) -> bool {
    !self.cancelled
      && self.outcomes.iter().all(|o| {
        matches!(
          &o.state,
          RecordState::Succeeded
            | RecordState::Skipped(SkipReason::Unsupported | SkipReason::NotProvisioned)
        )
      })
  }

  pub fn failed(&self) -> impl Iterator<Item = &NodeOutcome> {
    self
      .outcomes
      .iter()
      .filter(|o| o.state == RecordState::Failed)
  }

  /// Operation ids in the order they were started.
  pub fn started(&self) -> Vec<&str> {
    self
      .trace
      .iter()
      .filter(|e| e.kind == TraceKind::Started)
      .map(|e| e.operation.as_str())
      .collect()
  }

  /// State to persist for the next run of this plan.
  pub fn snapshot(&self) -> Snapshot {
    self.store.snapshot(&self.plan, self.lifecycle)
  }

  pub fn store(&self) -> &ResultStore {
    &self.store
  }

  /// Take the store, e.g. to resume a cancelled run.
  pub fn into_store(self) -> ResultStore {
    self.store
  }
}
