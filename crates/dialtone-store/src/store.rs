use std::collections::HashMap;

use chrono::Utc;
use dialtone_config::{FieldPath, Lifecycle};
use tracing::debug;

use crate::error::StoreError;
use crate::record::{ExecutionRecord, RecordState, SkipReason};
use crate::snapshot::Snapshot;

/// Results of one provisioning run, keyed by operation id.
///
/// Records only move forward (`Pending -> Running -> Succeeded | Failed`, or
/// `Pending -> Skipped`). An optional prior [`Snapshot`] answers lookups for
/// operations that have not produced an outcome in this run.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
  records: HashMap<String, ExecutionRecord>,
  /// Registration order, for stable iteration.
  order: Vec<String>,
  prior: Option<Snapshot>,
}

impl ResultStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A store that falls back to a previous run's responses and keys.
  pub fn with_prior(prior: Snapshot) -> Self {
    Self {
      prior: Some(prior),
      ..Self::default()
    }
  }

  pub fn prior(&self) -> Option<&Snapshot> {
    self.prior.as_ref()
  }

  /// Add a Pending record for an operation. Existing records are kept.
  pub fn register(&mut self, operation: &str) {
    if !self.records.contains_key(operation) {
      self
        .records
        .insert(operation.to_string(), ExecutionRecord::pending(operation));
      self.order.push(operation.to_string());
    }
  }

  /// Reset every record that did not succeed back to Pending, so a resumed
  /// run retries failures and skips while keeping successes.
  pub fn reset_unfinished(&mut self) -> usize {
    let mut reset = 0;
    for record in self.records.values_mut() {
      if !record.is_succeeded() && record.state != RecordState::Pending {
        *record = ExecutionRecord::pending(record.operation.clone());
        reset += 1;
      }
    }
    if reset > 0 {
      debug!(reset, "reset unfinished records");
    }
    reset
  }

  /// `Pending -> Running`.
  pub fn begin(
    &mut self,
    operation: &str,
    resolved_parameters: Option<serde_json::Value>,
    idempotency_key: Option<String>,
  ) -> Result<(), StoreError> {
    let record = self.transition(operation, RecordState::Running)?;
    record.resolved_parameters = resolved_parameters;
    record.idempotency_key = idempotency_key;
    record.started_at = Some(Utc::now());
    Ok(())
  }

  /// `Running -> Succeeded`. A key known only after the call replaces the one
  /// recorded at start.
  pub fn succeed(
    &mut self,
    operation: &str,
    response: serde_json::Value,
    idempotency_key: Option<String>,
  ) -> Result<(), StoreError> {
    let record = self.transition(operation, RecordState::Succeeded)?;
    record.response = Some(response);
    if idempotency_key.is_some() {
      record.idempotency_key = idempotency_key;
    }
    record.completed_at = Some(Utc::now());
    Ok(())
  }

  /// `Running -> Failed`.
  pub fn fail(&mut self, operation: &str, error: impl Into<String>) -> Result<(), StoreError> {
    let record = self.transition(operation, RecordState::Failed)?;
    record.error = Some(error.into());
    record.completed_at = Some(Utc::now());
    Ok(())
  }

  /// `Pending -> Skipped`.
  pub fn skip(&mut self, operation: &str, reason: SkipReason) -> Result<(), StoreError> {
    let message = reason.to_string();
    let record = self.transition(operation, RecordState::Skipped(reason))?;
    record.error = Some(message);
    record.completed_at = Some(Utc::now());
    Ok(())
  }

  fn transition(
    &mut self,
    operation: &str,
    to: RecordState,
  ) -> Result<&mut ExecutionRecord, StoreError> {
    let record = self
      .records
      .get_mut(operation)
      .ok_or_else(|| StoreError::UnknownOperation(operation.to_string()))?;

    let allowed = matches!(
      (&record.state, &to),
      (RecordState::Pending, RecordState::Running)
        | (RecordState::Pending, RecordState::Skipped(_))
        | (RecordState::Running, RecordState::Succeeded)
        | (RecordState::Running, RecordState::Failed)
    );
    if !allowed {
      return Err(StoreError::InvalidTransition {
        operation: operation.to_string(),
        from: record.state.name().to_string(),
        to: to.name().to_string(),
      });
    }

    record.state = to;
    Ok(record)
  }

  /// Read a field of an operation's response.
  ///
  /// A Succeeded record in this run is authoritative. A Failed record is
  /// never masked by the prior snapshot. Otherwise the prior snapshot is
  /// consulted.
  pub fn lookup(&self, operation: &str, path: &str) -> Result<serde_json::Value, StoreError> {
    let response = match self.records.get(operation) {
      Some(record) if record.is_succeeded() => record.response.as_ref(),
      Some(record) if record.state == RecordState::Failed => None,
      _ => self.prior.as_ref().and_then(|p| p.response(operation)),
    };

    let Some(response) = response else {
      return Err(StoreError::NotSucceeded {
        operation: operation.to_string(),
        state: self.state_name(operation),
      });
    };

    FieldPath::parse(path)
      .lookup(response)
      .cloned()
      .ok_or_else(|| StoreError::FieldNotFound {
        operation: operation.to_string(),
        path: path.to_string(),
      })
  }

  /// The operation's response from this run, or the prior snapshot.
  pub fn response(&self, operation: &str) -> Option<&serde_json::Value> {
    match self.records.get(operation) {
      Some(record) if record.is_succeeded() => record.response.as_ref(),
      _ => self.prior.as_ref().and_then(|p| p.response(operation)),
    }
  }

  /// The idempotency key of the operation's last successful call, from this
  /// run or the prior snapshot.
  pub fn cached_key(&self, operation: &str) -> Option<&str> {
    match self.records.get(operation) {
      Some(record) if record.is_succeeded() && record.idempotency_key.is_some() => {
        record.idempotency_key.as_deref()
      }
      _ => self.prior.as_ref().and_then(|p| p.key(operation)),
    }
  }

  pub fn record(&self, operation: &str) -> Option<&ExecutionRecord> {
    self.records.get(operation)
  }

  pub fn state(&self, operation: &str) -> Option<&RecordState> {
    self.records.get(operation).map(|r| &r.state)
  }

  /// Records in registration order.
  pub fn records(&self) -> impl Iterator<Item = &ExecutionRecord> {
    self.order.iter().filter_map(|id| self.records.get(id))
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// The state to persist after a run of `lifecycle`: successful results
  /// merged over the prior snapshot, or removed from it for deletes.
  pub fn snapshot(&self, plan: &str, lifecycle: Lifecycle) -> Snapshot {
    let mut snapshot = match &self.prior {
      Some(prior) => Snapshot {
        plan: plan.to_string(),
        ..prior.clone()
      },
      None => Snapshot::new(plan),
    };

    for record in self.records().filter(|r| r.is_succeeded()) {
      match lifecycle {
        Lifecycle::Create | Lifecycle::Update => {
          if let Some(response) = &record.response {
            snapshot
              .responses
              .insert(record.operation.clone(), response.clone());
          }
          if let Some(key) = &record.idempotency_key {
            snapshot.keys.insert(record.operation.clone(), key.clone());
          }
        }
        Lifecycle::Delete => snapshot.forget(&record.operation),
      }
    }

    snapshot.updated_at = Utc::now();
    snapshot
  }

  fn state_name(&self, operation: &str) -> String {
    self
      .records
      .get(operation)
      .map(|r| r.state.name().to_string())
      .unwrap_or_else(|| "absent".to_string())
  }
}
