//! Lifecycle executor.
//!
//! The [`Executor`] is the main entry point for running a plan. It owns a
//! transport and an event notifier, and provides `run(plan, lifecycle,
//! cancel)` to drive every operation of the plan to a terminal state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dialtone_config::{Lifecycle, OperationDef};
use dialtone_plan::{Direction, Plan};
use dialtone_store::{RecordState, ResultStore, SkipReason};
use dialtone_transport::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{NodeError, RuntimeError};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::node::{self, Completed, Preparation, PreparedNode};
use crate::report::{NodeOutcome, RunReport, TraceEvent, TraceKind};

/// Handle for a spawned operation task.
type NodeHandle = tokio::task::JoinHandle<Result<Completed, NodeError>>;

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Most operations in flight at once. `1` runs the plan strictly in order.
  pub max_parallel: usize,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self { max_parallel: 4 }
  }
}

/// Drives a plan through one lifecycle phase.
///
/// Create and update walk the plan forward; delete walks it in reverse, so an
/// operation is torn down only after everything that depends on it.
pub struct Executor {
  transport: Arc<dyn Transport>,
  notifier: Arc<dyn ExecutionNotifier>,
  config: ExecutorConfig,
}

impl Executor {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      notifier: Arc::new(NoopNotifier),
      config: ExecutorConfig::default(),
    }
  }

  pub fn with_config(mut self, config: ExecutorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Run a plan with a fresh result store.
  pub async fn run(
    &self,
    plan: &Plan,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
  ) -> Result<RunReport, RuntimeError> {
    self
      .run_with_store(plan, lifecycle, ResultStore::new(), cancel)
      .await
  }

  /// Run a plan against an existing store.
  ///
  /// The store may carry a prior snapshot (responses and keys of earlier
  /// runs) or the records of an interrupted run. Operations that already
  /// succeeded in it are not executed again; everything else is retried.
  #[instrument(
    name = "executor_run",
    skip(self, plan, store, cancel),
    fields(
      plan = %plan.name(),
      lifecycle = %lifecycle,
    )
  )]
  pub async fn run_with_store(
    &self,
    plan: &Plan,
    lifecycle: Lifecycle,
    mut store: ResultStore,
    cancel: CancellationToken,
  ) -> Result<RunReport, RuntimeError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();

    info!(
      run_id = %run_id,
      operations = plan.len(),
      "run_started"
    );
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      plan: plan.name().to_string(),
      lifecycle,
    });

    store.reset_unfinished();
    for op in plan.operations() {
      store.register(&op.id);
    }

    let done: HashSet<String> = plan
      .operations()
      .iter()
      .filter(|op| store.state(&op.id) == Some(&RecordState::Succeeded))
      .map(|op| op.id.clone())
      .collect();
    if !done.is_empty() {
      info!(run_id = %run_id, already_succeeded = done.len(), "resuming run");
    }

    let mut run = Run {
      run_id,
      lifecycle,
      direction: Direction::from(lifecycle),
      store,
      done,
      errors: HashMap::new(),
      trace: Vec::new(),
      notifier: self.notifier.clone(),
    };

    let cancelled = self.run_execution_loop(plan, &mut run, &cancel).await?;

    if cancelled {
      for id in run.traversal_order(plan) {
        if run.store.state(&id) == Some(&RecordState::Pending) {
          run.skip(&id, SkipReason::Cancelled)?;
        }
      }
    }

    let outcomes = run
      .traversal_order(plan)
      .into_iter()
      .filter_map(|id| {
        let record = run.store.record(&id)?;
        Some(NodeOutcome {
          state: record.state.clone(),
          idempotency_key: record.idempotency_key.clone(),
          error: run.errors.remove(&id),
          operation: id,
        })
      })
      .collect();

    let report = RunReport {
      run_id: run.run_id.clone(),
      plan: plan.name().to_string(),
      lifecycle,
      cancelled,
      outcomes,
      trace: run.trace,
      started_at,
      completed_at: Utc::now(),
      store: run.store,
    };

    let success = report.is_success();
    if success {
      info!(run_id = %report.run_id, "run_completed");
    } else {
      warn!(
        run_id = %report.run_id,
        cancelled,
        failed = report.failed().count(),
        "run_completed_with_errors"
      );
    }
    self.notifier.notify(ExecutionEvent::RunCompleted {
      run_id: report.run_id.clone(),
      success,
      cancelled,
    });

    Ok(report)
  }

  /// Execute batches of ready operations until none are left. Returns whether
  /// the run was cancelled.
  async fn run_execution_loop(
    &self,
    plan: &Plan,
    run: &mut Run,
    cancel: &CancellationToken,
  ) -> Result<bool, RuntimeError> {
    let max_parallel = self.config.max_parallel.max(1);

    loop {
      if cancel.is_cancelled() {
        warn!(run_id = %run.run_id, "run cancelled");
        return Ok(true);
      }

      let ready: Vec<Arc<OperationDef>> = plan
        .ready(run.direction, &run.done)
        .into_iter()
        .cloned()
        .collect();
      if ready.is_empty() {
        return Ok(false);
      }

      let mut batch: Vec<PreparedNode> = Vec::new();
      for op in &ready {
        if batch.len() >= max_parallel {
          break;
        }
        if let Some(node) = run.admit(plan, op)? {
          batch.push(node);
        }
      }
      if batch.is_empty() {
        // Everything ready was settled without a call
        continue;
      }

      let ids: Vec<String> = batch.iter().map(|n| n.operation.clone()).collect();
      info!(
        run_id = %run.run_id,
        ready_operations = ?ids,
        "executing batch of ready operations"
      );

      let mut handles: Vec<NodeHandle> = Vec::with_capacity(batch.len());
      for node in batch {
        run.start(&node)?;
        handles.push(tokio::spawn(node::execute(self.transport.clone(), node)));
      }

      // In-flight calls always complete, even when cancelled meanwhile
      let results = futures::future::join_all(handles).await;

      for (id, result) in ids.into_iter().zip(results) {
        // A panic fails only its own operation
        let outcome = result.unwrap_or_else(|e| {
          Err(NodeError::Panicked {
            message: e.to_string(),
          })
        });
        match outcome {
          Ok(completed) => run.succeed(&id, completed)?,
          Err(e) => run.fail(&id, e)?,
        }
      }
    }
  }
}

/// Mutable state of one run.
struct Run {
  run_id: String,
  lifecycle: Lifecycle,
  direction: Direction,
  store: ResultStore,
  /// Operations in a terminal state.
  done: HashSet<String>,
  errors: HashMap<String, NodeError>,
  trace: Vec<TraceEvent>,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl Run {
  fn traversal_order(&self, plan: &Plan) -> Vec<String> {
    let order = match self.direction {
      Direction::Forward => plan.order(),
      Direction::Reverse => plan.reverse_order(),
    };
    order.into_iter().map(str::to_string).collect()
  }

  /// Decide what to do with a ready operation. Returns the prepared node if
  /// it needs a transport call; otherwise records its terminal state.
  fn admit(
    &mut self,
    plan: &Plan,
    op: &OperationDef,
  ) -> Result<Option<PreparedNode>, RuntimeError> {
    if !op.variant.supports(self.lifecycle) {
      self.skip(&op.id, SkipReason::Unsupported)?;
      return Ok(None);
    }

    if let Some(failed) = self.failed_prerequisite(plan, &op.id) {
      self.skip(&op.id, SkipReason::UpstreamFailed { failed })?;
      return Ok(None);
    }

    match node::prepare(op, self.lifecycle, &self.store) {
      Ok(Preparation::Ready(node)) => Ok(Some(node)),
      Ok(Preparation::NoHook) => {
        self.skip(&op.id, SkipReason::Unsupported)?;
        Ok(None)
      }
      Ok(Preparation::NotProvisioned) => {
        self.skip(&op.id, SkipReason::NotProvisioned)?;
        Ok(None)
      }
      Err(e) => {
        // Never reached the transport
        self.store.begin(&op.id, None, None)?;
        self.fail(&op.id, e)?;
        Ok(None)
      }
    }
  }

  /// The failed operation this one transitively waits on, if any.
  fn failed_prerequisite(&self, plan: &Plan, id: &str) -> Option<String> {
    plan
      .prerequisites(id, self.direction)
      .iter()
      .find_map(|p| match self.store.state(p) {
        Some(RecordState::Failed) => Some(p.clone()),
        Some(RecordState::Skipped(SkipReason::UpstreamFailed { failed })) => Some(failed.clone()),
        _ => None,
      })
  }

  fn start(&mut self, node: &PreparedNode) -> Result<(), RuntimeError> {
    self.store.begin(
      &node.operation,
      Some(node.parameters.clone()),
      node.known_key(),
    )?;

    info!(
      run_id = %self.run_id,
      operation = %node.operation,
      action = %node.action,
      parameters = %node.parameters,
      "operation_started"
    );
    self.push_trace(&node.operation, TraceKind::Started);
    self.notifier.notify(ExecutionEvent::NodeStarted {
      run_id: self.run_id.clone(),
      operation: node.operation.clone(),
      action: node.action.clone(),
    });
    Ok(())
  }

  fn succeed(&mut self, id: &str, completed: Completed) -> Result<(), RuntimeError> {
    self
      .store
      .succeed(id, completed.response, Some(completed.key.clone()))?;

    info!(
      run_id = %self.run_id,
      operation = %id,
      key = %completed.key,
      adopted = completed.adopted,
      "operation_succeeded"
    );
    self.push_trace(id, TraceKind::Succeeded);
    self.notifier.notify(ExecutionEvent::NodeSucceeded {
      run_id: self.run_id.clone(),
      operation: id.to_string(),
      idempotency_key: completed.key,
    });
    self.done.insert(id.to_string());
    Ok(())
  }

  fn fail(&mut self, id: &str, e: NodeError) -> Result<(), RuntimeError> {
    self.store.fail(id, e.to_string())?;

    error!(
      run_id = %self.run_id,
      operation = %id,
      error = %e,
      "operation_failed"
    );
    self.push_trace(id, TraceKind::Failed);
    self.notifier.notify(ExecutionEvent::NodeFailed {
      run_id: self.run_id.clone(),
      operation: id.to_string(),
      error: e.to_string(),
    });
    self.errors.insert(id.to_string(), e);
    self.done.insert(id.to_string());
    Ok(())
  }

  fn skip(&mut self, id: &str, reason: SkipReason) -> Result<(), RuntimeError> {
    self.store.skip(id, reason.clone())?;

    info!(
      run_id = %self.run_id,
      operation = %id,
      reason = %reason,
      "operation_skipped"
    );
    self.push_trace(id, TraceKind::Skipped(reason.clone()));
    self.notifier.notify(ExecutionEvent::NodeSkipped {
      run_id: self.run_id.clone(),
      operation: id.to_string(),
      reason,
    });
    self.done.insert(id.to_string());
    Ok(())
  }

  fn push_trace(&mut self, operation: &str, kind: TraceKind) {
    self.trace.push(TraceEvent {
      seq: self.trace.len() as u64,
      operation: operation.to_string(),
      kind,
    });
  }
}
