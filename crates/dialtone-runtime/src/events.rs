//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run so consumers can observe progress, stream
//! it to a terminal, or persist it.

use dialtone_config::Lifecycle;
use dialtone_store::SkipReason;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  RunStarted {
    run_id: String,
    plan: String,
    lifecycle: Lifecycle,
  },

  /// An operation was handed to the transport.
  NodeStarted {
    run_id: String,
    operation: String,
    action: String,
  },

  NodeSucceeded {
    run_id: String,
    operation: String,
    idempotency_key: String,
  },

  NodeFailed {
    run_id: String,
    operation: String,
    error: String,
  },

  NodeSkipped {
    run_id: String,
    operation: String,
    reason: SkipReason,
  },

  /// Every operation has reached a terminal state.
  RunCompleted {
    run_id: String,
    success: bool,
    cancelled: bool,
  },
}

/// Trait for receiving execution events.
///
/// The executor calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the run; volume is a handful of
  // events per operation.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
