//! Dialtone Runtime
//!
//! This crate drives a validated [`Plan`](dialtone_plan::Plan) through one
//! lifecycle phase. The [`Executor`] walks the plan in dependency order
//! (reverse order for deletes), resolves each operation's deferred references
//! from the [`ResultStore`](dialtone_store::ResultStore), works out its
//! idempotency key, calls the [`Transport`](dialtone_transport::Transport) and
//! records the outcome.
//!
//! A failed operation never aborts the run: everything waiting on it is
//! skipped, and independent branches carry on. The [`RunReport`] is produced
//! once every operation has reached a terminal state.

mod error;
mod events;
mod executor;
mod node;
mod report;
mod resolve;

pub use error::{NodeError, RuntimeError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{Executor, ExecutorConfig};
pub use report::{NodeOutcome, RunReport, TraceEvent, TraceKind};
pub use resolve::{render_key, resolve_params};
