//! Dialtone Store
//!
//! This crate holds the results of a provisioning run and the state carried
//! between runs.
//!
//! - [`ResultStore`] maps operation ids to [`ExecutionRecord`]s for one run and
//!   answers field-path lookups used to resolve deferred references.
//! - [`Snapshot`] is the persisted outcome of a run: the last known response
//!   and idempotency key of every provisioned operation.
//! - [`StateStore`] loads and saves snapshots, in memory
//!   ([`MemoryStateStore`]) or as JSON files ([`FsStateStore`]).

mod error;
mod record;
mod snapshot;
mod state;
mod store;

pub use error::StoreError;
pub use record::{ExecutionRecord, RecordState, SkipReason};
pub use snapshot::Snapshot;
pub use state::{FsStateStore, MemoryStateStore, StateStore};
pub use store::ResultStore;
