//! Dialtone Config
//!
//! This crate contains the serializable operation and plan definitions for
//! Dialtone. A plan is a set of [`OperationDef`]s, each describing one external
//! side-effecting call, how its idempotency key is derived, which lifecycle
//! hooks it supports and which other operations it depends on.
//!
//! Plans can be loaded from:
//! - JSON plan files (via CLI with `dialtone apply plan.json`)
//! - Code, using the [`OperationDef`] builder methods
//!
//! The planner takes these definitions, validates the dependency graph and
//! produces an ordered plan for the executor.

mod enums;
mod key;
mod operation;
mod param;
mod path;
mod provision;

pub use enums::{Lifecycle, LifecycleVariant, RetryBackoff};
pub use key::{KeyRule, Lookup};
pub use operation::{Hook, OperationDef};
pub use param::{DeferredRef, Param, Params};
pub use path::{FieldPath, PathSegment};
pub use provision::ProvisionDef;
