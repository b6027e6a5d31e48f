//! Dialtone Plan
//!
//! This crate turns a set of [`OperationDef`](dialtone_config::OperationDef)s
//! into an ordered, validated [`Plan`]. Planning is pure: it performs no
//! external calls, so a malformed plan is rejected before any side effect.
//!
//! Validation performed by [`submit`]:
//! - Operation ids are unique
//! - Every dependency and every deferred-reference target exists
//! - Operations that support delete have a delete hook
//! - The dependency graph is acyclic (the offending cycle is reported)
//!
//! The resulting order is topological, with ties between independent
//! operations broken by submission order.

mod error;
mod graph;
mod plan;

pub use error::PlanError;
pub use graph::Graph;
pub use plan::{Direction, Plan, submit};
