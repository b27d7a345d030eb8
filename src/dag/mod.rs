// src/dag/mod.rs

//! Dependency graph utilities.
//!
//! - [`graph`] keeps adjacency for a plan (roots, dependents, topo order).
//! - [`readiness`] is the dispatch-eligibility predicate, always evaluated
//!   against a fresh store snapshot.
//! - [`progress`] derives the run's percentage and stage label.

pub mod graph;
pub mod progress;
pub mod readiness;

pub use graph::DagGraph;
pub use progress::Progress;
pub use readiness::{is_ready, ready_steps};
