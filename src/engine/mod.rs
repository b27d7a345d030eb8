// src/engine/mod.rs

//! Orchestration engine.
//!
//! - [`oracle`] holds the replan decision contract, the deterministic
//!   fallback that is the ground truth for readiness, and the validation
//!   applied to any external oracle's answer.
//! - [`command_oracle`] is an oracle backed by an external command.
//! - [`scheduler`] drives one run: plan once, dispatch ready steps as tokio
//!   tasks, replan after every completion, abort on critical failure.
//! - [`report`] assembles the final per-run results.

pub mod command_oracle;
pub mod oracle;
pub mod report;
pub mod scheduler;

pub use command_oracle::CommandOracle;
pub use oracle::{
    deterministic_replan, validate_decision, Action, Decision, DeterministicOracle,
    ReplanOracle,
};
pub use report::RunReport;
pub use scheduler::{PipelineScheduler, SchedulerDeps, SchedulerOptions};
