// src/store/mod.rs

//! Persistence contracts the scheduler needs from its environment.
//!
//! The [`StepStore`] is the single source of truth for step status and is
//! shared by the scheduler and every concurrently running step; it must be
//! safe under concurrent updates of distinct step names. The [`RunStore`]
//! is the side channel observers poll for run progress.
//!
//! [`memory`] provides in-process implementations of both.

pub mod memory;

use std::fmt::Debug;

use crate::engine::RunReport;
use crate::errors::Result;
use crate::plan::{Step, StepSpec};
use crate::types::StepStatus;

pub use memory::{MemoryRunStore, MemoryStepStore, RunRecord};

/// A status write for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub result_summary: Option<String>,
    pub error: Option<String>,
}

impl StepUpdate {
    pub fn running() -> Self {
        Self {
            status: StepStatus::Running,
            result_summary: None,
            error: None,
        }
    }

    pub fn done(summary: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Done,
            result_summary: Some(summary.into()),
            error: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            result_summary: Some(reason.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            result_summary: None,
            error: Some(error.into()),
        }
    }
}

/// Durable keyed storage for plan steps.
pub trait StepStore: Send + Sync + Debug {
    /// Persist a freshly built plan; every step starts `pending`.
    fn save_plan(&self, run_id: &str, specs: &[StepSpec]) -> Result<()>;

    /// All steps of a run, in plan order.
    fn get_all(&self, run_id: &str) -> Result<Vec<Step>>;

    /// Create-or-update a step by name. Writing the same update twice has
    /// no observable effect.
    fn upsert(&self, run_id: &str, name: &str, update: StepUpdate) -> Result<()>;
}

/// Run-level status surfaced to anything observing the run.
pub trait RunStore: Send + Sync + Debug {
    fn update_progress(&self, run_id: &str, stage: &str, pct: u8) -> Result<()>;

    fn complete(&self, run_id: &str) -> Result<()>;

    fn fail(&self, run_id: &str, reason: &str) -> Result<()>;

    /// Persist the assembled final results of a run.
    fn save_report(&self, _run_id: &str, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}
