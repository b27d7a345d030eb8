// src/plan/file.rs

//! Plan builder backed by a validated plan file.

use tracing::debug;

use crate::config::PlanFile;
use crate::errors::Result;
use crate::plan::{PlanBuilder, StepSpec};
use crate::types::BoxFuture;

/// Yields the steps declared in a `Pipeline.toml`.
#[derive(Debug, Clone)]
pub struct FilePlanBuilder {
    specs: Vec<StepSpec>,
}

impl FilePlanBuilder {
    pub fn new(plan: &PlanFile) -> Self {
        Self {
            specs: plan.step_specs(),
        }
    }
}

impl PlanBuilder for FilePlanBuilder {
    fn build<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<Vec<StepSpec>>> {
        Box::pin(async move {
            debug!(run_id, steps = self.specs.len(), "building plan from file");
            Ok(self.specs.clone())
        })
    }
}
