// src/plan/mod.rs

//! Plan data model and plan builders.
//!
//! A [`PlanBuilder`] is consulted exactly once per run and yields the
//! ordered set of [`StepSpec`]s. The specs are persisted through the step
//! store, which turns each into a [`Step`] record carrying live status.

pub mod file;

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::{BoxFuture, StepName, StepStatus};

pub use file::FilePlanBuilder;

/// Opaque parameters handed verbatim to a step handler.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// One node of the plan as produced by a [`PlanBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: StepName,
    /// Display ordering hint only.
    #[serde(default)]
    pub order: i64,
    /// Tag used to resolve a handler when none is registered under `name`.
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<StepName>,
    /// Human readable stage label shown while this step runs.
    #[serde(default)]
    pub label: Option<String>,
}

impl StepSpec {
    pub fn new(name: impl Into<StepName>) -> Self {
        Self {
            name: name.into(),
            order: 0,
            agent: String::new(),
            params: Params::new(),
            depends_on: Vec::new(),
            label: None,
        }
    }
}

/// A stored plan step: the spec plus its live status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: StepName,
    pub order: i64,
    pub agent: String,
    pub params: Params,
    pub depends_on: Vec<StepName>,
    pub label: Option<String>,
    pub status: StepStatus,
    pub result_summary: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Fresh `pending` record for a planned step.
    pub fn from_spec(spec: StepSpec) -> Self {
        Self {
            name: spec.name,
            order: spec.order,
            agent: spec.agent,
            params: spec.params,
            depends_on: spec.depends_on,
            label: spec.label,
            status: StepStatus::Pending,
            result_summary: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Label to show while this step is running.
    pub fn stage_label(&self) -> String {
        match self.label {
            Some(ref label) => label.clone(),
            None => format!("Running {}...", self.name),
        }
    }
}

/// Produces the initial plan for a run.
pub trait PlanBuilder: Send + Sync + Debug {
    fn build<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<Vec<StepSpec>>>;
}

/// Plan builder returning a fixed list of steps.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanBuilder {
    steps: Vec<StepSpec>,
}

impl StaticPlanBuilder {
    pub fn new(steps: Vec<StepSpec>) -> Self {
        Self { steps }
    }
}

impl PlanBuilder for StaticPlanBuilder {
    fn build<'a>(&'a self, _run_id: &'a str) -> BoxFuture<'a, Result<Vec<StepSpec>>> {
        let steps = self.steps.clone();
        Box::pin(async move { Ok(steps) })
    }
}
