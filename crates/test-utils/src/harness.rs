#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stagedag::engine::{
    PipelineScheduler, ReplanOracle, RunReport, SchedulerDeps, SchedulerOptions,
};
use stagedag::errors::Result;
use stagedag::exec::{HandlerRegistry, StepExecutor, StepHandler};
use stagedag::plan::{Step, StaticPlanBuilder, StepSpec};
use stagedag::store::{MemoryStepStore, StepStore};

use crate::recording_store::RecordingRunStore;
use crate::with_timeout;

/// Wires a scheduler over in-memory stores for one run.
pub struct Harness {
    pub run_id: String,
    pub step_store: Arc<MemoryStepStore>,
    pub run_store: Arc<RecordingRunStore>,
    registry: HandlerRegistry,
    critical: Vec<String>,
    oracle: Option<Arc<dyn ReplanOracle>>,
    options: SchedulerOptions,
}

impl Harness {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_store: Arc::new(MemoryStepStore::new()),
            run_store: Arc::new(RecordingRunStore::new(run_id)),
            registry: HandlerRegistry::new(),
            critical: Vec::new(),
            oracle: None,
            options: SchedulerOptions {
                cancel_grace: Duration::from_millis(500),
            },
        }
    }

    /// Register a handler under a step name or agent tag.
    pub fn handler(mut self, key: &str, handler: Arc<dyn StepHandler>) -> Self {
        self.registry.register(key, handler);
        self
    }

    pub fn critical(mut self, name: &str) -> Self {
        self.critical.push(name.to_string());
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn ReplanOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.options.cancel_grace = grace;
        self
    }

    pub fn scheduler(&self, specs: Vec<StepSpec>) -> PipelineScheduler {
        let executor = StepExecutor::new(
            self.step_store.clone(),
            self.registry.clone(),
            self.critical.iter().cloned(),
        );
        let deps = SchedulerDeps {
            plan_builder: Arc::new(StaticPlanBuilder::new(specs)),
            step_store: self.step_store.clone(),
            run_store: self.run_store.clone(),
            oracle: self.oracle.clone(),
            executor,
        };
        PipelineScheduler::new(self.run_id.clone(), deps, self.options.clone())
    }

    /// Run the plan to completion under the test timeout.
    pub async fn run(&self, specs: Vec<StepSpec>) -> Result<RunReport> {
        with_timeout(self.scheduler(specs).start()).await
    }

    pub fn steps(&self) -> Vec<Step> {
        self.step_store.get_all(&self.run_id).unwrap_or_default()
    }

    pub fn step(&self, name: &str) -> Option<Step> {
        self.step_store.get(&self.run_id, name)
    }
}
