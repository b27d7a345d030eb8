#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::Value;
use stagedag::config::{ConfigSection, PlanFile, RawPlanFile, StepConfig};
use stagedag::plan::StepSpec;

/// Shorthand for a `command`-less step spec with the given dependencies.
pub fn spec(name: &str, after: &[&str]) -> StepSpec {
    let mut builder = StepSpecBuilder::new(name);
    for dep in after {
        builder = builder.after(dep);
    }
    builder.build()
}

/// Builder for `StepSpec`.
pub struct StepSpecBuilder {
    spec: StepSpec,
}

impl StepSpecBuilder {
    pub fn new(name: &str) -> Self {
        let mut spec = StepSpec::new(name);
        spec.agent = "test".to_string();
        Self { spec }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.spec.depends_on.push(dep.to_string());
        self
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.spec.agent = agent.to_string();
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.spec.label = Some(label.to_string());
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.spec.order = order;
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.spec.params.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> StepSpec {
        self.spec
    }
}

/// Builder for a validated `PlanFile`.
pub struct PlanFileBuilder {
    raw: RawPlanFile,
}

impl PlanFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawPlanFile {
                config: ConfigSection::default(),
                step: BTreeMap::new(),
            },
        }
    }

    pub fn with_step(mut self, name: &str, step: StepConfig) -> Self {
        self.raw.step.insert(name.to_string(), step);
        self
    }

    pub fn critical(mut self, name: &str) -> Self {
        self.raw.config.critical.push(name.to_string());
        self
    }

    pub fn skip_exit_code(mut self, code: i32) -> Self {
        self.raw.config.skip_exit_code = Some(code);
        self
    }

    pub fn cancel_grace(mut self, grace: &str) -> Self {
        self.raw.config.cancel_grace = Some(grace.to_string());
        self
    }

    pub fn raw(self) -> RawPlanFile {
        self.raw
    }

    pub fn build(self) -> PlanFile {
        PlanFile::try_from(self.raw).expect("Failed to build valid plan from builder")
    }
}

impl Default for PlanFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `command` step's `StepConfig`.
pub struct StepConfigBuilder {
    step: StepConfig,
}

impl StepConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        let mut params = serde_json::Map::new();
        params.insert("cmd".to_string(), Value::String(cmd.to_string()));
        Self {
            step: StepConfig {
                order: 0,
                agent: "command".to_string(),
                label: None,
                after: vec![],
                params,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.step.after.push(dep.to_string());
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.step.order = order;
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.step.label = Some(label.to_string());
        self
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.step.agent = agent.to_string();
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}
