// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::plan::{Params, StepSpec};

/// Default grace period granted to cancelled steps when a run aborts.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Default upper bound for one external oracle call.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Plan file exactly as deserialised from TOML, before validation.
///
/// ```toml
/// [config]
/// critical = ["fetch"]
/// cancel_grace = "2s"
///
/// [step.fetch]
/// agent = "command"
/// params = { cmd = "./fetch.sh" }
///
/// [step.report]
/// agent = "command"
/// after = ["fetch"]
/// params = { cmd = "./report.sh" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlanFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All steps from `[step.<name>]`, keyed by step name.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// Steps whose handler failure aborts the whole run.
    #[serde(default)]
    pub critical: Vec<String>,

    /// Grace period for in-flight steps on abort, e.g. `"500ms"`.
    #[serde(default)]
    pub cancel_grace: Option<String>,

    /// Exit code that command steps use to report "nothing to do".
    #[serde(default)]
    pub skip_exit_code: Option<i32>,

    /// External replan oracle command.
    #[serde(default)]
    pub oracle_cmd: Option<String>,

    /// Timeout for one oracle call, e.g. `"10s"`.
    #[serde(default)]
    pub oracle_timeout: Option<String>,
}

/// `[step.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub order: i64,

    /// Handler tag; defaults to `"command"`.
    #[serde(default = "default_agent")]
    pub agent: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Dependency list: this step waits for every step listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub params: Params,
}

fn default_agent() -> String {
    "command".to_string()
}

/// A validated plan file.
///
/// Only constructed through `TryFrom<RawPlanFile>`, so every dependency is
/// known, the graph is acyclic and durations are parsed.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub config: ConfigSection,
    pub step: BTreeMap<String, StepConfig>,
    cancel_grace: Duration,
    oracle_timeout: Duration,
}

impl PlanFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        step: BTreeMap<String, StepConfig>,
        cancel_grace: Duration,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            config,
            step,
            cancel_grace,
            oracle_timeout,
        }
    }

    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    pub fn oracle_timeout(&self) -> Duration {
        self.oracle_timeout
    }

    /// Step specs ordered by `order`, then by name.
    pub fn step_specs(&self) -> Vec<StepSpec> {
        let mut specs: Vec<StepSpec> = self
            .step
            .iter()
            .map(|(name, sc)| StepSpec {
                name: name.clone(),
                order: sc.order,
                agent: sc.agent.clone(),
                params: sc.params.clone(),
                depends_on: sc.after.clone(),
                label: sc.label.clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        specs
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", s))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60),
        "h" => secs(60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
