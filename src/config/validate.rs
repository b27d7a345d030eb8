// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    parse_duration, PlanFile, RawPlanFile, DEFAULT_CANCEL_GRACE, DEFAULT_ORACLE_TIMEOUT,
};
use crate::errors::{Result, StagedagError};

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = StagedagError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_steps(&raw)?;
        validate_step_dependencies(&raw)?;
        validate_dag(&raw)?;
        validate_critical_set(&raw)?;

        let cancel_grace = parse_optional_duration(
            "cancel_grace",
            raw.config.cancel_grace.as_deref(),
        )?
        .unwrap_or(DEFAULT_CANCEL_GRACE);
        let oracle_timeout = parse_optional_duration(
            "oracle_timeout",
            raw.config.oracle_timeout.as_deref(),
        )?
        .unwrap_or(DEFAULT_ORACLE_TIMEOUT);

        Ok(PlanFile::new_unchecked(
            raw.config,
            raw.step,
            cancel_grace,
            oracle_timeout,
        ))
    }
}

fn ensure_has_steps(plan: &RawPlanFile) -> Result<()> {
    if plan.step.is_empty() {
        return Err(StagedagError::ConfigError(
            "plan must contain at least one [step.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_step_dependencies(plan: &RawPlanFile) -> Result<()> {
    for (name, step) in plan.step.iter() {
        for dep in step.after.iter() {
            if dep == name {
                return Err(StagedagError::ConfigError(format!(
                    "step '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !plan.step.contains_key(dep) {
                return Err(StagedagError::ConfigError(format!(
                    "step '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(plan: &RawPlanFile) -> Result<()> {
    // Edge direction: dep -> step.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in plan.step.keys() {
        graph.add_node(name.as_str());
    }

    for (name, step) in plan.step.iter() {
        for dep in step.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(StagedagError::DagCycle(format!(
            "cycle detected in step DAG involving step '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_critical_set(plan: &RawPlanFile) -> Result<()> {
    for name in plan.config.critical.iter() {
        if !plan.step.contains_key(name) {
            return Err(StagedagError::ConfigError(format!(
                "[config].critical names unknown step '{}'",
                name
            )));
        }
    }
    Ok(())
}

fn parse_optional_duration(
    key: &str,
    value: Option<&str>,
) -> Result<Option<std::time::Duration>> {
    match value {
        None => Ok(None),
        Some(s) => parse_duration(s)
            .map(Some)
            .map_err(|e| StagedagError::ConfigError(format!("[config].{key}: {e}"))),
    }
}
