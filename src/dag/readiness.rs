// src/dag/readiness.rs

//! Dispatch-eligibility predicate.
//!
//! A step is ready iff it is `pending` and every name in `depends_on` is
//! currently `done` or `skipped` in the same snapshot. Callers must pass a
//! fresh snapshot every time: sibling steps update the store concurrently.

use std::collections::HashMap;

use tracing::warn;

use crate::plan::Step;
use crate::types::StepStatus;

/// Whether `step` may be dispatched given `snapshot`.
pub fn is_ready(step: &Step, snapshot: &[Step]) -> bool {
    let statuses = status_index(snapshot);
    is_ready_in(step, &statuses)
}

/// Names of every ready step in `snapshot`, in snapshot order.
pub fn ready_steps(snapshot: &[Step]) -> Vec<String> {
    let statuses = status_index(snapshot);
    snapshot
        .iter()
        .filter(|step| is_ready_in(step, &statuses))
        .map(|step| step.name.clone())
        .collect()
}

fn status_index(snapshot: &[Step]) -> HashMap<&str, StepStatus> {
    snapshot
        .iter()
        .map(|s| (s.name.as_str(), s.status))
        .collect()
}

fn is_ready_in(step: &Step, statuses: &HashMap<&str, StepStatus>) -> bool {
    if step.status != StepStatus::Pending {
        return false;
    }

    for dep in step.depends_on.iter() {
        match statuses.get(dep.as_str()) {
            Some(status) if status.satisfies_dependents() => {}
            Some(_) => return false,
            None => {
                warn!(
                    step = %step.name,
                    dep = %dep,
                    "dependency missing from plan; treating as unsatisfied"
                );
                return false;
            }
        }
    }

    true
}
