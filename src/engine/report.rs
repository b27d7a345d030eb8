// src/engine/report.rs

use serde::{Deserialize, Serialize};

use crate::plan::Step;
use crate::types::{RunOutcome, StepStatus};

/// Final results of a run, assembled from the step store once the run is
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Why the run did not complete cleanly, if it didn't.
    pub reason: Option<String>,
    /// Every step as last recorded, in plan order.
    pub steps: Vec<Step>,
    pub failed: Vec<String>,
    /// Steps still `pending` at the end: never dispatched, either because the
    /// run aborted or because a dependency never became satisfied.
    pub blocked: Vec<String>,
}

impl RunReport {
    /// Classify the run from the final snapshot.
    ///
    /// `abort_reason` is set when a critical failure tore the run down; it
    /// wins over any other classification.
    pub fn assemble(run_id: &str, snapshot: Vec<Step>, abort_reason: Option<String>) -> Self {
        let failed: Vec<String> = names_with(&snapshot, StepStatus::Failed);
        let blocked: Vec<String> = names_with(&snapshot, StepStatus::Pending);

        let (outcome, reason) = match abort_reason {
            Some(reason) => (RunOutcome::Aborted, Some(reason)),
            None if !failed.is_empty() => (
                RunOutcome::CompletedWithFailures,
                Some(format!("Steps failed: {}", failed.join(", "))),
            ),
            None => (RunOutcome::Completed, None),
        };

        Self {
            run_id: run_id.to_string(),
            outcome,
            reason,
            steps: snapshot,
            failed,
            blocked,
        }
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|s| s.status)
    }
}

fn names_with(snapshot: &[Step], status: StepStatus) -> Vec<String> {
    snapshot
        .iter()
        .filter(|s| s.status == status)
        .map(|s| s.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepSpec;

    fn step(name: &str, status: StepStatus) -> Step {
        let mut s = Step::from_spec(StepSpec::new(name));
        s.status = status;
        s
    }

    #[test]
    fn failures_without_abort_complete_with_failures() {
        let report = RunReport::assemble(
            "r1",
            vec![
                step("a", StepStatus::Done),
                step("b", StepStatus::Failed),
                step("c", StepStatus::Pending),
            ],
            None,
        );
        assert_eq!(report.outcome, RunOutcome::CompletedWithFailures);
        assert_eq!(report.reason.as_deref(), Some("Steps failed: b"));
        assert_eq!(report.blocked, vec!["c".to_string()]);
    }

    #[test]
    fn abort_reason_wins() {
        let report = RunReport::assemble(
            "r1",
            vec![step("a", StepStatus::Failed), step("b", StepStatus::Pending)],
            Some("Critical step a failed".to_string()),
        );
        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(report.status_of("b"), Some(StepStatus::Pending));
    }

    #[test]
    fn clean_run_completes() {
        let report = RunReport::assemble(
            "r1",
            vec![step("a", StepStatus::Done), step("b", StepStatus::Skipped)],
            None,
        );
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.reason.is_none());
    }
}
