// src/dag/progress.rs

use crate::plan::Step;
use crate::types::StepStatus;

/// Placeholder stage label when no step is running.
pub const IDLE_STAGE: &str = "Processing...";

/// Run-level progress derived from a step snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// `floor(100 * terminal / total)`; an empty plan counts as finished.
    pub pct: u8,
    pub stage: String,
}

impl Progress {
    pub fn compute(snapshot: &[Step]) -> Self {
        let total = snapshot.len();
        let finished = snapshot.iter().filter(|s| s.status.is_terminal()).count();

        let pct = if total == 0 {
            100
        } else {
            (finished * 100 / total) as u8
        };

        let stage = snapshot
            .iter()
            .find(|s| s.status == StepStatus::Running)
            .map(Step::stage_label)
            .unwrap_or_else(|| IDLE_STAGE.to_string());

        Self { pct, stage }
    }
}
