// src/types.rs

//! Small shared enums and aliases used across the crate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Boxed, `Send` future returned by the async trait seams (plan builders,
/// step handlers, replan oracles).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Canonical step name type.
pub type StepName = String;

/// Status of a single plan step.
///
/// `Done`, `Skipped` and `Failed` are terminal. Only `Done` and `Skipped`
/// satisfy downstream dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped | StepStatus::Failed)
    }

    /// Whether a dependency in this status lets its dependents run.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        }
    }
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Pending
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "done" => Ok(StepStatus::Done),
            "skipped" => Ok(StepStatus::Skipped),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!(
                "invalid step status: {other} (expected pending, running, done, skipped or failed)"
            )),
        }
    }
}

/// Persisted status of a run, as surfaced to dashboards and pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Terminal outcome of one scheduler run.
///
/// - `Completed`: nothing pending or running, no step failed.
/// - `CompletedWithFailures`: same, but at least one non-critical step failed.
/// - `Aborted`: a critical step failed and the run was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    CompletedWithFailures,
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Completed => "completed",
            RunOutcome::CompletedWithFailures => "completed-with-failures",
            RunOutcome::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_done_and_skipped_satisfy_dependents() {
        assert!(StepStatus::Done.satisfies_dependents());
        assert!(StepStatus::Skipped.satisfies_dependents());
        assert!(!StepStatus::Failed.satisfies_dependents());
        assert!(!StepStatus::Running.satisfies_dependents());
        assert!(!StepStatus::Pending.satisfies_dependents());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(" Skipped ".parse::<StepStatus>(), Ok(StepStatus::Skipped));
        assert!("finished".parse::<StepStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&StepStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
