// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, warn};

use super::{RunStore, StepStore, StepUpdate};
use crate::engine::RunReport;
use crate::errors::{Result, StagedagError};
use crate::plan::{Step, StepSpec};
use crate::types::{RunStatus, StepStatus};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every mutation is a single assignment, so a poisoned map is still consistent.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process step store keyed by run id.
#[derive(Debug, Clone, Default)]
pub struct MemoryStepStore {
    runs: Arc<Mutex<HashMap<String, Vec<Step>>>>,
}

impl MemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single step lookup, mostly for tests and diagnostics.
    pub fn get(&self, run_id: &str, name: &str) -> Option<Step> {
        lock(&self.runs)
            .get(run_id)
            .and_then(|steps| steps.iter().find(|s| s.name == name).cloned())
    }
}

impl StepStore for MemoryStepStore {
    fn save_plan(&self, run_id: &str, specs: &[StepSpec]) -> Result<()> {
        let steps = specs.iter().cloned().map(Step::from_spec).collect();
        lock(&self.runs).insert(run_id.to_string(), steps);
        debug!(run_id, steps = specs.len(), "plan saved");
        Ok(())
    }

    fn get_all(&self, run_id: &str) -> Result<Vec<Step>> {
        Ok(lock(&self.runs).get(run_id).cloned().unwrap_or_default())
    }

    fn upsert(&self, run_id: &str, name: &str, update: StepUpdate) -> Result<()> {
        let mut runs = lock(&self.runs);
        let steps = runs.entry(run_id.to_string()).or_default();

        let idx = match steps.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                warn!(run_id, step = name, "upsert for step not in plan; inserting");
                steps.push(Step::from_spec(StepSpec::new(name)));
                steps.len() - 1
            }
        };
        let step = &mut steps[idx];

        if step.status == update.status
            && step.result_summary == update.result_summary
            && step.error == update.error
        {
            return Ok(());
        }

        let now = Utc::now();
        match update.status {
            StepStatus::Running => step.started_at = Some(now),
            s if s.is_terminal() => step.completed_at = Some(now),
            _ => {}
        }
        step.status = update.status;
        step.result_summary = update.result_summary;
        step.error = update.error;

        Ok(())
    }
}

/// Snapshot of one run as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub stage: String,
    pub progress: u8,
    pub error: Option<String>,
    pub report: Option<RunReport>,
}

/// In-process run store.
///
/// Once a run is terminal, later progress and status writes are ignored.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    runs: Arc<Mutex<HashMap<String, RunRecord>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run before the scheduler starts.
    pub fn create_run(&self, run_id: &str) {
        lock(&self.runs).insert(
            run_id.to_string(),
            RunRecord {
                run_id: run_id.to_string(),
                status: RunStatus::Running,
                stage: "Queued".to_string(),
                progress: 0,
                error: None,
                report: None,
            },
        );
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        lock(&self.runs).get(run_id).cloned()
    }

    fn with_live_run(&self, run_id: &str, f: impl FnOnce(&mut RunRecord)) -> Result<()> {
        let mut runs = lock(&self.runs);
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StagedagError::RunNotFound(run_id.to_string()))?;
        if run.status.is_terminal() {
            debug!(run_id, status = ?run.status, "run already terminal; ignoring write");
            return Ok(());
        }
        f(run);
        Ok(())
    }
}

impl RunStore for MemoryRunStore {
    fn update_progress(&self, run_id: &str, stage: &str, pct: u8) -> Result<()> {
        self.with_live_run(run_id, |run| {
            run.stage = stage.to_string();
            run.progress = run.progress.max(pct.min(100));
        })
    }

    fn complete(&self, run_id: &str) -> Result<()> {
        self.with_live_run(run_id, |run| {
            run.status = RunStatus::Completed;
            run.stage = "Complete".to_string();
            run.progress = 100;
        })
    }

    fn fail(&self, run_id: &str, reason: &str) -> Result<()> {
        self.with_live_run(run_id, |run| {
            run.status = RunStatus::Failed;
            run.stage = "Failed".to_string();
            run.progress = 100;
            run.error = Some(reason.to_string());
        })
    }

    fn save_report(&self, run_id: &str, report: &RunReport) -> Result<()> {
        let mut runs = lock(&self.runs);
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StagedagError::RunNotFound(run_id.to_string()))?;
        run.report = Some(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<StepSpec> {
        let mut b = StepSpec::new("b");
        b.depends_on = vec!["a".to_string()];
        vec![StepSpec::new("a"), b]
    }

    #[test]
    fn saved_plan_starts_pending_in_order() {
        let store = MemoryStepStore::new();
        store.save_plan("r1", &specs()).unwrap();

        let steps = store.get_all("r1").unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(store.get_all("other").unwrap().is_empty());
    }

    #[test]
    fn running_and_terminal_writes_stamp_times() {
        let store = MemoryStepStore::new();
        store.save_plan("r1", &specs()).unwrap();

        store.upsert("r1", "a", StepUpdate::running()).unwrap();
        let a = store.get("r1", "a").unwrap();
        assert_eq!(a.status, StepStatus::Running);
        assert!(a.started_at.is_some());
        assert!(a.completed_at.is_none());

        store.upsert("r1", "a", StepUpdate::done("ok")).unwrap();
        let a = store.get("r1", "a").unwrap();
        assert_eq!(a.status, StepStatus::Done);
        assert_eq!(a.result_summary.as_deref(), Some("ok"));
        assert!(a.completed_at.is_some());
    }

    #[test]
    fn repeated_terminal_write_is_idempotent() {
        let store = MemoryStepStore::new();
        store.save_plan("r1", &specs()).unwrap();

        store.upsert("r1", "a", StepUpdate::failed("boom")).unwrap();
        let first = store.get("r1", "a").unwrap();
        store.upsert("r1", "a", StepUpdate::failed("boom")).unwrap();
        let second = store.get("r1", "a").unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn upsert_of_unknown_step_inserts_it() {
        let store = MemoryStepStore::new();
        store.save_plan("r1", &specs()).unwrap();
        store.upsert("r1", "extra", StepUpdate::skipped("nothing")).unwrap();

        let extra = store.get("r1", "extra").unwrap();
        assert_eq!(extra.status, StepStatus::Skipped);
        assert_eq!(store.get_all("r1").unwrap().len(), 3);
    }

    #[test]
    fn run_progress_is_monotonic() {
        let runs = MemoryRunStore::new();
        runs.create_run("r1");
        runs.update_progress("r1", "A", 50).unwrap();
        runs.update_progress("r1", "B", 20).unwrap();

        let rec = runs.get("r1").unwrap();
        assert_eq!(rec.progress, 50);
        assert_eq!(rec.stage, "B");
    }

    #[test]
    fn writes_after_failure_do_not_resurrect_run() {
        let runs = MemoryRunStore::new();
        runs.create_run("r1");
        runs.fail("r1", "critical step fetch failed").unwrap();
        runs.update_progress("r1", "Running late...", 10).unwrap();
        runs.complete("r1").unwrap();

        let rec = runs.get("r1").unwrap();
        assert_eq!(rec.status, RunStatus::Failed);
        assert_eq!(rec.progress, 100);
        assert_eq!(rec.error.as_deref(), Some("critical step fetch failed"));
    }

    #[test]
    fn unknown_run_is_an_error() {
        let runs = MemoryRunStore::new();
        assert!(matches!(
            runs.update_progress("nope", "x", 1),
            Err(StagedagError::RunNotFound(_))
        ));
    }
}
