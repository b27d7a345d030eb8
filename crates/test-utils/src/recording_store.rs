#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use stagedag::engine::RunReport;
use stagedag::errors::Result;
use stagedag::store::{MemoryRunStore, RunRecord, RunStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunWrite {
    Progress { stage: String, pct: u8 },
    Complete,
    Fail(String),
    Report,
}

/// `MemoryRunStore` that also keeps every write it received, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunStore {
    inner: MemoryRunStore,
    writes: Arc<Mutex<Vec<RunWrite>>>,
}

impl RecordingRunStore {
    pub fn new(run_id: &str) -> Self {
        let store = Self::default();
        store.inner.create_run(run_id);
        store
    }

    pub fn record(&self, run_id: &str) -> Option<RunRecord> {
        self.inner.get(run_id)
    }

    pub fn writes(&self) -> Vec<RunWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Every percentage passed to `update_progress`, in call order.
    pub fn progress_values(&self) -> Vec<u8> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                RunWrite::Progress { pct, .. } => Some(pct),
                _ => None,
            })
            .collect()
    }

    pub fn stages(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                RunWrite::Progress { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_writes(&self) -> usize {
        self.writes()
            .iter()
            .filter(|w| matches!(w, RunWrite::Complete | RunWrite::Fail(_)))
            .count()
    }

    fn push(&self, write: RunWrite) {
        self.writes.lock().unwrap().push(write);
    }
}

impl RunStore for RecordingRunStore {
    fn update_progress(&self, run_id: &str, stage: &str, pct: u8) -> Result<()> {
        self.push(RunWrite::Progress {
            stage: stage.to_string(),
            pct,
        });
        self.inner.update_progress(run_id, stage, pct)
    }

    fn complete(&self, run_id: &str) -> Result<()> {
        self.push(RunWrite::Complete);
        self.inner.complete(run_id)
    }

    fn fail(&self, run_id: &str, reason: &str) -> Result<()> {
        self.push(RunWrite::Fail(reason.to_string()));
        self.inner.fail(run_id, reason)
    }

    fn save_report(&self, run_id: &str, report: &RunReport) -> Result<()> {
        self.push(RunWrite::Report);
        self.inner.save_report(run_id, report)
    }
}
