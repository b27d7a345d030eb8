// src/engine/scheduler.rs

//! Event-driven pipeline scheduler.
//!
//! One [`PipelineScheduler`] drives one run:
//!
//! 1. the plan builder is consulted once and its steps are persisted;
//! 2. the replan oracle (or the deterministic fallback) picks ready steps;
//! 3. each picked step runs as its own tokio task through the
//!    [`StepExecutor`];
//! 4. every completion re-reads the store, recomputes progress and asks for
//!    the next decision, all inside one mutex so two completions can never
//!    both dispatch the same step or both decide to wait;
//! 5. a critical failure cancels every in-flight step and fails the run.
//!
//! The store is always re-read; nothing in memory is treated as the truth
//! about step status. The only in-memory state is the map of in-flight
//! tasks, owned here and only touched under the mutex.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::model::DEFAULT_CANCEL_GRACE;
use crate::dag::readiness::is_ready;
use crate::dag::{DagGraph, Progress};
use crate::engine::oracle::{
    deterministic_replan, validate_decision, Action, Decision, ReplanOracle,
};
use crate::engine::report::RunReport;
use crate::errors::{Result, StagedagError};
use crate::exec::StepExecutor;
use crate::plan::{PlanBuilder, Step};
use crate::store::{RunStore, StepStore, StepUpdate};
use crate::types::{RunOutcome, StepStatus};

type Stragglers = Vec<(String, JoinHandle<()>)>;

fn critical_reason(step: &str, message: &str) -> String {
    format!("Critical step {step} failed: {message}")
}

/// Collaborators injected into a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerDeps {
    pub plan_builder: Arc<dyn PlanBuilder>,
    pub step_store: Arc<dyn StepStore>,
    pub run_store: Arc<dyn RunStore>,
    /// `None` means the deterministic rules decide alone.
    pub oracle: Option<Arc<dyn ReplanOracle>>,
    pub executor: StepExecutor,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// How long an abort waits for cancelled steps before detaching them.
    pub cancel_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    in_flight: HashMap<String, InFlight>,
    /// Set once, by whichever of completion or abort gets there first.
    finished: bool,
}

struct Inner {
    run_id: String,
    deps: SchedulerDeps,
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    done_tx: watch::Sender<Option<RunReport>>,
}

/// Drives one run to a terminal state.
pub struct PipelineScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("run_id", &self.inner.run_id)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl PipelineScheduler {
    pub fn new(run_id: impl Into<String>, deps: SchedulerDeps, options: SchedulerOptions) -> Self {
        let (done_tx, _done_rx) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                run_id: run_id.into(),
                deps,
                options,
                state: Mutex::new(SchedulerState::default()),
                done_tx,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Plan, run and wait until the run is terminal.
    ///
    /// Returns `Err` only when the run cannot get going (planning or plan
    /// persistence failed); every step-level problem ends up in the report.
    pub async fn start(self) -> Result<RunReport> {
        let inner = &self.inner;
        let run_id = inner.run_id.as_str();
        let mut done_rx = inner.done_tx.subscribe();

        info!(run_id, "planning run");
        let specs = match inner.deps.plan_builder.build(run_id).await {
            Ok(specs) => specs,
            Err(e) => {
                let err = match e {
                    StagedagError::PlanError(_) => e,
                    other => StagedagError::PlanError(other.to_string()),
                };
                inner.fail_before_start(&err.to_string());
                return Err(err);
            }
        };

        if let Err(e) = inner.deps.step_store.save_plan(run_id, &specs) {
            inner.fail_before_start(&format!("Saving plan failed: {e}"));
            return Err(e);
        }

        let graph = DagGraph::from_specs(&specs);
        for (step, dep) in graph.dangling_dependencies() {
            warn!(run_id, step, dep, "step depends on a step missing from the plan; it will never run");
        }
        info!(run_id, steps = specs.len(), roots = ?graph.roots(), "plan created");

        {
            let mut state = inner.state.lock().await;
            if specs.is_empty() {
                info!(run_id, "plan has no steps; completing");
                inner.finish(&mut state);
            } else {
                match inner.snapshot() {
                    Ok(snapshot) => {
                        if let Some((step, reason)) = inner.raised_critical_failure(&snapshot) {
                            let stragglers = inner.begin_abort(&mut state, &step, &reason);
                            drop(state);
                            if let Some(stragglers) = stragglers {
                                inner.finish_abort(stragglers, reason).await;
                            }
                        } else {
                            let decision = inner.replan(&snapshot).await;
                            inner.act(&mut state, decision, &snapshot);
                        }
                    }
                    Err(e) => {
                        drop(state);
                        inner.fail_before_start(&format!("Reading plan failed: {e}"));
                        return Err(e);
                    }
                }
            }
        }

        let report = done_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| StagedagError::Other(anyhow::anyhow!("completion signal dropped")))?
            .clone();

        report.ok_or_else(|| StagedagError::Other(anyhow::anyhow!("run finished without a report")))
    }
}

impl Inner {
    fn snapshot(&self) -> Result<Vec<Step>> {
        self.deps.step_store.get_all(&self.run_id)
    }

    /// Name and abort reason of a critical step already recorded `failed`.
    ///
    /// The executor writes the failure before its task reaches `abort`, so a
    /// sibling's completion can see it first. Steps failed by cancellation
    /// only appear once the run is already finished.
    fn raised_critical_failure(&self, snapshot: &[Step]) -> Option<(String, String)> {
        snapshot
            .iter()
            .find(|s| s.status == StepStatus::Failed && self.deps.executor.is_critical(&s.name))
            .map(|s| {
                let message = s.error.as_deref().unwrap_or("unknown error");
                (s.name.clone(), critical_reason(&s.name, message))
            })
    }

    /// Oracle decision checked against the rules, or the rules alone.
    async fn replan(&self, snapshot: &[Step]) -> Decision {
        let Some(ref oracle) = self.deps.oracle else {
            return deterministic_replan(snapshot);
        };

        match oracle.decide(&self.run_id, snapshot).await {
            Ok(proposed) => validate_decision(proposed, snapshot),
            Err(e) => {
                warn!(
                    run_id = %self.run_id,
                    error = %e,
                    "replan oracle failed; falling back to deterministic replan"
                );
                deterministic_replan(snapshot)
            }
        }
    }

    fn act(self: &Arc<Self>, state: &mut SchedulerState, decision: Decision, snapshot: &[Step]) {
        debug!(run_id = %self.run_id, ?decision, "acting on decision");

        match decision.action {
            Action::Dispatch => {
                let launched = self.dispatch(state, &decision.steps, snapshot);
                if launched == 0 && state.in_flight.is_empty() {
                    warn!(run_id = %self.run_id, "nothing could be dispatched and nothing is in flight; finishing");
                    self.finish(state);
                }
            }
            Action::Wait if state.in_flight.is_empty() => {
                warn!(run_id = %self.run_id, "told to wait but no step is in flight; finishing");
                self.finish(state);
            }
            Action::Wait => {
                debug!(
                    run_id = %self.run_id,
                    in_flight = state.in_flight.len(),
                    "waiting for running steps"
                );
            }
            Action::Complete => self.finish(state),
        }
    }

    /// Launch the named steps that are ready and not already in flight.
    fn dispatch(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        names: &[String],
        snapshot: &[Step],
    ) -> usize {
        let mut launched = 0;

        for name in names {
            if state.in_flight.contains_key(name) {
                warn!(run_id = %self.run_id, step = %name, "step already in flight; skipping dispatch");
                continue;
            }

            let Some(step) = snapshot.iter().find(|s| &s.name == name) else {
                warn!(run_id = %self.run_id, step = %name, "step not found in plan; skipping dispatch");
                continue;
            };

            if !is_ready(step, snapshot) {
                warn!(run_id = %self.run_id, step = %name, status = %step.status, "step not ready; skipping dispatch");
                continue;
            }

            // Recorded before spawning so the next snapshot can't see an
            // in-flight step as pending.
            if let Err(e) = self
                .deps
                .step_store
                .upsert(&self.run_id, name, StepUpdate::running())
            {
                error!(run_id = %self.run_id, step = %name, error = %e, "could not mark step running; not dispatching");
                continue;
            }

            info!(run_id = %self.run_id, step = %name, "dispatching step");

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(Arc::clone(self).run_step(step.clone(), cancel.clone()));
            state
                .in_flight
                .insert(name.clone(), InFlight { cancel, handle });
            launched += 1;
        }

        if launched > 0 {
            match self.snapshot() {
                Ok(snapshot) => self.update_progress(&snapshot),
                Err(e) => warn!(run_id = %self.run_id, error = %e, "could not read steps for progress"),
            }
        }

        launched
    }

    async fn run_step(self: Arc<Self>, step: Step, cancel: CancellationToken) {
        match self.deps.executor.execute(&self.run_id, &step, cancel).await {
            Ok(_outcome) => self.on_step_done(&step.name).await,
            Err(critical) => {
                let reason = critical_reason(&critical.step, &critical.message);
                self.abort(&step.name, reason).await;
            }
        }
    }

    /// Completion callback. Serialized with every other completion and with
    /// dispatch through `state`.
    async fn on_step_done(self: &Arc<Self>, name: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(name);

        if state.finished {
            debug!(run_id = %self.run_id, step = %name, "run already terminal; ignoring completion");
            return;
        }

        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                drop(state);
                self.abort(name, format!("Step store unavailable: {e}")).await;
                return;
            }
        };

        if let Some((step, reason)) = self.raised_critical_failure(&snapshot) {
            let stragglers = self.begin_abort(&mut state, &step, &reason);
            drop(state);
            if let Some(stragglers) = stragglers {
                self.finish_abort(stragglers, reason).await;
            }
            return;
        }

        self.update_progress(&snapshot);
        let decision = self.replan(&snapshot).await;
        self.act(&mut state, decision, &snapshot);
    }

    /// Tear the run down. Only the first caller does anything.
    async fn abort(self: &Arc<Self>, trigger: &str, reason: String) {
        let stragglers = {
            let mut state = self.state.lock().await;
            state.in_flight.remove(trigger);
            self.begin_abort(&mut state, trigger, &reason)
        };

        if let Some(stragglers) = stragglers {
            self.finish_abort(stragglers, reason).await;
        }
    }

    /// Mark the run terminal and cancel everything in flight. `None` when
    /// the run was already terminal.
    fn begin_abort(
        &self,
        state: &mut SchedulerState,
        trigger: &str,
        reason: &str,
    ) -> Option<Stragglers> {
        if state.finished {
            debug!(run_id = %self.run_id, step = %trigger, "run already terminal; ignoring abort");
            return None;
        }
        state.finished = true;

        error!(run_id = %self.run_id, step = %trigger, %reason, "aborting run");
        self.record_terminal_status(RunOutcome::Aborted, Some(reason));

        let stragglers = state
            .in_flight
            .drain()
            .map(|(name, flight)| {
                info!(run_id = %self.run_id, step = %name, "cancelling step due to abort");
                flight.cancel.cancel();
                (name, flight.handle)
            })
            .collect();
        Some(stragglers)
    }

    /// Wait out the grace period, then publish the aborted report. Must run
    /// without holding `state`: cancelled steps take it on their way out.
    async fn finish_abort(&self, stragglers: Stragglers, reason: String) {
        let deadline = Instant::now() + self.options.cancel_grace;
        for (name, mut handle) in stragglers {
            // The executor stops a cancelled handler itself; this only trips
            // when the step's final store write blocks past the deadline.
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(run_id = %self.run_id, step = %name, "step ignored cancellation; detaching");
                handle.abort();
            }
        }

        let snapshot = self.snapshot().unwrap_or_else(|e| {
            error!(run_id = %self.run_id, error = %e, "could not read final step states");
            Vec::new()
        });
        self.publish(RunReport::assemble(&self.run_id, snapshot, Some(reason)));
    }

    /// Normal completion: classify, persist and signal.
    fn finish(&self, state: &mut SchedulerState) {
        if state.finished {
            return;
        }
        state.finished = true;

        let snapshot = self.snapshot().unwrap_or_else(|e| {
            error!(run_id = %self.run_id, error = %e, "could not read final step states");
            Vec::new()
        });
        let report = RunReport::assemble(&self.run_id, snapshot, None);

        if !report.blocked.is_empty() {
            warn!(run_id = %self.run_id, blocked = ?report.blocked, "steps never became ready");
        }
        self.record_terminal_status(report.outcome, report.reason.as_deref());
        self.publish(report);
    }

    fn record_terminal_status(&self, outcome: RunOutcome, reason: Option<&str>) {
        let run_id = self.run_id.as_str();
        let store = &self.deps.run_store;

        let stage = match outcome {
            RunOutcome::Completed => "Complete",
            RunOutcome::CompletedWithFailures => "Finished with failures",
            RunOutcome::Aborted => "Aborted",
        };
        if let Err(e) = store.update_progress(run_id, stage, 100) {
            warn!(run_id, error = %e, "could not record final progress");
        }

        let result = match outcome {
            RunOutcome::Completed => store.complete(run_id),
            RunOutcome::CompletedWithFailures | RunOutcome::Aborted => {
                store.fail(run_id, reason.unwrap_or("run failed"))
            }
        };
        if let Err(e) = result {
            error!(run_id, error = %e, "could not record terminal run status");
        }

        match outcome {
            RunOutcome::Completed => info!(run_id, "pipeline completed"),
            _ => info!(run_id, %outcome, reason = reason.unwrap_or(""), "pipeline finished"),
        }
    }

    fn publish(&self, report: RunReport) {
        if let Err(e) = self.deps.run_store.save_report(&self.run_id, &report) {
            warn!(run_id = %self.run_id, error = %e, "could not save run report");
        }
        self.done_tx.send_replace(Some(report));
    }

    fn fail_before_start(&self, reason: &str) {
        error!(run_id = %self.run_id, %reason, "run failed before dispatching");
        if let Err(e) = self.deps.run_store.fail(&self.run_id, reason) {
            error!(run_id = %self.run_id, error = %e, "could not record run failure");
        }
    }

    fn update_progress(&self, snapshot: &[Step]) {
        let progress = Progress::compute(snapshot);
        debug!(
            run_id = %self.run_id,
            pct = progress.pct,
            stage = %progress.stage,
            "progress"
        );
        if let Err(e) = self
            .deps
            .run_store
            .update_progress(&self.run_id, &progress.stage, progress.pct)
        {
            warn!(run_id = %self.run_id, error = %e, "could not record progress");
        }
    }
}
