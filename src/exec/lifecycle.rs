// src/exec/lifecycle.rs

//! Per-step state machine.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exec::handler::{HandlerError, HandlerRegistry, StepContext};
use crate::plan::Step;
use crate::store::{StepStore, StepUpdate};

/// Summary recorded for steps nobody can run.
pub const NO_HANDLER: &str = "No handler";

/// Error recorded for steps torn down by a run abort.
pub const CANCELLED: &str = "cancelled: run aborted";

/// Terminal result of one step execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done(String),
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    /// One-line summary; failures read `"Failed: <error>"`.
    pub fn summary(&self) -> String {
        match self {
            StepOutcome::Done(s) | StepOutcome::Skipped(s) => s.clone(),
            StepOutcome::Failed(e) => format!("Failed: {e}"),
        }
    }

    fn to_update(&self) -> StepUpdate {
        match self {
            StepOutcome::Done(s) => StepUpdate::done(s.clone()),
            StepOutcome::Skipped(r) => StepUpdate::skipped(r.clone()),
            StepOutcome::Failed(e) => StepUpdate::failed(e.clone()),
        }
    }
}

/// A critical step's handler raised. The only failure that propagates to
/// the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("critical step {step} failed: {message}")]
pub struct CriticalFailure {
    pub step: String,
    pub message: String,
}

enum Invocation {
    Finished(StepOutcome),
    Raised(String),
    Cancelled,
}

/// Runs steps through `running -> done | skipped | failed`, writing every
/// transition to the step store.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    store: Arc<dyn StepStore>,
    registry: HandlerRegistry,
    critical: HashSet<String>,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn StepStore>,
        registry: HandlerRegistry,
        critical: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            store,
            registry,
            critical: critical.into_iter().collect(),
        }
    }

    pub fn is_critical(&self, step: &str) -> bool {
        self.critical.contains(step)
    }

    /// Execute one step to a terminal status.
    ///
    /// Non-critical failures are recorded and returned as
    /// `Ok(StepOutcome::Failed)`. A raising handler on a critical step is
    /// recorded and then returned as `Err(CriticalFailure)`.
    pub async fn execute(
        &self,
        run_id: &str,
        step: &Step,
        cancel: CancellationToken,
    ) -> Result<StepOutcome, CriticalFailure> {
        info!(run_id, step = %step.name, agent = %step.agent, "starting step");

        let invocation = match self.store.upsert(run_id, &step.name, StepUpdate::running()) {
            Ok(()) => self.invoke(run_id, step, cancel).await,
            Err(e) => Invocation::Raised(format!("recording running status: {e}")),
        };

        let (outcome, raised) = match invocation {
            Invocation::Finished(outcome) => (outcome, false),
            Invocation::Raised(message) => (StepOutcome::Failed(message), true),
            Invocation::Cancelled => (StepOutcome::Failed(CANCELLED.to_string()), false),
        };

        // Last action for this step, whatever the handler did.
        if let Err(e) = self.store.upsert(run_id, &step.name, outcome.to_update()) {
            error!(
                run_id,
                step = %step.name,
                error = %e,
                "failed to record terminal step status"
            );
        }

        match outcome {
            StepOutcome::Done(ref summary) => {
                info!(run_id, step = %step.name, %summary, "step done");
            }
            StepOutcome::Skipped(ref reason) => {
                info!(run_id, step = %step.name, %reason, "step skipped");
            }
            StepOutcome::Failed(ref message) if raised && self.is_critical(&step.name) => {
                error!(run_id, step = %step.name, error = %message, "critical step failed");
                return Err(CriticalFailure {
                    step: step.name.clone(),
                    message: message.clone(),
                });
            }
            StepOutcome::Failed(ref message) => {
                warn!(
                    run_id,
                    step = %step.name,
                    error = %message,
                    "non-critical step failed; continuing"
                );
            }
        }

        Ok(outcome)
    }

    async fn invoke(&self, run_id: &str, step: &Step, cancel: CancellationToken) -> Invocation {
        let Some(handler) = self.registry.resolve(step) else {
            warn!(run_id, step = %step.name, agent = %step.agent, "no handler for step; skipping");
            return Invocation::Finished(StepOutcome::Skipped(NO_HANDLER.to_string()));
        };

        let ctx = StepContext::new(run_id, step, cancel.clone());

        // Own task, so a panicking handler still ends in a terminal write.
        let mut task = tokio::spawn(async move { handler.run(&ctx).await });

        tokio::select! {
            biased;

            joined = &mut task => match joined {
                Ok(Ok(summary)) => Invocation::Finished(StepOutcome::Done(summary)),
                Ok(Err(HandlerError::Skip(reason))) => {
                    Invocation::Finished(StepOutcome::Skipped(reason))
                }
                Ok(Err(HandlerError::Failed(err))) => Invocation::Raised(format!("{err:#}")),
                Err(join_err) if join_err.is_panic() => Invocation::Raised(format!(
                    "handler panicked: {}",
                    panic_message(join_err.into_panic())
                )),
                Err(join_err) => Invocation::Raised(join_err.to_string()),
            },

            _ = cancel.cancelled() => {
                debug!(run_id, step = %step.name, "cancellation requested; aborting handler");
                task.abort();
                Invocation::Cancelled
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;

    use super::*;
    use crate::exec::handler::StepHandler;
    use crate::plan::StepSpec;
    use crate::store::MemoryStepStore;
    use crate::types::{BoxFuture, StepStatus};

    enum Behaviour {
        Succeed,
        Skip,
        Fail,
        Panic,
        Hang,
    }

    struct Scripted(Behaviour);

    impl StepHandler for Scripted {
        fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<String, HandlerError>> {
            Box::pin(async move {
                match self.0 {
                    Behaviour::Succeed => Ok(format!("{} ok", ctx.step)),
                    Behaviour::Skip => Err(HandlerError::skip("no links found")),
                    Behaviour::Fail => Err(anyhow!("upstream returned 502").into()),
                    Behaviour::Panic => panic!("handler exploded"),
                    Behaviour::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok("never".to_string())
                    }
                }
            })
        }
    }

    fn setup(behaviour: Behaviour, critical: &[&str]) -> (MemoryStepStore, StepExecutor, Step) {
        let store = MemoryStepStore::new();
        store.save_plan("r1", &[StepSpec::new("fetch")]).unwrap();
        let registry = HandlerRegistry::new().with("fetch", Arc::new(Scripted(behaviour)));
        let executor = StepExecutor::new(
            Arc::new(store.clone()),
            registry,
            critical.iter().map(|s| s.to_string()),
        );
        let step = store.get("r1", "fetch").unwrap();
        (store, executor, step)
    }

    #[tokio::test]
    async fn success_records_done_with_summary() {
        let (store, executor, step) = setup(Behaviour::Succeed, &[]);
        let outcome = executor.execute("r1", &step, CancellationToken::new()).await;

        assert_eq!(outcome, Ok(StepOutcome::Done("fetch ok".to_string())));
        let rec = store.get("r1", "fetch").unwrap();
        assert_eq!(rec.status, StepStatus::Done);
        assert_eq!(rec.result_summary.as_deref(), Some("fetch ok"));
        assert!(rec.started_at.is_some() && rec.completed_at.is_some());
    }

    #[tokio::test]
    async fn skip_signal_is_not_a_failure() {
        let (store, executor, step) = setup(Behaviour::Skip, &["fetch"]);
        let outcome = executor.execute("r1", &step, CancellationToken::new()).await;

        assert_eq!(outcome, Ok(StepOutcome::Skipped("no links found".to_string())));
        assert_eq!(store.get("r1", "fetch").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn missing_handler_skips() {
        let store = MemoryStepStore::new();
        store.save_plan("r1", &[StepSpec::new("orphan")]).unwrap();
        let executor = StepExecutor::new(Arc::new(store.clone()), HandlerRegistry::new(), []);
        let step = store.get("r1", "orphan").unwrap();

        let outcome = executor.execute("r1", &step, CancellationToken::new()).await;
        assert_eq!(outcome, Ok(StepOutcome::Skipped(NO_HANDLER.to_string())));
    }

    #[tokio::test]
    async fn non_critical_failure_is_swallowed() {
        let (store, executor, step) = setup(Behaviour::Fail, &[]);
        let outcome = executor
            .execute("r1", &step, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary(), "Failed: upstream returned 502");
        let rec = store.get("r1", "fetch").unwrap();
        assert_eq!(rec.status, StepStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("upstream returned 502"));
    }

    #[tokio::test]
    async fn critical_failure_propagates_after_recording() {
        let (store, executor, step) = setup(Behaviour::Fail, &["fetch"]);
        let err = executor
            .execute("r1", &step, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.step, "fetch");
        assert_eq!(store.get("r1", "fetch").unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn panicking_handler_still_reaches_terminal_status() {
        let (store, executor, step) = setup(Behaviour::Panic, &["fetch"]);
        let err = executor
            .execute("r1", &step, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.message.contains("handler exploded"));
        assert_eq!(store.get("r1", "fetch").unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_fails_step_without_critical_error() {
        let (store, executor, step) = setup(Behaviour::Hang, &["fetch"]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = executor.execute("r1", &step, cancel).await;
        assert_eq!(outcome, Ok(StepOutcome::Failed(CANCELLED.to_string())));
        assert_eq!(store.get("r1", "fetch").unwrap().status, StepStatus::Failed);
    }
}
