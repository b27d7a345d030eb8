// tests/scheduler_abort.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use stagedag::engine::{PipelineScheduler, SchedulerDeps, SchedulerOptions};
use stagedag::errors::Result as StoreResult;
use stagedag::exec::lifecycle::CANCELLED;
use stagedag::exec::{HandlerRegistry, StepExecutor};
use stagedag::plan::{StaticPlanBuilder, Step, StepSpec};
use stagedag::store::{MemoryRunStore, MemoryStepStore, StepStore, StepUpdate};
use stagedag::types::{RunOutcome, RunStatus, StepStatus};
use stagedag_test_utils::builders::spec;
use stagedag_test_utils::fake_handlers::{
    fail, gated, hangs, panics, skip, sleep_then_fail, sleep_then_succeed, succeed,
};
use stagedag_test_utils::fake_oracles::SlowOracle;
use stagedag_test_utils::harness::Harness;
use stagedag_test_utils::recording_store::RunWrite;
use stagedag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn critical_failure_aborts_and_cancels_siblings() -> TestResult {
    init_tracing();

    let h = Harness::new("abort")
        .critical("A")
        .handler("A", fail("boom"))
        .handler("B", succeed("never"))
        .handler("C", hangs());

    let report = h
        .run(vec![spec("A", &[]), spec("B", &["A"]), spec("C", &[])])
        .await?;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.reason.as_deref(), Some("Critical step A failed: boom"));

    assert_eq!(h.step("A").and_then(|s| s.error), Some("boom".to_string()));
    assert_eq!(report.status_of("B"), Some(StepStatus::Pending));

    let c = h.step("C").unwrap();
    assert_eq!(c.status, StepStatus::Failed);
    assert_eq!(c.error.as_deref(), Some(CANCELLED));

    let record = h.run_store.record("abort").unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("Critical step A failed: boom"));
    assert_eq!(h.run_store.terminal_writes(), 1);

    Ok(())
}

#[tokio::test]
async fn critical_panic_aborts_the_run() -> TestResult {
    init_tracing();

    let h = Harness::new("abort-panic")
        .critical("A")
        .handler("A", panics("bad state"))
        .handler("B", succeed("never"));

    let report = h.run(vec![spec("A", &[]), spec("B", &["A"])]).await?;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert!(report.reason.unwrap().contains("bad state"));
    assert_eq!(report.blocked, vec!["B".to_string()]);

    Ok(())
}

#[tokio::test]
async fn second_critical_failure_does_not_abort_again() -> TestResult {
    init_tracing();

    let h = Harness::new("double-abort")
        .critical("A")
        .critical("B")
        .handler("A", fail("first"))
        .handler("B", fail("second"));

    let report = h.run(vec![spec("A", &[]), spec("B", &[])]).await?;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(h.run_store.terminal_writes(), 1);

    let fails: Vec<String> = h
        .run_store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            RunWrite::Fail(reason) => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(fails.len(), 1);
    assert!(fails[0].starts_with("Critical step "), "{fails:?}");

    Ok(())
}

#[tokio::test]
async fn skipped_critical_step_is_not_a_failure() -> TestResult {
    init_tracing();

    let h = Harness::new("critical-skip")
        .critical("A")
        .handler("A", skip("nothing to do"))
        .handler("B", succeed("ok"));

    let report = h.run(vec![spec("A", &[]), spec("B", &["A"])]).await?;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.status_of("B"), Some(StepStatus::Done));

    Ok(())
}

#[tokio::test]
async fn abort_waits_for_cancelled_steps_before_reporting() -> TestResult {
    init_tracing();

    // Released only after the run is over; C must be torn down by cancellation.
    let gate = Arc::new(Notify::new());

    let h = Harness::new("abort-grace")
        .cancel_grace(Duration::from_secs(2))
        .critical("B")
        .handler("A", succeed("a"))
        .handler("B", fail("critical"))
        .handler("C", gated(gate.clone(), "c"));

    let report = h
        .run(vec![spec("A", &[]), spec("B", &["A"]), spec("C", &["A"])])
        .await?;
    gate.notify_one();

    assert_eq!(report.outcome, RunOutcome::Aborted);
    // The report is assembled after the cancelled step recorded its status.
    assert_eq!(report.status_of("C"), Some(StepStatus::Failed));
    assert_eq!(
        report.step("C").and_then(|s| s.error.clone()).as_deref(),
        Some(CANCELLED)
    );

    Ok(())
}

// While a slow replan holds the completion section, the critical step fails
// and a sibling's completion is queued ahead of the critical step's own
// abort. The sibling must abort the run rather than finish it.
#[tokio::test]
async fn critical_failure_seen_by_sibling_completion_still_aborts() -> TestResult {
    init_tracing();

    let h = Harness::new("critical-race")
        .oracle(SlowOracle::new(Duration::from_millis(100)))
        .critical("A")
        .handler("A", sleep_then_fail(40, "boom"))
        .handler("B", sleep_then_succeed(20, "b"))
        .handler("D", sleep_then_succeed(5, "d"));

    let report = h
        .run(vec![spec("A", &[]), spec("B", &[]), spec("D", &[])])
        .await?;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.reason.as_deref(), Some("Critical step A failed: boom"));

    let record = h.run_store.record("critical-race").unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("Critical step A failed: boom"));
    assert_eq!(h.run_store.terminal_writes(), 1);

    Ok(())
}

#[tokio::test]
async fn steps_pending_at_critical_failure_are_never_dispatched() -> TestResult {
    init_tracing();

    let h = Harness::new("critical-race-pending")
        .oracle(SlowOracle::new(Duration::from_millis(100)))
        .critical("A")
        .handler("A", sleep_then_fail(40, "boom"))
        .handler("B", sleep_then_succeed(20, "b"))
        .handler("C", succeed("must not run"))
        .handler("D", sleep_then_succeed(5, "d"));

    let report = h
        .run(vec![
            spec("A", &[]),
            spec("B", &[]),
            spec("C", &["B"]),
            spec("D", &[]),
        ])
        .await?;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.status_of("B"), Some(StepStatus::Done));
    assert_eq!(report.status_of("C"), Some(StepStatus::Pending));
    assert_eq!(report.blocked, vec!["C".to_string()]);

    Ok(())
}

/// Step store whose terminal write for one step blocks the calling thread.
#[derive(Debug)]
struct StallingStepStore {
    inner: MemoryStepStore,
    stalled_step: String,
    stall: Duration,
}

impl StepStore for StallingStepStore {
    fn save_plan(&self, run_id: &str, specs: &[StepSpec]) -> StoreResult<()> {
        self.inner.save_plan(run_id, specs)
    }

    fn get_all(&self, run_id: &str) -> StoreResult<Vec<Step>> {
        self.inner.get_all(run_id)
    }

    fn upsert(&self, run_id: &str, name: &str, update: StepUpdate) -> StoreResult<()> {
        if name == self.stalled_step && update.status.is_terminal() {
            std::thread::sleep(self.stall);
        }
        self.inner.upsert(run_id, name, update)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abort_detaches_steps_that_outlive_the_grace_period() -> TestResult {
    init_tracing();

    let step_store = Arc::new(StallingStepStore {
        inner: MemoryStepStore::new(),
        stalled_step: "C".to_string(),
        stall: Duration::from_millis(1500),
    });
    let run_store = Arc::new(MemoryRunStore::new());
    run_store.create_run("grace-expired");

    let registry = HandlerRegistry::new()
        .with("A", fail("boom"))
        .with("C", hangs());
    let executor = StepExecutor::new(step_store.clone(), registry, ["A".to_string()]);

    let deps = SchedulerDeps {
        plan_builder: Arc::new(StaticPlanBuilder::new(vec![spec("A", &[]), spec("C", &[])])),
        step_store,
        run_store: run_store.clone(),
        oracle: None,
        executor,
    };
    let options = SchedulerOptions {
        cancel_grace: Duration::from_millis(50),
    };

    let scheduler = PipelineScheduler::new("grace-expired", deps, options);
    let started = Instant::now();
    let report = with_timeout(scheduler.start()).await?;

    assert!(
        started.elapsed() < Duration::from_millis(1000),
        "abort waited for the stalled step: {:?}",
        started.elapsed()
    );
    assert_eq!(report.outcome, RunOutcome::Aborted);
    // Detached before its cancellation was recorded.
    assert_eq!(report.status_of("C"), Some(StepStatus::Running));
    assert_eq!(run_store.get("grace-expired").unwrap().status, RunStatus::Failed);

    Ok(())
}
