#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stagedag::engine::{deterministic_replan, Decision, ReplanOracle};
use stagedag::errors::{Result, StagedagError};
use stagedag::plan::Step;
use stagedag::types::BoxFuture;

/// Oracle that always errors, forcing the deterministic fallback.
#[derive(Debug, Default)]
pub struct FailingOracle {
    calls: AtomicUsize,
}

impl FailingOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReplanOracle for FailingOracle {
    fn decide<'a>(
        &'a self,
        _run_id: &'a str,
        _snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(StagedagError::OracleError("model unavailable".to_string())) })
    }
}

/// Oracle that returns the same decision no matter what.
#[derive(Debug)]
pub struct FixedOracle {
    decision: Decision,
}

impl FixedOracle {
    pub fn new(decision: Decision) -> Arc<Self> {
        Arc::new(Self { decision })
    }
}

impl ReplanOracle for FixedOracle {
    fn decide<'a>(
        &'a self,
        _run_id: &'a str,
        _snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        let decision = self.decision.clone();
        Box::pin(async move { Ok(decision) })
    }
}

/// Oracle that proposes every step in the plan, ready or not.
#[derive(Debug, Default)]
pub struct GreedyOracle;

impl ReplanOracle for GreedyOracle {
    fn decide<'a>(
        &'a self,
        _run_id: &'a str,
        snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            let fallback = deterministic_replan(snapshot);
            let mut steps: Vec<String> = snapshot.iter().map(|s| s.name.clone()).collect();
            // Duplicates must be collapsed by validation.
            steps.extend(fallback.steps.iter().cloned());
            Ok(Decision {
                action: fallback.action,
                steps,
            })
        })
    }
}

/// Deterministic oracle that counts how often it was asked.
#[derive(Debug, Default)]
pub struct CountingOracle {
    calls: AtomicUsize,
}

impl CountingOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReplanOracle for CountingOracle {
    fn decide<'a>(
        &'a self,
        _run_id: &'a str,
        snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(deterministic_replan(snapshot)) })
    }
}

/// Deterministic oracle that takes its time, holding the scheduler's
/// completion section while sibling steps keep finishing.
#[derive(Debug)]
pub struct SlowOracle {
    delay: Duration,
}

impl SlowOracle {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

impl ReplanOracle for SlowOracle {
    fn decide<'a>(
        &'a self,
        _run_id: &'a str,
        snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(deterministic_replan(snapshot))
        })
    }
}
