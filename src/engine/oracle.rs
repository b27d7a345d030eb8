// src/engine/oracle.rs

use std::collections::HashSet;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dag::readiness::ready_steps;
use crate::errors::{Result, StagedagError};
use crate::plan::Step;
use crate::types::{BoxFuture, StepName, StepStatus};

/// What the scheduler should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Launch the listed ready steps now.
    Dispatch,
    /// Steps are running and nothing new is ready; await the next completion.
    Wait,
    /// Nothing is pending-and-ready or running; the run is over.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    #[serde(default)]
    pub steps: Vec<StepName>,
}

impl Decision {
    pub fn dispatch(steps: Vec<StepName>) -> Self {
        Self {
            action: Action::Dispatch,
            steps,
        }
    }

    pub fn wait() -> Self {
        Self {
            action: Action::Wait,
            steps: Vec::new(),
        }
    }

    pub fn complete() -> Self {
        Self {
            action: Action::Complete,
            steps: Vec::new(),
        }
    }

    /// Parse a decision object, tolerating a surrounding markdown code fence.
    ///
    /// ```
    /// use stagedag::engine::{Action, Decision};
    ///
    /// let d = Decision::parse("```json\n{\"action\": \"wait\", \"steps\": []}\n```").unwrap();
    /// assert_eq!(d.action, Action::Wait);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut body = text.trim();
        if let Some(rest) = body.strip_prefix("```") {
            body = match rest.split_once('\n') {
                Some((_lang, after)) => after,
                None => rest,
            };
            body = body.trim_end();
            if let Some(inner) = body.strip_suffix("```") {
                body = inner;
            }
            body = body.trim();
        }

        if body.is_empty() {
            return Err(StagedagError::OracleError("empty decision".to_string()));
        }

        serde_json::from_str(body)
            .map_err(|e| StagedagError::OracleError(format!("unparseable decision: {e}")))
    }
}

/// Pluggable policy consulted after every step completion.
///
/// Assumed unreliable: errors and nonsense answers are replaced by
/// [`deterministic_replan`].
pub trait ReplanOracle: Send + Sync + Debug {
    fn decide<'a>(
        &'a self,
        run_id: &'a str,
        snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>>;
}

/// Decision computed purely from step statuses.
///
/// Every ready step is dispatched; with nothing ready, any running step
/// means wait, otherwise the run is complete. Steps blocked behind a failed
/// or unknown dependency never become ready.
pub fn deterministic_replan(snapshot: &[Step]) -> Decision {
    let ready = ready_steps(snapshot);
    if !ready.is_empty() {
        return Decision::dispatch(ready);
    }

    if snapshot.iter().any(|s| s.status == StepStatus::Running) {
        return Decision::wait();
    }

    Decision::complete()
}

/// Reconcile an oracle's proposal with the deterministic rules.
///
/// The proposal is kept only when it agrees with the fallback's
/// classification. A dispatch list is narrowed to steps that are actually
/// ready (deduplicated, proposal order kept); if nothing legal remains the
/// fallback decision is used instead.
pub fn validate_decision(proposed: Decision, snapshot: &[Step]) -> Decision {
    let fallback = deterministic_replan(snapshot);

    if proposed.action != fallback.action {
        warn!(
            proposed = ?proposed.action,
            expected = ?fallback.action,
            "oracle decision disagrees with step statuses; using deterministic decision"
        );
        return fallback;
    }

    match proposed.action {
        Action::Dispatch => {
            let ready: HashSet<&str> = fallback.steps.iter().map(String::as_str).collect();
            let mut seen = HashSet::new();
            let mut legal = Vec::new();

            for name in proposed.steps {
                if !ready.contains(name.as_str()) {
                    warn!(step = %name, "oracle tried to dispatch a step that is not ready; dropping");
                    continue;
                }
                if seen.insert(name.clone()) {
                    legal.push(name);
                }
            }

            if legal.is_empty() {
                fallback
            } else {
                Decision::dispatch(legal)
            }
        }
        Action::Wait => Decision::wait(),
        Action::Complete => Decision::complete(),
    }
}

/// Oracle that only applies the deterministic rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicOracle;

impl ReplanOracle for DeterministicOracle {
    fn decide<'a>(
        &'a self,
        _run_id: &'a str,
        snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move { Ok(deterministic_replan(snapshot)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepSpec;

    fn step(name: &str, deps: &[&str], status: StepStatus) -> Step {
        let mut spec = StepSpec::new(name);
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        let mut s = Step::from_spec(spec);
        s.status = status;
        s
    }

    #[test]
    fn fan_out_after_root_done() {
        let snapshot = vec![
            step("a", &[], StepStatus::Done),
            step("b", &["a"], StepStatus::Pending),
            step("c", &["a"], StepStatus::Pending),
        ];
        assert_eq!(
            deterministic_replan(&snapshot),
            Decision::dispatch(vec!["b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn wait_while_running_and_nothing_ready() {
        let snapshot = vec![
            step("a", &[], StepStatus::Running),
            step("b", &["a"], StepStatus::Pending),
        ];
        assert_eq!(deterministic_replan(&snapshot), Decision::wait());
    }

    #[test]
    fn blocked_behind_failure_completes() {
        let snapshot = vec![
            step("a", &[], StepStatus::Failed),
            step("b", &["a"], StepStatus::Pending),
        ];
        assert_eq!(deterministic_replan(&snapshot), Decision::complete());
        assert_eq!(deterministic_replan(&[]), Decision::complete());
    }

    #[test]
    fn oracle_cannot_dispatch_unready_steps() {
        let snapshot = vec![
            step("a", &[], StepStatus::Done),
            step("b", &["a"], StepStatus::Pending),
            step("c", &["b"], StepStatus::Pending),
        ];
        let proposed = Decision::dispatch(vec!["c".to_string(), "b".to_string(), "b".to_string()]);
        assert_eq!(
            validate_decision(proposed, &snapshot),
            Decision::dispatch(vec!["b".to_string()])
        );

        let only_illegal = Decision::dispatch(vec!["c".to_string()]);
        assert_eq!(
            validate_decision(only_illegal, &snapshot),
            Decision::dispatch(vec!["b".to_string()])
        );
    }

    #[test]
    fn premature_complete_is_overruled() {
        let snapshot = vec![step("a", &[], StepStatus::Running)];
        assert_eq!(validate_decision(Decision::complete(), &snapshot), Decision::wait());
    }

    #[test]
    fn parse_plain_and_fenced_json() {
        let plain = Decision::parse(r#"{"action": "dispatch", "steps": ["b", "c"]}"#).unwrap();
        assert_eq!(plain, Decision::dispatch(vec!["b".to_string(), "c".to_string()]));

        let fenced = Decision::parse("```\n{\"action\": \"complete\"}\n```").unwrap();
        assert_eq!(fenced, Decision::complete());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Decision::parse("I think you should run b"),
            Err(StagedagError::OracleError(_))
        ));
        assert!(Decision::parse(r#"{"action": "retry"}"#).is_err());
        assert!(Decision::parse("").is_err());
    }
}
