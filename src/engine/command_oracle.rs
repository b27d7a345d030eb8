// src/engine/command_oracle.rs

//! Replan oracle backed by an external command.
//!
//! The command receives a JSON document on stdin:
//!
//! ```json
//! {"run_id": "r1", "steps": [{"step_name": "a", "status": "done",
//!   "depends_on": [], "result_summary": "ok", "error": null}]}
//! ```
//!
//! and must print a decision (`{"action": "dispatch", "steps": ["b"]}`) on
//! stdout. Anything else, a non-zero exit or a timeout is an oracle error,
//! which the scheduler answers with the deterministic fallback.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::engine::oracle::{Decision, ReplanOracle};
use crate::errors::{Result, StagedagError};
use crate::plan::Step;
use crate::types::{BoxFuture, StepStatus};

#[derive(Debug, Serialize)]
struct OracleRequest<'a> {
    run_id: &'a str,
    steps: Vec<StepState<'a>>,
}

#[derive(Debug, Serialize)]
struct StepState<'a> {
    step_name: &'a str,
    status: StepStatus,
    depends_on: &'a [String],
    result_summary: Option<&'a str>,
    error: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CommandOracle {
    cmd: String,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(cmd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cmd: cmd.into(),
            timeout,
        }
    }

    async fn ask(&self, run_id: &str, snapshot: &[Step]) -> Result<Decision> {
        let request = OracleRequest {
            run_id,
            steps: snapshot
                .iter()
                .map(|s| StepState {
                    step_name: &s.name,
                    status: s.status,
                    depends_on: &s.depends_on,
                    result_summary: s.result_summary.as_deref(),
                    error: s.error.as_deref(),
                })
                .collect(),
        };
        let payload = serde_json::to_vec(&request)?;

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // An oracle may answer without reading its input.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(run_id, error = %e, "oracle closed stdin early");
            }
            // Dropping stdin closes the pipe so the oracle sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                StagedagError::OracleError(format!("oracle timed out after {:?}", self.timeout))
            })??;

        if !output.status.success() {
            return Err(StagedagError::OracleError(format!(
                "oracle exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        debug!(run_id, response = %text.trim(), "oracle responded");
        Decision::parse(&text)
    }
}

impl ReplanOracle for CommandOracle {
    fn decide<'a>(
        &'a self,
        run_id: &'a str,
        snapshot: &'a [Step],
    ) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(self.ask(run_id, snapshot))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::oracle::Action;
    use crate::plan::StepSpec;

    fn snapshot() -> Vec<Step> {
        vec![Step::from_spec(StepSpec::new("a"))]
    }

    #[tokio::test]
    async fn parses_command_output() {
        let oracle = CommandOracle::new(
            r#"cat > /dev/null; echo '{"action": "dispatch", "steps": ["a"]}'"#,
            Duration::from_secs(5),
        );
        let d = oracle.decide("r1", &snapshot()).await.unwrap();
        assert_eq!(d.action, Action::Dispatch);
        assert_eq!(d.steps, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn receives_snapshot_on_stdin() {
        // grep only succeeds if the snapshot reached stdin.
        let oracle = CommandOracle::new(
            r#"grep -q '"step_name":"a"' && echo '{"action": "wait"}'"#,
            Duration::from_secs(5),
        );
        let d = oracle.decide("r1", &snapshot()).await.unwrap();
        assert_eq!(d, Decision::wait());
    }

    #[tokio::test]
    async fn failing_command_is_an_oracle_error() {
        let oracle = CommandOracle::new("exit 1", Duration::from_secs(5));
        assert!(matches!(
            oracle.decide("r1", &snapshot()).await,
            Err(StagedagError::OracleError(_))
        ));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let oracle = CommandOracle::new("sleep 5", Duration::from_millis(50));
        let err = oracle.decide("r1", &snapshot()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
