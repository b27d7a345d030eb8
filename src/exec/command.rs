// src/exec/command.rs

//! Built-in handler running a step's `cmd` parameter as a shell command.

use std::process::Stdio;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::handler::{HandlerError, StepContext, StepHandler};
use crate::types::BoxFuture;

/// Runs `params.cmd` through the platform shell.
///
/// - exit 0: done, summary is the last non-empty stdout line
/// - exit == `skip_exit_code`: skipped, same summary rule
/// - anything else: failed
///
/// Cancellation kills the child process.
#[derive(Debug, Clone, Default)]
pub struct CommandHandler {
    skip_exit_code: Option<i32>,
}

impl CommandHandler {
    pub fn new(skip_exit_code: Option<i32>) -> Self {
        Self { skip_exit_code }
    }

    async fn run_inner(&self, ctx: &StepContext) -> Result<String, HandlerError> {
        let cmd_line = ctx
            .param_str("cmd")
            .ok_or_else(|| anyhow!("step '{}' has no `cmd` parameter", ctx.step))?;

        info!(run_id = %ctx.run_id, step = %ctx.step, cmd = %cmd_line, "starting step process");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(cmd_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(cmd_line);
            c
        };

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("STAGEDAG_RUN_ID", &ctx.run_id)
            .env("STAGEDAG_STEP", &ctx.step)
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for step '{}'", ctx.step))?;

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            let step = ctx.step.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(step = %step, "stderr: {}", line);
                }
            });
        }

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut last = None;
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        last = Some(trimmed.to_string());
                    }
                }
                last
            })
        });

        let status = tokio::select! {
            status = child.wait() => status
                .with_context(|| format!("waiting for process of step '{}'", ctx.step))?,

            _ = ctx.cancel.cancelled() => {
                info!(step = %ctx.step, "cancellation requested; killing process");
                if let Err(e) = child.kill().await {
                    warn!(step = %ctx.step, error = %e, "failed to kill child process");
                }
                return Err(anyhow!("step '{}' cancelled", ctx.step).into());
            }
        };

        let last_line = match stdout_task {
            Some(task) => task.await.unwrap_or(None),
            None => None,
        };
        let code = status.code().unwrap_or(-1);

        info!(
            step = %ctx.step,
            exit_code = code,
            success = status.success(),
            "step process exited"
        );

        if status.success() {
            return Ok(last_line.unwrap_or_else(|| "exit 0".to_string()));
        }

        if Some(code) == self.skip_exit_code {
            return Err(HandlerError::Skip(
                last_line.unwrap_or_else(|| format!("exit {code}")),
            ));
        }

        let detail = last_line.map(|l| format!(": {l}")).unwrap_or_default();
        Err(anyhow!("command exited with code {code}{detail}").into())
    }
}

impl StepHandler for CommandHandler {
    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<String, HandlerError>> {
        Box::pin(self.run_inner(ctx))
    }
}
