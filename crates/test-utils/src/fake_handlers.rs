#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Notify;
use tokio::time::Instant;

use stagedag::exec::{HandlerError, StepContext, StepHandler};
use stagedag::types::BoxFuture;

/// What a [`ScriptedHandler`] does when invoked.
#[derive(Clone)]
pub enum Script {
    Succeed(String),
    Skip(String),
    Fail(String),
    Panic(String),
    /// Sleep, then succeed.
    Sleep(Duration, String),
    /// Sleep, then fail.
    SleepThenFail(Duration, String),
    /// Wait until the gate is notified, then succeed.
    Gate(Arc<Notify>, String),
    /// Never return.
    Hang,
}

pub struct ScriptedHandler {
    script: Script,
}

impl ScriptedHandler {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl StepHandler for ScriptedHandler {
    fn run<'a>(&'a self, _ctx: &'a StepContext) -> BoxFuture<'a, Result<String, HandlerError>> {
        Box::pin(async move {
            match self.script {
                Script::Succeed(ref s) => Ok(s.clone()),
                Script::Skip(ref r) => Err(HandlerError::skip(r.clone())),
                Script::Fail(ref e) => Err(HandlerError::Failed(anyhow!("{e}"))),
                Script::Panic(ref msg) => panic!("{msg}"),
                Script::Sleep(d, ref s) => {
                    tokio::time::sleep(d).await;
                    Ok(s.clone())
                }
                Script::SleepThenFail(d, ref e) => {
                    tokio::time::sleep(d).await;
                    Err(HandlerError::Failed(anyhow!("{e}")))
                }
                Script::Gate(ref gate, ref s) => {
                    gate.notified().await;
                    Ok(s.clone())
                }
                Script::Hang => std::future::pending().await,
            }
        })
    }
}

pub fn succeed(summary: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Succeed(summary.to_string())))
}

pub fn skip(reason: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Skip(reason.to_string())))
}

pub fn fail(error: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Fail(error.to_string())))
}

pub fn panics(msg: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Panic(msg.to_string())))
}

pub fn sleep_then_succeed(ms: u64, summary: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Sleep(
        Duration::from_millis(ms),
        summary.to_string(),
    )))
}

pub fn sleep_then_fail(ms: u64, error: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::SleepThenFail(
        Duration::from_millis(ms),
        error.to_string(),
    )))
}

pub fn gated(gate: Arc<Notify>, summary: &str) -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Gate(gate, summary.to_string())))
}

pub fn hangs() -> Arc<dyn StepHandler> {
    Arc::new(ScriptedHandler::new(Script::Hang))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Started(String),
    Finished(String),
}

/// Shared, ordered log of handler starts and finishes.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    events: Arc<Mutex<Vec<(ExecEvent, Instant)>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ExecEvent) {
        self.events.lock().unwrap().push((event, Instant::now()));
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Step names in the order their handlers started.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExecEvent::Started(name) => Some(name),
                ExecEvent::Finished(_) => None,
            })
            .collect()
    }

    pub fn position(&self, event: &ExecEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn count_started(&self, name: &str) -> usize {
        self.started().iter().filter(|n| *n == name).count()
    }
}

/// Wraps a handler and records when it starts and returns.
pub struct Recording {
    inner: Arc<dyn StepHandler>,
    log: ExecutionLog,
}

impl Recording {
    pub fn wrap(inner: Arc<dyn StepHandler>, log: &ExecutionLog) -> Arc<dyn StepHandler> {
        Arc::new(Self {
            inner,
            log: log.clone(),
        })
    }
}

impl StepHandler for Recording {
    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<String, HandlerError>> {
        Box::pin(async move {
            self.log.push(ExecEvent::Started(ctx.step.clone()));
            let result = self.inner.run(ctx).await;
            self.log.push(ExecEvent::Finished(ctx.step.clone()));
            result
        })
    }
}
