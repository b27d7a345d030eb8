// src/exec/handler.rs

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::plan::{Params, Step};
use crate::types::BoxFuture;

/// Why a handler did not produce a summary.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Nothing to do for the current inputs. Not an error: the step is
    /// recorded `skipped` and still satisfies its dependents.
    #[error("skipped: {0}")]
    Skip(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn skip(reason: impl Into<String>) -> Self {
        HandlerError::Skip(reason.into())
    }
}

/// Everything a handler gets to see about the step it runs.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub step: String,
    pub agent: String,
    pub params: Params,
    /// Fired when the run aborts. Long-running handlers should watch it.
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(run_id: &str, step: &Step, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.to_string(),
            step: step.name.clone(),
            agent: step.agent.clone(),
            params: step.params.clone(),
            cancel,
        }
    }

    /// String parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// The work behind one step. Returns a one-line result summary.
pub trait StepHandler: Send + Sync {
    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<String, HandlerError>>;
}

/// Handlers keyed by step name or agent tag.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerRegistry").field("keys", &keys).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    pub fn with(mut self, key: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.register(key, handler);
        self
    }

    /// Handler registered under the step's name, else under its agent tag.
    pub fn resolve(&self, step: &Step) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .get(&step.name)
            .or_else(|| self.handlers.get(&step.agent))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepSpec;

    struct Fixed(&'static str);

    impl StepHandler for Fixed {
        fn run<'a>(&'a self, _ctx: &'a StepContext) -> BoxFuture<'a, Result<String, HandlerError>> {
            Box::pin(async move { Ok(self.0.to_string()) })
        }
    }

    #[tokio::test]
    async fn name_takes_precedence_over_agent() {
        let registry = HandlerRegistry::new()
            .with("fetch", Arc::new(Fixed("by-name")))
            .with("command", Arc::new(Fixed("by-agent")));

        let mut spec = StepSpec::new("fetch");
        spec.agent = "command".to_string();
        let step = Step::from_spec(spec);
        let ctx = StepContext::new("r", &step, CancellationToken::new());

        let handler = registry.resolve(&step).unwrap();
        assert_eq!(handler.run(&ctx).await.unwrap(), "by-name");

        let mut other = StepSpec::new("report");
        other.agent = "command".to_string();
        let other = Step::from_spec(other);
        let handler = registry.resolve(&other).unwrap();
        assert_eq!(handler.run(&ctx).await.unwrap(), "by-agent");

        assert!(registry.resolve(&Step::from_spec(StepSpec::new("x"))).is_none());
    }
}
