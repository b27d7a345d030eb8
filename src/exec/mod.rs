// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`handler`] defines the [`StepHandler`] seam, the skip/failure error
//!   split and the name/agent keyed [`HandlerRegistry`].
//! - [`lifecycle`] owns the per-step state machine
//!   (`running -> done | skipped | failed`) and its store writes.
//! - [`command`] is the built-in handler that runs shell commands.

pub mod command;
pub mod handler;
pub mod lifecycle;

pub use command::CommandHandler;
pub use handler::{HandlerError, HandlerRegistry, StepContext, StepHandler};
pub use lifecycle::{CriticalFailure, StepExecutor, StepOutcome};
