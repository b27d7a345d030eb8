// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::PlanFile;
use crate::dag::DagGraph;
use crate::engine::{
    CommandOracle, PipelineScheduler, ReplanOracle, RunReport, SchedulerDeps, SchedulerOptions,
};
use crate::exec::{CommandHandler, HandlerRegistry, StepExecutor};
use crate::plan::FilePlanBuilder;
use crate::store::{MemoryRunStore, MemoryStepStore};
use crate::types::RunOutcome;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading and validation
/// - in-memory step and run stores
/// - the `command` handler and the optional oracle command
/// - the scheduler, then prints the final report
pub async fn run(args: CliArgs) -> Result<()> {
    let plan_path = PathBuf::from(&args.plan);
    let plan = load_and_validate(&plan_path)?;

    if args.dry_run {
        print_dry_run(&plan);
        return Ok(());
    }

    let run_id = args.run_id.clone().unwrap_or_else(default_run_id);
    let report = execute_plan(&plan, &run_id, args.oracle_cmd.as_deref()).await?;

    print_report(&report);

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        outcome => bail!(
            "run {} {outcome}: {}",
            report.run_id,
            report.reason.as_deref().unwrap_or("no reason recorded")
        ),
    }
}

/// Run a validated plan to a terminal state with the built-in handlers.
///
/// `oracle_cmd` overrides `[config].oracle_cmd` when set.
pub async fn execute_plan(
    plan: &PlanFile,
    run_id: &str,
    oracle_cmd: Option<&str>,
) -> Result<RunReport> {
    let step_store = Arc::new(MemoryStepStore::new());
    let run_store = Arc::new(MemoryRunStore::new());
    run_store.create_run(run_id);

    let registry = HandlerRegistry::new().with(
        "command",
        Arc::new(CommandHandler::new(plan.config.skip_exit_code)),
    );
    let executor = StepExecutor::new(
        step_store.clone(),
        registry,
        plan.config.critical.iter().cloned(),
    );

    let oracle: Option<Arc<dyn ReplanOracle>> = oracle_cmd
        .or(plan.config.oracle_cmd.as_deref())
        .map(|cmd| {
            info!(cmd, "using external replan oracle");
            Arc::new(CommandOracle::new(cmd, plan.oracle_timeout())) as Arc<dyn ReplanOracle>
        });

    let deps = SchedulerDeps {
        plan_builder: Arc::new(FilePlanBuilder::new(plan)),
        step_store,
        run_store,
        oracle,
        executor,
    };
    let options = SchedulerOptions {
        cancel_grace: plan.cancel_grace(),
    };

    let report = PipelineScheduler::new(run_id, deps, options).start().await?;
    Ok(report)
}

/// `run-YYYYmmddHHMMSS` in UTC.
fn default_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d%H%M%S"))
}

fn print_report(report: &RunReport) {
    println!("run {}: {}", report.run_id, report.outcome);
    if let Some(ref reason) = report.reason {
        println!("  reason: {reason}");
    }

    for step in &report.steps {
        let detail = step
            .error
            .as_deref()
            .or(step.result_summary.as_deref())
            .unwrap_or("");
        if detail.is_empty() {
            println!("  {:<8} {}", step.status, step.name);
        } else {
            println!("  {:<8} {}  {detail}", step.status, step.name);
        }
    }

    if !report.blocked.is_empty() {
        println!("  never ran: {}", report.blocked.join(", "));
    }
}

/// Print steps in dependency order with their agent, label and deps.
fn print_dry_run(plan: &PlanFile) {
    println!("stagedag dry-run");
    if !plan.config.critical.is_empty() {
        println!("  config.critical = {:?}", plan.config.critical);
    }
    println!("  config.cancel_grace = {:?}", plan.cancel_grace());
    if let Some(code) = plan.config.skip_exit_code {
        println!("  config.skip_exit_code = {code}");
    }
    if let Some(ref cmd) = plan.config.oracle_cmd {
        println!("  config.oracle_cmd = {cmd}");
        println!("  config.oracle_timeout = {:?}", plan.oracle_timeout());
    }
    println!();

    let specs = plan.step_specs();
    let graph = DagGraph::from_specs(&specs);
    let order: Vec<&str> = graph
        .topological_order()
        .unwrap_or_else(|| specs.iter().map(|s| s.name.as_str()).collect());

    println!("steps ({}):", specs.len());
    for name in order {
        let Some(spec) = specs.iter().find(|s| s.name == name) else {
            continue;
        };
        println!("  - {name}");
        println!("      agent: {}", spec.agent);
        if let Some(ref label) = spec.label {
            println!("      label: {label}");
        }
        if !spec.depends_on.is_empty() {
            println!("      after: {:?}", spec.depends_on);
        }
        let dependents = graph.dependents_of(name);
        if !dependents.is_empty() {
            println!("      unblocks: {dependents:?}");
        }
        if let Some(cmd) = spec.params.get("cmd").and_then(|v| v.as_str()) {
            println!("      cmd: {cmd}");
        }
        if plan.config.critical.iter().any(|c| c == name) {
            println!("      critical: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
