//! Pipeline execution.
//!
//! Running a pipeline happens in two phases. Planning flattens the pipeline,
//! composites included, into a DAG of compute steps and resolves every input
//! against the wiring, the run config and declared defaults. Configuration
//! problems surface here as [`ExecutionError`]s, before anything runs. The
//! runner then executes the plan in parallel and records one
//! [`StepOutcome`] per step.

mod plan;
mod result;
mod runner;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub use crate::engine::result::{ExecutionResult, StepOutcome, StepStatus};

use crate::compose::PipelineDef;
use crate::config::RunConfig;
use crate::core::{Hash32, Resources};
use crate::engine::plan::Plan;
use crate::error::ExecutionError;

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

fn run_id(pipeline: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|time| time.as_nanos())
        .unwrap_or_default();
    let counter = NEXT_RUN.fetch_add(1, Ordering::Relaxed);

    let mut hex = Hash32::hash(format!("{pipeline}:{nanos}:{counter}")).to_hex();
    hex.truncate(16);
    hex
}

pub(crate) fn execute(
    pipeline: &PipelineDef,
    config: &RunConfig,
    resources: &Resources,
) -> Result<ExecutionResult, ExecutionError> {
    let plan = Plan::build(pipeline.graph(), &config.solids)?;
    let run_id = run_id(pipeline.name());

    let span = tracing::info_span!("run", pipeline = pipeline.name(), run_id = %run_id);
    let _enter = span.enter();

    tracing::info!(steps = plan.graph.node_count(), "starting run");
    let steps = runner::run(&plan, &run_id, resources)?;
    let result = ExecutionResult::new(run_id, pipeline.name(), &plan, steps);

    if result.success() {
        tracing::info!("run succeeded");
    } else {
        tracing::warn!(failures = result.failures().count(), "run finished with failures");
    }

    Ok(result)
}
