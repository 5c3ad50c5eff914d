use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;
use rayon::Yield;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Dynamic, Resources, SolidContext};
use crate::engine::plan::{Plan, Resolved, Step};
use crate::engine::result::{StepOutcome, StepStatus};
use crate::error::{ExecutionError, StepError};
use crate::solid::{Inputs, Outputs};

type Message = (NodeIndex, Result<Vec<Dynamic>, StepError>, Instant, Duration);

fn style_steps() -> Result<ProgressStyle, ExecutionError> {
    Ok(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )?
    .progress_chars("=>-"))
}

fn style_step() -> Result<ProgressStyle, ExecutionError> {
    Ok(ProgressStyle::with_template("{spinner:.blue} {msg}")?)
}

/// Executes the plan on the rayon thread pool. Steps are started as soon as
/// every step they depend on has completed.
///
/// The scheduling loop runs on the calling thread and only the steps
/// themselves go to the pool. The calling thread keeps, for each step, the number of upstream steps that
/// have not yet succeeded. Steps with no pending upstream are spawned right
/// away; every successful completion decrements the counters of its
/// dependents and spawns the ones reaching zero. A failed step never
/// decrements anything, so everything downstream of it is recorded as
/// skipped instead.
///
/// The returned outcomes are in plan order.
pub(crate) fn run(
    plan: &Plan,
    run_id: &str,
    resources: &Resources,
) -> Result<Vec<StepOutcome>, ExecutionError> {
    petgraph::algo::toposort(&plan.graph, None).map_err(|_| ExecutionError::Cycle)?;

    let graph = &plan.graph;
    let total = graph.node_count();

    let mut pending: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|index| {
            let count = graph.neighbors_directed(index, Direction::Incoming).count();
            (index, count)
        })
        .collect();

    let mut outcomes: HashMap<NodeIndex, StepOutcome> = HashMap::new();
    let mut values: HashMap<NodeIndex, Vec<Dynamic>> = HashMap::new();

    if total == 0 {
        return Ok(Vec::new());
    }

    let root_span = tracing::span!(Level::INFO, "building_steps");
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&style_steps()?);
    root_span.pb_set_message("Running steps...");
    let _enter = root_span.enter();

    let pb_style = style_step()?;

    rayon::in_place_scope(|s| -> Result<(), ExecutionError> {
        let (sender, receiver) = channel::<Message>();

        let spawn_step = |values: &HashMap<NodeIndex, Vec<Dynamic>>, index: NodeIndex| {
            let step = &graph[index];
            let inputs = gather(step, values);
            let sender = sender.clone();
            let pb_style = pb_style.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "step", name = step.key.as_str());
                span.pb_set_style(&pb_style);
                span.pb_set_message(&format!("Running {}", step.key));
                let _enter = span.enter();

                let start = Instant::now();
                let result = inputs.and_then(|inputs| {
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        invoke(step, &inputs, run_id, resources, span.clone())
                    }))
                    .unwrap_or_else(|panic| Err(StepError::Panic(panic_message(&*panic))))
                });

                // The receiver outlives every spawned step.
                let _ = sender.send((index, result, start, start.elapsed()));
            });
        };

        for index in graph.node_indices() {
            if pending.get(&index).copied().unwrap_or(0) == 0 {
                spawn_step(&values, index);
            }
        }

        while outcomes.len() < total {
            let (index, result, start, duration) = next_message(&receiver)?;
            let step = &graph[index];
            root_span.pb_inc(1);

            let outputs = match result {
                Ok(outputs) => outputs,
                Err(error) => {
                    tracing::warn!(step = %step.key, %error, "step failed");
                    outcomes.insert(
                        index,
                        StepOutcome {
                            key: step.key.clone(),
                            status: StepStatus::Failed(error),
                            start: Some(start),
                            duration,
                            outputs: Vec::new(),
                        },
                    );

                    let skipped = skip_downstream(plan, index, &mut outcomes);
                    root_span.pb_inc(skipped);
                    continue;
                }
            };

            tracing::info!(step = %step.key, elapsed = ?duration, "step completed");

            let named = step
                .solid
                .outputs()
                .iter()
                .map(|def| def.name().to_string())
                .zip(outputs.iter().cloned())
                .collect();

            outcomes.insert(
                index,
                StepOutcome {
                    key: step.key.clone(),
                    status: StepStatus::Succeeded,
                    start: Some(start),
                    duration,
                    outputs: named,
                },
            );
            values.insert(index, outputs);

            for dependent in graph.neighbors_directed(index, Direction::Outgoing) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        spawn_step(&values, dependent);
                    }
                }
            }
        }

        Ok(())
    })?;

    let mut outcomes: Vec<_> = outcomes.into_iter().collect();
    outcomes.sort_by_key(|(index, _)| *index);

    Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
}

/// Waits for the next finished step.
///
/// On a pool worker, blocking would starve the steps queued behind it, so
/// the wait runs pending pool jobs until a message arrives.
fn next_message(receiver: &Receiver<Message>) -> Result<Message, ExecutionError> {
    loop {
        match receiver.try_recv() {
            Ok(message) => return Ok(message),
            Err(TryRecvError::Disconnected) => return Err(std::sync::mpsc::RecvError.into()),
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            None => return Ok(receiver.recv()?),
            Some(Yield::Executed) => {}
            Some(Yield::Idle) => match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(message) => return Ok(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(std::sync::mpsc::RecvError.into());
                }
            },
        }
    }
}

/// Collects the input values of `step`, checking them against the declared
/// input types.
fn gather(step: &Step, values: &HashMap<NodeIndex, Vec<Dynamic>>) -> Result<Vec<Dynamic>, StepError> {
    step.solid
        .inputs()
        .iter()
        .zip(&step.inputs)
        .map(|(def, resolved)| {
            let value = match resolved {
                Resolved::Step { node, output } => values
                    .get(node)
                    .and_then(|outputs| outputs.get(*output))
                    .cloned()
                    .ok_or_else(|| StepError::MissingInput(def.name().to_string()))?,
                Resolved::Value(value) => value.clone(),
                Resolved::Missing => return Err(StepError::MissingInput(def.name().to_string())),
            };

            if !def.dag_type().admits(&value) {
                return Err(StepError::InputType {
                    input: def.name().to_string(),
                    expected: def.dag_type().name(),
                });
            }

            Ok(value)
        })
        .collect()
}

fn invoke(
    step: &Step,
    inputs: &[Dynamic],
    run_id: &str,
    resources: &Resources,
    span: tracing::Span,
) -> Result<Vec<Dynamic>, StepError> {
    let context = SolidContext {
        step: &step.key,
        run_id,
        config: step.config.as_ref(),
        resources,
        span,
    };

    let inputs = Inputs::new(step.solid.inputs(), inputs);
    let mut outputs = Outputs::new(step.solid.outputs());

    (step.compute)(&context, &inputs, &mut outputs).map_err(into_step_error)?;
    outputs.finish()
}

/// Errors raised through the step API keep their variant.
fn into_step_error(error: anyhow::Error) -> StepError {
    match error.downcast::<StepError>() {
        Ok(error) => error,
        Err(error) => StepError::Compute(error),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown payload")
    }
}

/// Marks every step reachable from `failed` as skipped, returning how many
/// were newly marked.
fn skip_downstream(
    plan: &Plan,
    failed: NodeIndex,
    outcomes: &mut HashMap<NodeIndex, StepOutcome>,
) -> u64 {
    let mut dfs = Dfs::new(&plan.graph, failed);
    let mut skipped = 0;

    while let Some(index) = dfs.next(&plan.graph) {
        if index == failed || outcomes.contains_key(&index) {
            continue;
        }

        let key = &plan.graph[index].key;
        tracing::warn!(step = %key, "step skipped");
        outcomes.insert(index, StepOutcome::skipped(key));
        skipped += 1;
    }

    skipped
}
