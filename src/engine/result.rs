use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use console::style;

use crate::core::Dynamic;
use crate::engine::plan::{Plan, Resolved};
use crate::error::StepError;

/// Terminal state of one step.
#[derive(Debug)]
pub enum StepStatus {
    Succeeded,
    Failed(StepError),
    /// Not run because an upstream step failed.
    Skipped,
}

/// What happened to one step of a run.
#[derive(Debug)]
pub struct StepOutcome {
    pub(crate) key: String,
    pub(crate) status: StepStatus,
    pub(crate) start: Option<Instant>,
    pub(crate) duration: Duration,
    pub(crate) outputs: Vec<(String, Dynamic)>,
}

impl StepOutcome {
    pub(crate) fn skipped(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: StepStatus::Skipped,
            start: None,
            duration: Duration::ZERO,
            outputs: Vec::new(),
        }
    }

    /// Fully qualified step name.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> &StepStatus {
        &self.status
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&StepError> {
        match &self.status {
            StepStatus::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// When the step started, `None` if it never ran.
    pub fn start(&self) -> Option<Instant> {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The value emitted on `output`, if the step succeeded and it is a `T`.
    pub fn output<T: 'static>(&self, output: &str) -> Option<&T> {
        self.outputs
            .iter()
            .find(|(name, _)| name == output)
            .and_then(|(_, value)| value.downcast_ref::<T>())
    }
}

/// The outcome of executing a pipeline.
///
/// Steps are addressed by their qualified name: `adder` for a top-level
/// invocation, `add_both.adder_a` for a step nested in a composite.
#[derive(Debug)]
pub struct ExecutionResult {
    run_id: String,
    pipeline: String,
    steps: Vec<StepOutcome>,
    outputs: Vec<(String, Option<Dynamic>)>,
}

impl ExecutionResult {
    pub(crate) fn new(run_id: String, pipeline: &str, plan: &Plan, steps: Vec<StepOutcome>) -> Self {
        let outputs = plan
            .outputs
            .iter()
            .map(|(name, resolved)| {
                let value = match resolved {
                    Resolved::Step { node, output } => steps
                        .get(node.index())
                        .and_then(|step| step.outputs.get(*output))
                        .map(|(_, value)| value.clone()),
                    Resolved::Value(value) => Some(value.clone()),
                    Resolved::Missing => None,
                };
                (name.clone(), value)
            })
            .collect();

        Self {
            run_id,
            pipeline: pipeline.to_string(),
            steps,
            outputs,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline
    }

    /// `true` when every step succeeded.
    pub fn success(&self) -> bool {
        self.steps.iter().all(StepOutcome::succeeded)
    }

    /// All steps, in plan order.
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    pub fn step(&self, key: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|step| step.key == key)
    }

    /// Value of output `output` of step `key`.
    pub fn output_value<T: 'static>(&self, key: &str, output: &str) -> Option<&T> {
        self.step(key)?.output(output)
    }

    /// Value of a single-output step.
    pub fn value<T: 'static>(&self, key: &str) -> Option<&T> {
        match self.step(key)?.outputs.as_slice() {
            [(_, value)] => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Value of one of the pipeline's own outputs.
    pub fn pipeline_output<T: 'static>(&self, name: &str) -> Option<&T> {
        self.outputs
            .iter()
            .find(|(output, _)| output == name)
            .and_then(|(_, value)| value.as_ref())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &StepError)> {
        self.steps
            .iter()
            .filter_map(|step| step.error().map(|error| (step.key(), error)))
    }

    /// Human readable, colored summary of the run.
    pub fn render_summary(&self) -> String {
        self.to_string()
    }
}

impl Display for ExecutionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let count = |check: fn(&StepStatus) -> bool| {
            self.steps.iter().filter(|step| check(&step.status)).count()
        };

        let succeeded = count(|status| matches!(status, StepStatus::Succeeded));
        let failed = count(|status| matches!(status, StepStatus::Failed(_)));
        let skipped = count(|status| matches!(status, StepStatus::Skipped));

        writeln!(
            f,
            "Run {} of {}: {} succeeded, {} failed, {} skipped",
            style(&self.run_id).dim(),
            style(&self.pipeline).bold(),
            style(succeeded).green(),
            style(failed).red(),
            style(skipped).yellow(),
        )?;

        for step in &self.steps {
            match &step.status {
                StepStatus::Succeeded => writeln!(
                    f,
                    "  {} {} ({:.2?})",
                    style("ok").green(),
                    step.key,
                    step.duration
                )?,
                StepStatus::Failed(error) => writeln!(
                    f,
                    "  {} {}: {}",
                    style("failed").red().bold(),
                    step.key,
                    error
                )?,
                StepStatus::Skipped => {
                    writeln!(f, "  {} {}", style("skipped").yellow(), step.key)?
                }
            }
        }

        Ok(())
    }
}
