#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod compose;
mod config;
mod core;
mod engine;
mod error;
mod lakehouse;
mod solid;

pub use crate::compose::{GraphBuilder, Handle, IntoSource, Invocation, PipelineDef, Returns};
pub use crate::config::{InputValue, RunConfig, SolidConfig};
pub use crate::core::{DagType, Resources, SolidContext};
pub use crate::engine::{ExecutionResult, StepOutcome, StepStatus};
pub use crate::error::*;
#[cfg(feature = "csv")]
pub use crate::lakehouse::CsvLakehouse;
#[cfg(feature = "parquet")]
pub use crate::lakehouse::ParquetLakehouse;
pub use crate::lakehouse::{
    Frame, LAKEHOUSE_PIPELINE, LAKEHOUSE_RESOURCE, Lakehouse, MemLakehouse, Row, TableBuilder,
    TableDef, Value, build_lakehouse, build_lakehouse_with, lakehouse_pipeline,
};
pub use crate::solid::{DEFAULT_OUTPUT, InputDef, Inputs, OutputDef, Outputs, SolidBuilder, SolidDef};

/// Installs a global `tracing` subscriber printing events to stderr, with
/// progress bars for running steps.
///
/// The filter is read from `RUST_LOG` and defaults to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif_layer = IndicatifLayer::new();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(indicatif_layer.get_stderr_writer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}
