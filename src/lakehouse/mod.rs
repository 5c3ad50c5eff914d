//! Named tables materialized into a pluggable lakehouse.
//!
//! A table is a solid producing a single [`Frame`]. Tables may consume other
//! tables; [`build_lakehouse`] walks those dependencies, generates a pipeline
//! wiring every table to the tables it reads, runs it, and persists each frame
//! through the chosen [`Lakehouse`] as soon as its table has been computed.
//!
//! ```
//! use std::sync::Arc;
//!
//! use kumiki::{Frame, MemLakehouse, RunConfig, TableDef, build_lakehouse, row};
//!
//! let one = TableDef::builder("TableOne")
//!     .input::<i64>("num")
//!     .compute_rows(|_, inputs| Ok([row! { "num" => *inputs.get::<i64>("num")? }]))?;
//! let two = TableDef::builder("TableTwo").compute_rows(|_, _| Ok([row! { "num" => 2 }]))?;
//! let three = TableDef::builder("TableThree")
//!     .input_table("table_one", &one)
//!     .input_table("table_two", &two)
//!     .compute(|_, inputs| {
//!         let one = inputs.get::<Frame>("table_one")?.clone();
//!         Ok(one.union(inputs.get::<Frame>("table_two")?.clone())?)
//!     })?;
//!
//! let lakehouse = Arc::new(MemLakehouse::new());
//! let config = RunConfig::new().with_input("TableOne", "num", 1);
//! let result = build_lakehouse(&[one, two, three], lakehouse.clone(), &config)?;
//!
//! assert!(result.success());
//! assert_eq!(lakehouse.collected_tables()["TableThree"].len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(any(feature = "csv", feature = "parquet"))]
mod batch;
#[cfg(feature = "csv")]
mod csv;
mod frame;
mod memory;
#[cfg(feature = "parquet")]
mod parquet;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[cfg(any(feature = "csv", feature = "parquet"))]
use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;

#[cfg(feature = "csv")]
pub use crate::lakehouse::csv::CsvLakehouse;
pub use crate::lakehouse::frame::{Frame, Row, Value};
pub use crate::lakehouse::memory::MemLakehouse;
#[cfg(feature = "parquet")]
pub use crate::lakehouse::parquet::ParquetLakehouse;

use crate::compose::{Invocation, PipelineDef, Returns};
use crate::config::RunConfig;
use crate::core::{Resources, SolidContext};
use crate::engine::ExecutionResult;
use crate::error::{BuildError, DefinitionError, LakehouseError};
use crate::solid::{DEFAULT_OUTPUT, Inputs, SolidBuilder, SolidDef, is_valid_name};

/// Name under which the lakehouse is registered as a run resource.
pub const LAKEHOUSE_RESOURCE: &str = "lakehouse";

/// Name of the pipeline generated by [`build_lakehouse`].
pub const LAKEHOUSE_PIPELINE: &str = "lakehouse";

/// Storage for materialized tables.
pub trait Lakehouse: Send + Sync {
    /// Stores `frame` as the contents of `table`, replacing earlier contents.
    fn persist(&self, table: &str, frame: &Frame) -> Result<(), LakehouseError>;

    /// Reads back the contents of `table`.
    fn read(&self, table: &str) -> Result<Frame, LakehouseError>;
}

/// A declared table: a solid whose single `result` output is a [`Frame`].
#[derive(Clone, Debug)]
pub struct TableDef {
    solid: SolidDef,
    tables: Vec<(String, TableDef)>,
}

impl TableDef {
    pub fn builder(name: &str) -> TableBuilder {
        TableBuilder {
            name: name.to_string(),
            solid: SolidDef::builder(name),
            tables: Vec::new(),
            columns: None,
        }
    }

    pub fn name(&self) -> &str {
        self.solid.name()
    }

    /// The underlying solid. Invoking it outside of [`build_lakehouse`]
    /// requires a [`LAKEHOUSE_RESOURCE`] resource.
    pub fn solid(&self) -> &SolidDef {
        &self.solid
    }

    /// Table inputs as `(input name, table)` pairs.
    pub fn input_tables(&self) -> impl Iterator<Item = (&str, &TableDef)> {
        self.tables.iter().map(|(input, table)| (input.as_str(), table))
    }
}

/// Builder returned by [`TableDef::builder`].
pub struct TableBuilder {
    name: String,
    solid: SolidBuilder,
    tables: Vec<(String, TableDef)>,
    columns: Option<Vec<String>>,
}

impl TableBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.solid = self.solid.description(description);
        self
    }

    /// Declares a scalar input, supplied through run config.
    pub fn input<T>(mut self, name: &str) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.solid = self.solid.input::<T>(name);
        self
    }

    pub fn input_with_default<T>(mut self, name: &str, value: T) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.solid = self.solid.input_with_default(name, value);
        self
    }

    /// Declares input `name`, fed with the frame of `table`.
    pub fn input_table(mut self, name: &str, table: &TableDef) -> Self {
        self.solid = self.solid.wired_input::<Frame>(name);
        self.tables.push((name.to_string(), table.clone()));
        self
    }

    /// Finishes a table computed as a whole frame.
    pub fn compute<F>(self, callback: F) -> Result<TableDef, DefinitionError>
    where
        F: Fn(&SolidContext<'_>, &Inputs<'_>) -> anyhow::Result<Frame> + Send + Sync + 'static,
    {
        let name = self.name;
        let solid = self
            .solid
            .output::<Frame>(DEFAULT_OUTPUT)
            .compute(move |ctx, inputs, outputs| {
                let frame = callback(ctx, inputs)?;
                materialize(ctx, &name, &frame)?;
                outputs.emit(DEFAULT_OUTPUT, frame)?;
                Ok(())
            })?;

        Ok(TableDef {
            solid,
            tables: self.tables,
        })
    }

    /// Declares the columns of a table built with
    /// [`compute_rows`](Self::compute_rows). Every row must match them, and
    /// a run yielding no rows still produces a frame with these columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Finishes a table whose function yields rows one by one.
    pub fn compute_rows<F, I>(mut self, callback: F) -> Result<TableDef, DefinitionError>
    where
        F: Fn(&SolidContext<'_>, &Inputs<'_>) -> anyhow::Result<I> + Send + Sync + 'static,
        I: IntoIterator<Item = Row>,
    {
        let columns = self.columns.take();

        self.compute(move |ctx, inputs| {
            let rows = callback(ctx, inputs)?;
            let Some(columns) = &columns else {
                return Ok(Frame::from_rows(rows)?);
            };

            let mut frame = Frame::new(columns.iter().cloned());
            for row in rows {
                frame.push(row)?;
            }
            Ok(frame)
        })
    }
}

fn materialize(ctx: &SolidContext<'_>, table: &str, frame: &Frame) -> anyhow::Result<()> {
    let lakehouse = ctx.resource::<Arc<dyn Lakehouse>>(LAKEHOUSE_RESOURCE)?;
    lakehouse.persist(table, frame)?;

    tracing::info!(table, rows = frame.len(), "materialized table");
    Ok(())
}

/// Table names follow the solid naming rules, on every backend.
fn check_table(table: &str) -> Result<(), LakehouseError> {
    if is_valid_name(table) {
        Ok(())
    } else {
        Err(LakehouseError::InvalidTableName(table.to_string()))
    }
}

/// Empties the directory of a table, creating it if needed.
#[cfg(any(feature = "csv", feature = "parquet"))]
fn reset_dir(dir: Utf8PathBuf) -> Result<Utf8PathBuf, LakehouseError> {
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Zero-byte parts hold a table without columns.
#[cfg(any(feature = "csv", feature = "parquet"))]
fn is_blank(path: &Utf8Path) -> Result<bool, LakehouseError> {
    Ok(std::fs::metadata(path)?.len() == 0)
}

/// Part files of a table with the extension `ext`, in name order.
#[cfg(any(feature = "csv", feature = "parquet"))]
fn parts(dir: &Utf8Path, table: &str, ext: &str) -> Result<Vec<Utf8PathBuf>, LakehouseError> {
    if !dir.is_dir() {
        return Err(LakehouseError::TableNotFound(table.to_string()));
    }

    let pattern = format!("{}/*.{ext}", glob::Pattern::escape(dir.as_str()));
    let mut parts = glob::glob(&pattern)?
        .map(|path| Ok(Utf8PathBuf::try_from(path?)?))
        .collect::<Result<Vec<_>, LakehouseError>>()?;

    parts.sort();
    Ok(parts)
}

/// Orders `tables` and their transitive dependencies so that every table
/// comes after the tables it reads.
fn resolve(tables: &[TableDef]) -> Result<Vec<&TableDef>, DefinitionError> {
    fn visit<'a>(
        table: &'a TableDef,
        seen: &mut HashMap<&'a str, &'a TableDef>,
        visiting: &mut HashSet<&'a str>,
        order: &mut Vec<&'a TableDef>,
    ) -> Result<(), DefinitionError> {
        if let Some(known) = seen.get(table.name()) {
            return if known.solid.same_definition(&table.solid) {
                Ok(())
            } else {
                Err(DefinitionError::ConflictingTable(table.name().to_string()))
            };
        }

        if !visiting.insert(table.name()) {
            return Err(DefinitionError::TableCycle(table.name().to_string()));
        }

        for (_, dependency) in &table.tables {
            visit(dependency, seen, visiting, order)?;
        }

        visiting.remove(table.name());
        seen.insert(table.name(), table);
        order.push(table);
        Ok(())
    }

    let mut seen = HashMap::new();
    let mut visiting = HashSet::new();
    let mut order = Vec::new();

    for table in tables {
        visit(table, &mut seen, &mut visiting, &mut order)?;
    }

    Ok(order)
}

/// Generates the pipeline materializing `tables` and everything they depend
/// on. Each table's frame is also exposed as a pipeline output named after
/// the table.
pub fn lakehouse_pipeline(tables: &[TableDef]) -> Result<PipelineDef, DefinitionError> {
    let order = resolve(tables)?;

    PipelineDef::build(LAKEHOUSE_PIPELINE, |b| {
        let mut invocations: HashMap<&str, Invocation> = HashMap::new();
        let mut returns = Vec::with_capacity(order.len());

        for table in &order {
            let bindings = table
                .tables
                .iter()
                .map(|(input, dependency)| {
                    let invocation = invocations.get(dependency.name()).ok_or_else(|| {
                        DefinitionError::UnknownOutput {
                            solid: dependency.name().to_string(),
                            output: DEFAULT_OUTPUT.to_string(),
                        }
                    })?;
                    Ok((input.as_str(), invocation.output()?))
                })
                .collect::<Result<Vec<_>, DefinitionError>>()?;

            let invocation = b.invoke_named(&table.solid, bindings)?;
            tracing::debug!(table = table.name(), "wired table");

            returns.push((table.name(), invocation.output()?));
            invocations.insert(table.name(), invocation);
        }

        Returns::named(returns)
    })
}

/// Materializes `tables` and their transitive dependencies into `lakehouse`.
///
/// Failures of individual tables are reported through
/// [`ExecutionResult::success`]; only invalid definitions or run config are
/// returned as errors.
pub fn build_lakehouse(
    tables: &[TableDef],
    lakehouse: Arc<dyn Lakehouse>,
    config: &RunConfig,
) -> Result<ExecutionResult, BuildError> {
    build_lakehouse_with(tables, lakehouse, config, Resources::new())
}

/// Like [`build_lakehouse`], with additional resources for the tables.
pub fn build_lakehouse_with(
    tables: &[TableDef],
    lakehouse: Arc<dyn Lakehouse>,
    config: &RunConfig,
    resources: Resources,
) -> Result<ExecutionResult, BuildError> {
    let pipeline = lakehouse_pipeline(tables)?;
    let resources = resources.with(LAKEHOUSE_RESOURCE, lakehouse);

    Ok(pipeline.execute_with(config, &resources)?)
}
