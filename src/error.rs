use thiserror::Error;

/// Construction-time failures raised while declaring solids, composites,
/// pipelines and tables.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Invalid name '{0}': names must be non-empty and contain only ASCII letters, digits and '_'")]
    InvalidName(String),

    #[error("Solid '{solid}' declares input '{input}' more than once")]
    DuplicateInput { solid: String, input: String },

    #[error("Solid '{solid}' declares output '{output}' more than once")]
    DuplicateOutput { solid: String, output: String },

    #[error("Solid '{solid}' has no input named '{input}'")]
    UnknownInput { solid: String, input: String },

    #[error("Solid '{solid}' has no output named '{output}'")]
    UnknownOutput { solid: String, output: String },

    #[error("Composite '{composite}' has no input named '{input}'")]
    UnknownCompositeInput { composite: String, input: String },

    #[error("Solid '{solid}' accepts {expected} argument(s) but {given} were given")]
    TooManyArguments {
        solid: String,
        expected: usize,
        given: usize,
    },

    #[error("Input '{input}' of solid '{solid}' is bound more than once")]
    DuplicateBinding { solid: String, input: String },

    #[error("Input '{input}' of solid '{solid}' expects {expected} but was wired to {found}")]
    TypeMismatch {
        solid: String,
        input: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Solid '{solid}' has {count} outputs; select one by name or position")]
    AmbiguousOutput { solid: String, count: usize },

    #[error("Solid '{solid}' has {actual} outputs but {requested} were unpacked")]
    UnpackArity {
        solid: String,
        actual: usize,
        requested: usize,
    },

    #[error("A handle from another graph was passed to solid '{solid}'")]
    ForeignHandle { solid: String },

    #[error("Solid name '{name}' is already used in '{graph}'; alias the solid to reuse it")]
    DuplicateSolidName { graph: String, name: String },

    #[error("'{solid}' declares outputs {declared:?} but its body returns {returned:?}")]
    OutputMismatch {
        solid: String,
        declared: Vec<String>,
        returned: Vec<String>,
    },

    #[error("Output '{output}' of '{solid}' is declared as {expected} but the body returns {found}")]
    ReturnTypeMismatch {
        solid: String,
        output: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'{solid}' returns '{output}' more than once")]
    DuplicateReturn { solid: String, output: String },

    #[error("Lambda solid '{solid}' must declare at most one output, found {count}")]
    LambdaOutputs { solid: String, count: usize },

    #[error("Output '{output}' of solid '{solid}' is declared as {declared} but the function returns {returned}")]
    LambdaOutputType {
        solid: String,
        output: String,
        declared: &'static str,
        returned: &'static str,
    },

    #[error("Two different tables are named '{0}'")]
    ConflictingTable(String),

    #[error("Cycle detected between tables at '{0}'")]
    TableCycle(String),
}

/// Failures detected before any step of a run is executed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Run config refers to unknown solid '{0}'")]
    UnknownSolid(String),

    #[error("Run config refers to unknown input '{input}' of solid '{solid}'")]
    UnknownInput { solid: String, input: String },

    #[error("Input '{input}' of solid '{solid}' is wired to an upstream output and cannot also be configured")]
    InputConflict { solid: String, input: String },

    #[error("Configured value for input '{input}' of solid '{solid}' is invalid:\n{source}")]
    InvalidInputValue {
        solid: String,
        input: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Composite solid '{0}' takes no config of its own; configure the solids inside it")]
    CompositeConfig(String),

    #[error("Cycle detected in execution plan")]
    Cycle,

    #[error(transparent)]
    ProgressTemplate(#[from] indicatif::style::TemplateError),

    #[error("Scheduler channel closed unexpectedly")]
    Channel(#[from] std::sync::mpsc::RecvError),
}

/// Failure of a single step. Captured in the
/// [`ExecutionResult`](crate::ExecutionResult) rather than propagated.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Input '{0}' was neither wired, configured nor defaulted")]
    MissingInput(String),

    #[error("Step has no input named '{0}'")]
    UnknownInput(String),

    #[error("Input '{input}' is not of type {expected}")]
    InputType {
        input: String,
        expected: &'static str,
    },

    #[error("Step has no output named '{0}'")]
    UndeclaredOutput(String),

    #[error("Output '{0}' was emitted more than once")]
    DuplicateOutput(String),

    #[error("Output '{output}' expects {expected} but received {found}")]
    OutputType {
        output: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Step did not emit required output '{0}'")]
    MissingOutput(String),

    #[error("Resource '{name}' of type {expected} is not available")]
    MissingResource {
        name: String,
        expected: &'static str,
    },

    #[error("Invalid solid config:\n{0}")]
    Config(#[source] serde_json::Error),

    #[error("Step panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Compute(anyhow::Error),
}

/// Errors raised when assembling rows into a [`Frame`](crate::Frame).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Row has columns {found:?} but the frame expects {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Cannot union a frame of {left} column(s) with a frame of {right} column(s)")]
    ColumnCount { left: usize, right: usize },
}

/// Errors raised by [`Lakehouse`](crate::Lakehouse) backends.
#[derive(Debug, Error)]
pub enum LakehouseError {
    #[error("Table '{0}' has not been materialized")]
    TableNotFound(String),

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("Column '{column}' mixes {left} and {right} values")]
    MixedColumn {
        column: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("Unsupported column type {0}")]
    UnsupportedType(String),

    #[error("Lakehouse state lock was poisoned")]
    Poisoned,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Couldn't access table files.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[cfg(any(feature = "csv", feature = "parquet"))]
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[cfg(feature = "parquet")]
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Errors from [`build_lakehouse`](crate::build_lakehouse).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Error while assembling the lakehouse pipeline.\n{0}")]
    Definition(#[from] DefinitionError),

    #[error("Error while preparing the lakehouse run.\n{0}")]
    Execution(#[from] ExecutionError),
}

/// Errors from loading a [`RunConfig`](crate::RunConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't parse JSON run config.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Couldn't parse YAML run config.\n{0}")]
    Yaml(#[from] serde_yaml::Error),
}
