use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use petgraph::visit::EdgeRef;

use crate::compose::{GraphBuilder, GraphDef, Origin, Returns};
use crate::config::RunConfig;
use crate::core::{ArcStr, Hash32, Resources};
use crate::engine::{self, ExecutionResult};
use crate::error::{DefinitionError, ExecutionError};
use crate::solid::{Body, OutputDef, check_name};

/// A named, immutable DAG of solid invocations.
///
/// ```
/// use kumiki::{PipelineDef, Returns, RunConfig, SolidDef};
///
/// let return_one = SolidDef::builder("return_one").lambda(|_, _| Ok(1i64))?;
/// let adder = SolidDef::builder("adder")
///     .input::<i64>("a")
///     .input::<i64>("b")
///     .lambda(|_, inputs| Ok(inputs.get::<i64>("a")? + inputs.get::<i64>("b")?))?;
///
/// let pipeline = PipelineDef::build("compute_two", |b| {
///     let one = b.call(&return_one)?;
///     b.invoke(&adder, [&one, &one])?;
///     Ok(Returns::Nothing)
/// })?;
///
/// let result = pipeline.execute(&RunConfig::default())?;
/// assert_eq!(result.value::<i64>("adder"), Some(&2));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct PipelineDef {
    name: ArcStr,
    description: Option<String>,
    graph: Arc<GraphDef>,
}

impl PipelineDef {
    /// Runs `body` once against a fresh [`GraphBuilder`] and seals the result.
    pub fn build<F>(name: &str, body: F) -> Result<Self, DefinitionError>
    where
        F: FnOnce(&mut GraphBuilder) -> Result<Returns, DefinitionError>,
    {
        check_name(name)?;

        let mut builder = GraphBuilder::new(name, Vec::new());
        let returns = body(&mut builder)?;
        let graph = builder.finish(returns, None)?;

        tracing::debug!(
            pipeline = name,
            solids = graph.graph.node_count(),
            "defined pipeline"
        );

        Ok(Self {
            name: name.into(),
            description: None,
            graph: Arc::new(graph),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Top-level invocation names, in definition order.
    pub fn solid_names(&self) -> Vec<&str> {
        self.graph
            .graph
            .node_indices()
            .map(|index| &*self.graph.graph[index].name)
            .collect()
    }

    /// The outputs returned by the pipeline body.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputDef> {
        self.graph.outputs.iter().map(|(def, _)| def)
    }

    /// Structural fingerprint, equal for pipelines defined identically.
    pub fn snapshot_id(&self) -> String {
        Hash32::hash(self.to_string()).to_hex()
    }

    /// Executes the pipeline with no resources.
    pub fn execute(&self, config: &RunConfig) -> Result<ExecutionResult, ExecutionError> {
        self.execute_with(config, &Resources::default())
    }

    /// Executes the pipeline. Step failures are captured in the result, only
    /// an invalid run config is reported as an error.
    pub fn execute_with(
        &self,
        config: &RunConfig,
        resources: &Resources,
    ) -> Result<ExecutionResult, ExecutionError> {
        engine::execute(self, config, resources)
    }

    pub(crate) fn graph(&self) -> &GraphDef {
        &self.graph
    }
}

impl std::fmt::Debug for PipelineDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDef")
            .field("name", &self.name)
            .field("solids", &self.solid_names())
            .finish()
    }
}

/// Renders the pipeline as a Mermaid flowchart. Composites become subgraphs.
impl Display for PipelineDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;
        render_graph(f, &self.graph, "n", 1)?;

        for (def, origin) in &self.graph.outputs {
            if let Origin::Output { node, .. } = origin {
                writeln!(
                    f,
                    "    n{} --> out_{}([\"{}\"])",
                    node.index(),
                    def.name(),
                    def.name()
                )?;
            }
        }

        Ok(())
    }
}

fn render_graph(f: &mut Formatter<'_>, graph: &GraphDef, prefix: &str, depth: usize) -> fmt::Result {
    let indent = "    ".repeat(depth);

    for index in graph.graph.node_indices() {
        let node = &graph.graph[index];
        let id = format!("{prefix}{}", index.index());
        let label = node.name.replace('"', "'");

        match node.solid.body() {
            Body::Compute(_) => writeln!(f, "{indent}{id}[\"{label}\"]")?,
            Body::Composite(inner) => {
                writeln!(f, "{indent}subgraph {id} [\"{label}\"]")?;

                for (i, input) in inner.inputs.iter().enumerate() {
                    writeln!(f, "{indent}    {id}_in{i}((\"{}\"))", input.name())?;
                }

                render_graph(f, inner, &format!("{id}_"), depth + 1)?;
                writeln!(f, "{indent}end")?;
            }
        }
    }

    for edge in graph.graph.edge_references() {
        let wire = edge.weight();
        let source = &graph.graph[edge.source()].solid;
        let target = &graph.graph[edge.target()].solid;

        writeln!(
            f,
            "{indent}{prefix}{} -->|\"{}:{}\"| {prefix}{}",
            edge.source().index(),
            source.outputs()[wire.output].name(),
            target.inputs()[wire.input].name(),
            edge.target().index(),
        )?;
    }

    // Composite inputs feeding inner nodes.
    if let Some(outer) = prefix.strip_suffix('_') {
        for index in graph.graph.node_indices() {
            let node = &graph.graph[index];
            for (input, binding) in node.bindings.iter().enumerate() {
                if let Some(Origin::Input(source)) = binding {
                    writeln!(
                        f,
                        "{indent}{outer}_in{source} -->|\"{}\"| {prefix}{}",
                        node.solid.inputs()[input].name(),
                        index.index(),
                    )?;
                }
            }
        }
    }

    Ok(())
}
