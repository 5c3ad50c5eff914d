//! Flattening of a pipeline into an execution plan.
//!
//! Composites only exist at definition time. Planning walks the pipeline
//! graph, recursing into every composite body, and emits one [`Step`] per
//! compute invocation. Composite inputs and outputs disappear in the process:
//! they are resolved to the concrete step outputs (or configured values) that
//! feed them.

use std::collections::{BTreeMap, HashMap};

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::compose::{GraphDef, Origin};
use crate::config::SolidConfig;
use crate::core::Dynamic;
use crate::error::ExecutionError;
use crate::solid::{Body, ComputeFn, InputDef, SolidDef};

/// Where a step input gets its value from.
#[derive(Clone)]
pub(crate) enum Resolved {
    /// Output `output` of the plan step `node`.
    Step { node: NodeIndex, output: usize },
    /// A configured or default value.
    Value(Dynamic),
    /// Nothing; the step fails when scheduled.
    Missing,
}

/// One compute invocation in the flattened plan.
pub(crate) struct Step {
    /// Dotted path, e.g. `add_both.adder_a`.
    pub key: String,
    pub solid: SolidDef,
    pub compute: ComputeFn,
    pub inputs: Vec<Resolved>,
    pub config: Option<serde_json::Value>,
}

pub(crate) struct Plan {
    pub graph: Graph<Step, ()>,
    /// The pipeline's own outputs.
    pub outputs: Vec<(String, Resolved)>,
}

impl Plan {
    pub(crate) fn build(
        graph: &GraphDef,
        config: &BTreeMap<String, SolidConfig>,
    ) -> Result<Self, ExecutionError> {
        let mut plan = Plan {
            graph: Graph::new(),
            outputs: Vec::new(),
        };

        let resolved = plan.expand(graph, "", &[], config)?;
        plan.outputs = graph
            .outputs
            .iter()
            .map(|(def, _)| def.name().to_string())
            .zip(resolved)
            .collect();

        Ok(plan)
    }

    /// Adds the steps of `graph` to the plan and returns its resolved outputs.
    ///
    /// `inputs` are the already resolved inputs of the enclosing composite.
    fn expand(
        &mut self,
        graph: &GraphDef,
        prefix: &str,
        inputs: &[Resolved],
        config: &BTreeMap<String, SolidConfig>,
    ) -> Result<Vec<Resolved>, ExecutionError> {
        for name in config.keys() {
            let known = graph
                .graph
                .node_indices()
                .any(|index| &*graph.graph[index].name == name.as_str());

            if !known {
                return Err(ExecutionError::UnknownSolid(format!("{prefix}{name}")));
            }
        }

        let mut local: HashMap<NodeIndex, Vec<Resolved>> = HashMap::new();

        // Handles can only point at existing nodes, so index order is a
        // topological order.
        for index in graph.graph.node_indices() {
            let node = &graph.graph[index];
            let key = format!("{prefix}{}", node.name);
            let solid_config = config.get(&*node.name);

            if let Some(solid_config) = solid_config {
                check_inputs(&key, &node.solid, &node.bindings, solid_config)?;
            }

            let mut resolved = Vec::with_capacity(node.bindings.len());
            for (def, binding) in node.solid.inputs().iter().zip(&node.bindings) {
                let value = match binding {
                    Some(Origin::Output { node, output }) => local
                        .get(node)
                        .and_then(|outputs| outputs.get(*output))
                        .cloned()
                        .unwrap_or(Resolved::Missing),
                    Some(Origin::Input(n)) => inputs.get(*n).cloned().unwrap_or(Resolved::Missing),
                    None => Resolved::Missing,
                };

                let value = match value {
                    Resolved::Missing => fallback(&key, def, solid_config)?,
                    value => value,
                };

                resolved.push(value);
            }

            let outputs = match node.solid.body() {
                Body::Compute(compute) => {
                    if let Some(nested) = solid_config.and_then(|c| c.solids.keys().next()) {
                        return Err(ExecutionError::UnknownSolid(format!("{key}.{nested}")));
                    }

                    let step = self.graph.add_node(Step {
                        key: key.clone(),
                        solid: node.solid.clone(),
                        compute: compute.clone(),
                        inputs: resolved.clone(),
                        config: solid_config.and_then(|c| c.config.clone()),
                    });

                    for input in &resolved {
                        if let Resolved::Step { node, .. } = input {
                            self.graph.update_edge(*node, step, ());
                        }
                    }

                    tracing::debug!(step = %key, "planned step");

                    (0..node.solid.outputs().len())
                        .map(|output| Resolved::Step { node: step, output })
                        .collect()
                }
                Body::Composite(inner) => {
                    if solid_config.is_some_and(|c| c.config.is_some()) {
                        return Err(ExecutionError::CompositeConfig(key));
                    }

                    let empty = BTreeMap::new();
                    let nested = solid_config.map_or(&empty, |c| &c.solids);
                    self.expand(inner, &format!("{key}."), &resolved, nested)?
                }
            };

            local.insert(index, outputs);
        }

        Ok(graph
            .outputs
            .iter()
            .map(|(_, origin)| match origin {
                Origin::Output { node, output } => local
                    .get(node)
                    .and_then(|outputs| outputs.get(*output))
                    .cloned()
                    .unwrap_or(Resolved::Missing),
                Origin::Input(n) => inputs.get(*n).cloned().unwrap_or(Resolved::Missing),
            })
            .collect())
    }
}

/// Configured inputs must exist and must not already be wired.
fn check_inputs(
    key: &str,
    solid: &SolidDef,
    bindings: &[Option<Origin>],
    config: &SolidConfig,
) -> Result<(), ExecutionError> {
    for name in config.inputs.keys() {
        let index = solid
            .input_index(name)
            .ok_or_else(|| ExecutionError::UnknownInput {
                solid: key.to_string(),
                input: name.clone(),
            })?;

        if bindings[index].is_some() {
            return Err(ExecutionError::InputConflict {
                solid: key.to_string(),
                input: name.clone(),
            });
        }
    }

    Ok(())
}

/// Value for an input with no upstream: the configured value, then the
/// declared default.
fn fallback(
    key: &str,
    def: &InputDef,
    config: Option<&SolidConfig>,
) -> Result<Resolved, ExecutionError> {
    if let Some(configured) = config.and_then(|c| c.inputs.get(def.name())) {
        let value = def.decode(configured.value.clone()).map_err(|source| {
            ExecutionError::InvalidInputValue {
                solid: key.to_string(),
                input: def.name().to_string(),
                source,
            }
        })?;

        return Ok(Resolved::Value(value));
    }

    Ok(def
        .default_value()
        .cloned()
        .map_or(Resolved::Missing, Resolved::Value))
}
