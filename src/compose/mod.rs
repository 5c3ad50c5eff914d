//! Graph building for pipelines and composite solids.
//!
//! A pipeline or composite body is an ordinary closure that runs exactly once,
//! at definition time, against a [`GraphBuilder`]. Invoking a solid through the
//! builder does not compute anything: it records a node in the graph and hands
//! back an [`Invocation`], a symbolic token for the values that node will
//! produce once the graph is executed.
//!
//! ## Handles
//!
//! An [`Invocation`] exposes its outputs as [`Handle`]s, either by position
//! ([`Invocation::at`], [`Invocation::unpack`]) or by name
//! ([`Invocation::get`]). Passing a handle to another invocation wires an edge
//! from that output to the receiving input. The builder checks the wiring
//! eagerly: unknown inputs, repeated bindings and mismatched channel types are
//! all [`DefinitionError`]s raised while the body runs, never at execution
//! time.
//!
//! Since a handle can only refer to nodes that already exist, the graph is
//! acyclic by construction.

mod pipeline;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::Graph;
use petgraph::graph::NodeIndex;

pub use crate::compose::pipeline::PipelineDef;

use crate::core::{ArcStr, DagType};
use crate::error::DefinitionError;
use crate::solid::{DEFAULT_OUTPUT, InputDef, OutputDef, SolidDef, check_name};

static NEXT_GRAPH: AtomicU64 = AtomicU64::new(0);

/// Where a value flowing through the graph comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Origin {
    /// The `output`-th output of another node.
    Output { node: NodeIndex, output: usize },
    /// The `n`-th input of the enclosing composite.
    Input(usize),
}

/// A symbolic reference to a value that will exist once the graph runs.
///
/// Handles are `Copy` and only meaningful inside the builder that produced
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle {
    graph: u64,
    origin: Origin,
    dag_type: DagType,
}

impl Handle {
    /// The type of the value this handle refers to.
    pub fn dag_type(&self) -> DagType {
        self.dag_type
    }
}

/// Things that can be passed as an argument to an invocation.
pub trait IntoSource {
    fn into_source(self) -> Result<Handle, DefinitionError>;
}

impl IntoSource for Handle {
    fn into_source(self) -> Result<Handle, DefinitionError> {
        Ok(self)
    }
}

impl IntoSource for &Handle {
    fn into_source(self) -> Result<Handle, DefinitionError> {
        Ok(*self)
    }
}

impl IntoSource for Invocation {
    fn into_source(self) -> Result<Handle, DefinitionError> {
        self.output()
    }
}

impl IntoSource for &Invocation {
    fn into_source(self) -> Result<Handle, DefinitionError> {
        self.output()
    }
}

/// The result of invoking a solid inside a graph body.
///
/// Gives access to the invocation's outputs both positionally, in declared
/// order, and by name. The two views always agree.
#[derive(Clone, Debug)]
pub struct Invocation {
    graph: u64,
    node: NodeIndex,
    name: ArcStr,
    solid: SolidDef,
}

impl Invocation {
    /// The unique name of this invocation within its graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solid(&self) -> &SolidDef {
        &self.solid
    }

    /// Number of outputs.
    pub fn len(&self) -> usize {
        self.solid.outputs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle_at(&self, output: usize) -> Handle {
        Handle {
            graph: self.graph,
            origin: Origin::Output {
                node: self.node,
                output,
            },
            dag_type: self.solid.outputs()[output].dag_type(),
        }
    }

    /// The sole output of a single-output invocation.
    pub fn output(&self) -> Result<Handle, DefinitionError> {
        match self.len() {
            1 => Ok(self.handle_at(0)),
            count => Err(DefinitionError::AmbiguousOutput {
                solid: self.name.to_string(),
                count,
            }),
        }
    }

    /// The output named `name`.
    pub fn get(&self, name: &str) -> Result<Handle, DefinitionError> {
        self.solid
            .output_index(name)
            .map(|index| self.handle_at(index))
            .ok_or_else(|| DefinitionError::UnknownOutput {
                solid: self.name.to_string(),
                output: name.to_string(),
            })
    }

    /// The output at position `index`, in declared order.
    pub fn at(&self, index: usize) -> Result<Handle, DefinitionError> {
        if index < self.len() {
            Ok(self.handle_at(index))
        } else {
            Err(DefinitionError::UnknownOutput {
                solid: self.name.to_string(),
                output: index.to_string(),
            })
        }
    }

    /// Unpacks all outputs in declared order. `N` must equal the number of
    /// outputs.
    pub fn unpack<const N: usize>(&self) -> Result<[Handle; N], DefinitionError> {
        if N != self.len() {
            return Err(DefinitionError::UnpackArity {
                solid: self.name.to_string(),
                actual: self.len(),
                requested: N,
            });
        }

        Ok(std::array::from_fn(|index| self.handle_at(index)))
    }

    pub fn handles(&self) -> Vec<Handle> {
        (0..self.len()).map(|index| self.handle_at(index)).collect()
    }
}

/// What a graph body declares as its outputs.
#[derive(Debug, Clone, Default)]
pub enum Returns {
    /// No outputs.
    #[default]
    Nothing,
    /// A single output, named after the sole declared output or `result`.
    Single(Handle),
    /// Named outputs.
    Named(Vec<(String, Handle)>),
}

impl Returns {
    pub fn single(source: impl IntoSource) -> Result<Self, DefinitionError> {
        Ok(Returns::Single(source.into_source()?))
    }

    pub fn named<'n, I, S>(items: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = (&'n str, S)>,
        S: IntoSource,
    {
        let items = items
            .into_iter()
            .map(|(name, source)| Ok((name.to_string(), source.into_source()?)))
            .collect::<Result<_, DefinitionError>>()?;

        Ok(Returns::Named(items))
    }
}

impl From<Handle> for Returns {
    fn from(handle: Handle) -> Self {
        Returns::Single(handle)
    }
}

/// One invocation in a graph.
pub(crate) struct Node {
    pub name: ArcStr,
    pub solid: SolidDef,
    /// One entry per input of `solid`, `None` when left unwired.
    pub bindings: Vec<Option<Origin>>,
}

/// Edge payload: which output feeds which input.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Wire {
    pub output: usize,
    pub input: usize,
}

/// A finished, immutable graph: the body of a pipeline or composite.
pub(crate) struct GraphDef {
    pub name: ArcStr,
    pub graph: Graph<Node, Wire>,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<(OutputDef, Origin)>,
}

impl std::fmt::Debug for GraphDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The graph-building context passed to pipeline and composite bodies.
pub struct GraphBuilder {
    id: u64,
    name: ArcStr,
    graph: Graph<Node, Wire>,
    inputs: Vec<InputDef>,
    used: HashSet<ArcStr>,
}

impl GraphBuilder {
    pub(crate) fn new(name: &str, inputs: Vec<InputDef>) -> Self {
        Self {
            id: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            graph: Graph::new(),
            inputs,
            used: HashSet::new(),
        }
    }

    /// Name of the pipeline or composite being built.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle to the enclosing composite's input `name`.
    pub fn input(&self, name: &str) -> Result<Handle, DefinitionError> {
        self.inputs
            .iter()
            .position(|input| input.name() == name)
            .map(|index| Handle {
                graph: self.id,
                origin: Origin::Input(index),
                dag_type: self.inputs[index].dag_type(),
            })
            .ok_or_else(|| DefinitionError::UnknownCompositeInput {
                composite: self.name.to_string(),
                input: name.to_string(),
            })
    }

    /// Invokes `solid` leaving all of its inputs unwired.
    pub fn call(&mut self, solid: &SolidDef) -> Result<Invocation, DefinitionError> {
        let bindings = vec![None; solid.inputs().len()];
        self.add(solid, bindings)
    }

    /// Invokes `solid`, binding `args` to its inputs in declared order.
    /// Trailing inputs may be left unwired.
    pub fn invoke<I, S>(&mut self, solid: &SolidDef, args: I) -> Result<Invocation, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: IntoSource,
    {
        let expected = solid.inputs().len();
        let mut bindings = vec![None; expected];
        let mut given = 0;

        for arg in args {
            if given < expected {
                bindings[given] = Some(arg.into_source()?);
            }
            given += 1;
        }

        if given > expected {
            return Err(DefinitionError::TooManyArguments {
                solid: solid.name().to_string(),
                expected,
                given,
            });
        }

        self.add(solid, bindings)
    }

    /// Invokes `solid`, binding each `(input, source)` pair by input name.
    pub fn invoke_named<'n, I, S>(
        &mut self,
        solid: &SolidDef,
        args: I,
    ) -> Result<Invocation, DefinitionError>
    where
        I: IntoIterator<Item = (&'n str, S)>,
        S: IntoSource,
    {
        let mut bindings = vec![None; solid.inputs().len()];

        for (input, arg) in args {
            let index = solid
                .input_index(input)
                .ok_or_else(|| DefinitionError::UnknownInput {
                    solid: solid.name().to_string(),
                    input: input.to_string(),
                })?;

            if bindings[index].is_some() {
                return Err(DefinitionError::DuplicateBinding {
                    solid: solid.name().to_string(),
                    input: input.to_string(),
                });
            }

            bindings[index] = Some(arg.into_source()?);
        }

        self.add(solid, bindings)
    }

    fn add(
        &mut self,
        solid: &SolidDef,
        bindings: Vec<Option<Handle>>,
    ) -> Result<Invocation, DefinitionError> {
        check_name(solid.name())?;

        let mut origins = Vec::with_capacity(bindings.len());
        for (input, binding) in solid.inputs().iter().zip(bindings) {
            let Some(handle) = binding else {
                origins.push(None);
                continue;
            };

            if handle.graph != self.id {
                return Err(DefinitionError::ForeignHandle {
                    solid: solid.name().to_string(),
                });
            }

            if !input.dag_type().accepts(&handle.dag_type) {
                return Err(DefinitionError::TypeMismatch {
                    solid: solid.name().to_string(),
                    input: input.name().to_string(),
                    expected: input.dag_type().name(),
                    found: handle.dag_type.name(),
                });
            }

            origins.push(Some(handle.origin));
        }

        let name = self.unique_name(solid)?;
        let index = self.graph.add_node(Node {
            name: name.clone(),
            solid: solid.clone(),
            bindings: origins.clone(),
        });

        for (input, origin) in origins.into_iter().enumerate() {
            if let Some(Origin::Output { node, output }) = origin {
                self.graph.add_edge(node, index, Wire { output, input });
            }
        }

        tracing::debug!(graph = %self.name, solid = %name, "registered invocation");

        Ok(Invocation {
            graph: self.id,
            node: index,
            name,
            solid: solid.clone(),
        })
    }

    /// Explicit aliases must be unique. Repeated unaliased invocations are
    /// numbered: `adder`, `adder_2`, `adder_3`...
    fn unique_name(&mut self, solid: &SolidDef) -> Result<ArcStr, DefinitionError> {
        let base = solid.name();

        if !self.used.contains(base) {
            let name: ArcStr = base.into();
            self.used.insert(name.clone());
            return Ok(name);
        }

        if solid.is_alias() {
            return Err(DefinitionError::DuplicateSolidName {
                graph: self.name.to_string(),
                name: base.to_string(),
            });
        }

        let name: ArcStr = (2..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.used.contains(candidate.as_str()))
            .unwrap_or_default()
            .into();

        self.used.insert(name.clone());
        Ok(name)
    }

    /// Seals the graph. `declared` are the outputs declared up front by a
    /// composite; when absent, outputs are inferred from `returns`.
    pub(crate) fn finish(
        self,
        returns: Returns,
        declared: Option<&[OutputDef]>,
    ) -> Result<GraphDef, DefinitionError> {
        let returned = match returns {
            Returns::Nothing => Vec::new(),
            Returns::Single(handle) => {
                let name = match declared {
                    Some([only]) => only.name().to_string(),
                    _ => DEFAULT_OUTPUT.to_string(),
                };
                vec![(name, handle)]
            }
            Returns::Named(items) => items,
        };

        for (i, (name, handle)) in returned.iter().enumerate() {
            check_name(name)?;

            if returned[..i].iter().any(|(other, _)| other == name) {
                return Err(DefinitionError::DuplicateReturn {
                    solid: self.name.to_string(),
                    output: name.clone(),
                });
            }

            if handle.graph != self.id {
                return Err(DefinitionError::ForeignHandle {
                    solid: self.name.to_string(),
                });
            }
        }

        let outputs = match declared {
            Some(defs) => self.match_declared(defs, &returned)?,
            None => returned
                .iter()
                .map(|(name, handle)| (OutputDef::with_type(name, handle.dag_type), handle.origin))
                .collect(),
        };

        Ok(GraphDef {
            name: self.name,
            graph: self.graph,
            inputs: self.inputs,
            outputs,
        })
    }

    fn match_declared(
        &self,
        defs: &[OutputDef],
        returned: &[(String, Handle)],
    ) -> Result<Vec<(OutputDef, Origin)>, DefinitionError> {
        let mismatch = || DefinitionError::OutputMismatch {
            solid: self.name.to_string(),
            declared: defs.iter().map(|def| def.name().to_string()).collect(),
            returned: returned.iter().map(|(name, _)| name.clone()).collect(),
        };

        if defs.len() != returned.len() {
            return Err(mismatch());
        }

        defs.iter()
            .map(|def| {
                let (_, handle) = returned
                    .iter()
                    .find(|(name, _)| name == def.name())
                    .ok_or_else(mismatch)?;

                if !def.dag_type().accepts(&handle.dag_type) {
                    return Err(DefinitionError::ReturnTypeMismatch {
                        solid: self.name.to_string(),
                        output: def.name().to_string(),
                        expected: def.dag_type().name(),
                        found: handle.dag_type.name(),
                    });
                }

                Ok((def.clone(), handle.origin))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn return_one() -> SolidDef {
        SolidDef::builder("return_one").lambda(|_, _| Ok(1i64)).unwrap()
    }

    fn adder() -> SolidDef {
        SolidDef::builder("adder")
            .input::<i64>("a")
            .input::<i64>("b")
            .lambda(|_, inputs| Ok(inputs.get::<i64>("a")? + inputs.get::<i64>("b")?))
            .unwrap()
    }

    fn two_outputs() -> SolidDef {
        SolidDef::builder("return_one_and_two")
            .output::<i64>("one")
            .output::<i64>("two")
            .compute(|_, _, outputs| {
                outputs.emit("one", 1i64)?;
                outputs.emit("two", 2i64)?;
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn test_wiring_records_edges() {
        let mut builder = GraphBuilder::new("compute_two", vec![]);
        let one = builder.call(&return_one()).unwrap();
        let two = builder.invoke(&adder(), [&one, &one]).unwrap();

        assert_eq!(two.name(), "adder");
        assert_eq!(builder.graph.node_count(), 2);
        assert_eq!(builder.graph.edge_count(), 2);
    }

    #[test]
    fn test_repeated_invocation_is_numbered() {
        let adder = adder();
        let mut builder = GraphBuilder::new("g", vec![]);
        let one = builder.call(&return_one()).unwrap();
        let first = builder.invoke(&adder, [&one, &one]).unwrap();
        let second = builder.invoke(&adder, [&first, &one]).unwrap();
        let third = builder.invoke(&adder, [&second, &one]).unwrap();

        assert_eq!(first.name(), "adder");
        assert_eq!(second.name(), "adder_2");
        assert_eq!(third.name(), "adder_3");
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let adder = adder();
        let mut builder = GraphBuilder::new("g", vec![]);
        builder.call(&adder.alias("adder_a")).unwrap();

        let err = builder.call(&adder.alias("adder_a")).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateSolidName { .. }));
    }

    #[test]
    fn test_named_binding_errors() {
        let adder = adder();
        let mut builder = GraphBuilder::new("g", vec![]);
        let one = builder.call(&return_one()).unwrap();

        let err = builder
            .invoke_named(&adder, [("c", &one)])
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownInput { .. }));

        let err = builder
            .invoke_named(&adder, [("a", &one), ("a", &one)])
            .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateBinding { .. }));
    }

    #[test]
    fn test_too_many_arguments() {
        let mut builder = GraphBuilder::new("g", vec![]);
        let one = builder.call(&return_one()).unwrap();

        let err = builder.invoke(&adder(), [&one, &one, &one]).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::TooManyArguments {
                expected: 2,
                given: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let shout = SolidDef::builder("shout")
            .input::<String>("text")
            .lambda(|_, inputs| Ok(inputs.get::<String>("text")?.to_uppercase()))
            .unwrap();

        let mut builder = GraphBuilder::new("g", vec![]);
        let one = builder.call(&return_one()).unwrap();

        let err = builder.invoke(&shout, [&one]).unwrap_err();
        assert!(matches!(err, DefinitionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = GraphBuilder::new("first", vec![]);
        let one = first.call(&return_one()).unwrap();

        let mut second = GraphBuilder::new("second", vec![]);
        let err = second.invoke(&adder(), [&one, &one]).unwrap_err();
        assert!(matches!(err, DefinitionError::ForeignHandle { .. }));
    }

    #[test]
    fn test_multi_output_access_agrees() {
        let mut builder = GraphBuilder::new("g", vec![]);
        let results = builder.call(&two_outputs()).unwrap();

        let [one, two] = results.unpack().unwrap();
        assert_eq!(one, results.get("one").unwrap());
        assert_eq!(two, results.get("two").unwrap());
        assert_eq!(two, results.at(1).unwrap());
        assert_eq!(results.handles(), vec![one, two]);

        assert!(matches!(
            results.output(),
            Err(DefinitionError::AmbiguousOutput { count: 2, .. })
        ));
        assert!(matches!(
            results.unpack::<3>(),
            Err(DefinitionError::UnpackArity { actual: 2, .. })
        ));
        assert!(matches!(
            results.get("three"),
            Err(DefinitionError::UnknownOutput { .. })
        ));
    }

    #[test]
    fn test_finish_infers_outputs() {
        let mut builder = GraphBuilder::new("g", vec![]);
        let one = builder.call(&return_one()).unwrap();
        let returns = Returns::single(&one).unwrap();

        let graph = builder.finish(returns, None).unwrap();
        assert_eq!(graph.outputs.len(), 1);
        assert_eq!(graph.outputs[0].0.name(), DEFAULT_OUTPUT);
        assert_eq!(graph.outputs[0].0.dag_type(), DagType::of::<i64>());
    }

    #[test]
    fn test_finish_checks_declared_outputs() {
        let declared = vec![OutputDef::new::<i64>("a_out"), OutputDef::new::<i64>("b_out")];

        let mut builder = GraphBuilder::new("g", vec![]);
        let one = builder.call(&return_one()).unwrap();
        let returns = Returns::named([("a_out", &one), ("c_out", &one)]).unwrap();

        let err = builder.finish(returns, Some(declared.as_slice())).unwrap_err();
        assert!(matches!(err, DefinitionError::OutputMismatch { .. }));
    }

    #[test]
    fn test_composite_input_handle() {
        let builder = GraphBuilder::new("add_one", vec![InputDef::new::<i64>("num")]);

        let num = builder.input("num").unwrap();
        assert_eq!(num.dag_type(), DagType::of::<i64>());
        assert!(matches!(
            builder.input("missing"),
            Err(DefinitionError::UnknownCompositeInput { .. })
        ));
    }
}
