//! Unit tasks ("solids") and their runtime inputs and outputs.
//!
//! A solid is declared once through [`SolidDef::builder`] and then referenced
//! from any number of pipelines and composites. The declaration records the
//! solid's typed inputs and outputs, and its body: either a compute function
//! or a graph fragment (a composite).

use std::any::type_name;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::compose::{GraphBuilder, GraphDef, Returns};
use crate::core::{ArcStr, DagType, Dynamic, SolidContext};
use crate::error::{DefinitionError, StepError};

/// Name of the output a lambda solid gets when none is declared.
pub const DEFAULT_OUTPUT: &str = "result";

type Decoder = fn(serde_json::Value) -> Result<Dynamic, serde_json::Error>;

fn decode<T>(value: serde_json::Value) -> Result<Dynamic, serde_json::Error>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Ok(Arc::new(serde_json::from_value::<T>(value)?))
}

fn refuse(_: serde_json::Value) -> Result<Dynamic, serde_json::Error> {
    Err(serde::de::Error::custom("input only accepts wired values"))
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn check_name(name: &str) -> Result<(), DefinitionError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(DefinitionError::InvalidName(name.to_string()))
    }
}

/// A named, typed input of a solid.
#[derive(Clone)]
pub struct InputDef {
    name: ArcStr,
    dag_type: DagType,
    decoder: Decoder,
    default: Option<Dynamic>,
}

impl InputDef {
    pub fn new<T>(name: &str) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dag_type: DagType::of::<T>(),
            decoder: decode::<T>,
            default: None,
        }
    }

    /// An input accepting values of any type. Configured values are decoded
    /// as [`serde_json::Value`].
    pub fn any(name: &str) -> Self {
        Self {
            name: name.into(),
            dag_type: DagType::any(),
            decoder: decode::<serde_json::Value>,
            default: None,
        }
    }

    /// An input of type `T` that can only be fed by an upstream output.
    pub(crate) fn wired<T: Send + Sync + 'static>(name: &str) -> Self {
        Self {
            name: name.into(),
            dag_type: DagType::of::<T>(),
            decoder: refuse,
            default: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dag_type(&self) -> DagType {
        self.dag_type
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub(crate) fn default_value(&self) -> Option<&Dynamic> {
        self.default.as_ref()
    }

    pub(crate) fn decode(&self, value: serde_json::Value) -> Result<Dynamic, serde_json::Error> {
        (self.decoder)(value)
    }
}

impl std::fmt::Debug for InputDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputDef")
            .field("name", &self.name)
            .field("dag_type", &self.dag_type)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// A named, typed output of a solid.
#[derive(Debug, Clone)]
pub struct OutputDef {
    name: ArcStr,
    dag_type: DagType,
}

impl OutputDef {
    pub fn new<T: Send + Sync + 'static>(name: &str) -> Self {
        Self {
            name: name.into(),
            dag_type: DagType::of::<T>(),
        }
    }

    pub fn any(name: &str) -> Self {
        Self {
            name: name.into(),
            dag_type: DagType::any(),
        }
    }

    pub(crate) fn with_type(name: &str, dag_type: DagType) -> Self {
        Self {
            name: name.into(),
            dag_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dag_type(&self) -> DagType {
        self.dag_type
    }
}

pub(crate) type ComputeFn =
    Arc<dyn Fn(&SolidContext<'_>, &Inputs<'_>, &mut Outputs<'_>) -> anyhow::Result<()> + Send + Sync>;

pub(crate) enum Body {
    Compute(ComputeFn),
    Composite(Arc<GraphDef>),
}

pub(crate) struct Definition {
    pub name: ArcStr,
    pub description: Option<String>,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<OutputDef>,
    pub body: Body,
}

/// An immutable solid descriptor.
///
/// Cloning is cheap: the definition body is shared. [`SolidDef::alias`]
/// returns another descriptor with a different invocation name over the same
/// definition, which is how one solid appears several times in a graph.
#[derive(Clone)]
pub struct SolidDef {
    name: ArcStr,
    def: Arc<Definition>,
}

impl SolidDef {
    /// Starts declaring a solid named `name`.
    pub fn builder(name: impl Into<String>) -> SolidBuilder {
        SolidBuilder {
            name: name.into(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// The invocation name: the alias if one was given, else the definition
    /// name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition_name(&self) -> &str {
        &self.def.name
    }

    pub fn description(&self) -> Option<&str> {
        self.def.description.as_deref()
    }

    pub fn is_alias(&self) -> bool {
        self.name != self.def.name
    }

    /// Returns a reference to the same definition under a different name.
    ///
    /// The alias must be a valid solid name; an invalid one is reported when
    /// the alias is invoked.
    pub fn alias(&self, name: &str) -> SolidDef {
        SolidDef {
            name: name.into(),
            def: self.def.clone(),
        }
    }

    pub fn inputs(&self) -> &[InputDef] {
        &self.def.inputs
    }

    pub fn outputs(&self) -> &[OutputDef] {
        &self.def.outputs
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.def.body, Body::Composite(_))
    }

    pub(crate) fn body(&self) -> &Body {
        &self.def.body
    }

    pub(crate) fn input_index(&self, name: &str) -> Option<usize> {
        self.def.inputs.iter().position(|i| &*i.name == name)
    }

    pub(crate) fn output_index(&self, name: &str) -> Option<usize> {
        self.def.outputs.iter().position(|o| &*o.name == name)
    }

    pub(crate) fn same_definition(&self, other: &SolidDef) -> bool {
        Arc::ptr_eq(&self.def, &other.def)
    }
}

impl std::fmt::Debug for SolidDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolidDef")
            .field("name", &self.name)
            .field("definition", &self.def.name)
            .field("inputs", &self.def.inputs)
            .field("outputs", &self.def.outputs)
            .field("composite", &self.is_composite())
            .finish()
    }
}

/// Builder returned by [`SolidDef::builder`].
pub struct SolidBuilder {
    name: String,
    description: Option<String>,
    inputs: Vec<InputDef>,
    outputs: Vec<OutputDef>,
}

impl SolidBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares an input of type `T`. Unwired inputs can be supplied through
    /// run config, which is decoded into `T`.
    pub fn input<T>(mut self, name: &str) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.inputs.push(InputDef::new::<T>(name));
        self
    }

    /// Declares an input accepting any upstream type.
    pub fn input_any(mut self, name: &str) -> Self {
        self.inputs.push(InputDef::any(name));
        self
    }

    /// Declares an input of type `T` which falls back to `value` when it is
    /// neither wired nor configured.
    pub fn input_with_default<T>(mut self, name: &str, value: T) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let mut input = InputDef::new::<T>(name);
        input.default = Some(Arc::new(value));
        self.inputs.push(input);
        self
    }

    pub(crate) fn wired_input<T: Send + Sync + 'static>(mut self, name: &str) -> Self {
        self.inputs.push(InputDef::wired::<T>(name));
        self
    }

    pub fn output<T: Send + Sync + 'static>(mut self, name: &str) -> Self {
        self.outputs.push(OutputDef::new::<T>(name));
        self
    }

    pub fn output_any(mut self, name: &str) -> Self {
        self.outputs.push(OutputDef::any(name));
        self
    }

    /// Finishes a solid whose function emits any number of declared outputs
    /// through [`Outputs::emit`].
    pub fn compute<F>(self, callback: F) -> Result<SolidDef, DefinitionError>
    where
        F: Fn(&SolidContext<'_>, &Inputs<'_>, &mut Outputs<'_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.validate()?;
        Ok(self.finish(Body::Compute(Arc::new(callback))))
    }

    /// Finishes a solid with a single output, produced by the function's return
    /// value. If no output was declared, one named `result` of type `R` is
    /// added.
    pub fn lambda<F, R>(mut self, callback: F) -> Result<SolidDef, DefinitionError>
    where
        F: Fn(&SolidContext<'_>, &Inputs<'_>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        if self.outputs.is_empty() {
            self.outputs.push(OutputDef::new::<R>(DEFAULT_OUTPUT));
        } else if self.outputs.len() > 1 {
            return Err(DefinitionError::LambdaOutputs {
                solid: self.name,
                count: self.outputs.len(),
            });
        } else if !self.outputs[0].dag_type.matches::<R>() {
            return Err(DefinitionError::LambdaOutputType {
                solid: self.name,
                output: self.outputs[0].name.to_string(),
                declared: self.outputs[0].dag_type.name(),
                returned: type_name::<R>(),
            });
        }

        self.validate()?;
        Ok(self.finish(Body::Compute(Arc::new(move |ctx, inputs, outputs| {
            let value = callback(ctx, inputs)?;
            outputs.emit_at(0, value)?;
            Ok(())
        }))))
    }

    /// Finishes a composite solid whose body is a graph fragment.
    ///
    /// The body runs once, now, against a [`GraphBuilder`]. The composite's own
    /// inputs are reachable through [`GraphBuilder::input`]. When outputs were
    /// declared on this builder, the names returned by the body must match them
    /// exactly; otherwise the outputs are inferred from the returned handles.
    pub fn composite<F>(mut self, body: F) -> Result<SolidDef, DefinitionError>
    where
        F: FnOnce(&mut GraphBuilder) -> Result<Returns, DefinitionError>,
    {
        self.validate()?;

        let mut builder = GraphBuilder::new(&self.name, self.inputs.clone());
        let returns = body(&mut builder)?;
        let declared = (!self.outputs.is_empty()).then_some(self.outputs.as_slice());
        let graph = builder.finish(returns, declared)?;

        self.outputs = graph.outputs.iter().map(|(def, _)| def.clone()).collect();
        Ok(self.finish(Body::Composite(Arc::new(graph))))
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        check_name(&self.name)?;

        for (i, input) in self.inputs.iter().enumerate() {
            check_name(&input.name)?;
            if self.inputs[..i].iter().any(|other| other.name == input.name) {
                return Err(DefinitionError::DuplicateInput {
                    solid: self.name.clone(),
                    input: input.name.to_string(),
                });
            }
        }

        for (i, output) in self.outputs.iter().enumerate() {
            check_name(&output.name)?;
            if self.outputs[..i].iter().any(|other| other.name == output.name) {
                return Err(DefinitionError::DuplicateOutput {
                    solid: self.name.clone(),
                    output: output.name.to_string(),
                });
            }
        }

        Ok(())
    }

    fn finish(self, body: Body) -> SolidDef {
        let name: ArcStr = self.name.into();
        SolidDef {
            name: name.clone(),
            def: Arc::new(Definition {
                name,
                description: self.description,
                inputs: self.inputs,
                outputs: self.outputs,
                body,
            }),
        }
    }
}

/// Resolved input values handed to a compute function.
pub struct Inputs<'a> {
    defs: &'a [InputDef],
    values: &'a [Dynamic],
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(defs: &'a [InputDef], values: &'a [Dynamic]) -> Self {
        Self { defs, values }
    }

    /// Borrows the value of input `name` as `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Result<&'a T, StepError> {
        let index = self
            .defs
            .iter()
            .position(|def| def.name() == name)
            .ok_or_else(|| StepError::UnknownInput(name.to_string()))?;

        self.values[index]
            .downcast_ref::<T>()
            .ok_or_else(|| StepError::InputType {
                input: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        self.defs.iter().map(InputDef::name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Collector for the outputs a compute function emits.
pub struct Outputs<'a> {
    defs: &'a [OutputDef],
    values: Vec<Option<Dynamic>>,
}

impl<'a> Outputs<'a> {
    pub(crate) fn new(defs: &'a [OutputDef]) -> Self {
        Self {
            defs,
            values: vec![None; defs.len()],
        }
    }

    /// Emits `value` on output `name`. Each declared output must be emitted
    /// exactly once.
    pub fn emit<T: Send + Sync + 'static>(&mut self, name: &str, value: T) -> Result<(), StepError> {
        let index = self
            .defs
            .iter()
            .position(|def| def.name() == name)
            .ok_or_else(|| StepError::UndeclaredOutput(name.to_string()))?;

        self.emit_at(index, value)
    }

    pub(crate) fn emit_at<T: Send + Sync + 'static>(
        &mut self,
        index: usize,
        value: T,
    ) -> Result<(), StepError> {
        let def = &self.defs[index];

        if !def.dag_type.matches::<T>() {
            return Err(StepError::OutputType {
                output: def.name.to_string(),
                expected: def.dag_type.name(),
                found: type_name::<T>(),
            });
        }

        if self.values[index].is_some() {
            return Err(StepError::DuplicateOutput(def.name.to_string()));
        }

        self.values[index] = Some(Arc::new(value));
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Vec<Dynamic>, StepError> {
        self.values
            .into_iter()
            .zip(self.defs)
            .map(|(value, def)| value.ok_or_else(|| StepError::MissingOutput(def.name.to_string())))
            .collect()
    }
}
