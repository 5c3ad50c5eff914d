use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::StepError;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// A 32-byte BLAKE3 hash.
///
/// Used to fingerprint pipeline structure (see
/// [`PipelineDef::snapshot_id`](crate::PipelineDef::snapshot_id)) and to derive
/// run identifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Runtime descriptor of the type carried by a data channel.
///
/// Every input and output of a solid carries a `DagType`. When two solids are
/// wired together the builder compares the descriptors, so a `String` output can
/// never be bound to an `i64` input. The special [`DagType::any`] descriptor
/// accepts every type and defers the check to the moment the value is read.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DagType {
    id: Option<TypeId>,
    name: &'static str,
}

impl DagType {
    /// Descriptor for the concrete type `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: Some(TypeId::of::<T>()),
            name: std::any::type_name::<T>(),
        }
    }

    /// Descriptor accepting values of any type.
    pub fn any() -> Self {
        Self {
            id: None,
            name: "Any",
        }
    }

    /// Human-readable type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_any(&self) -> bool {
        self.id.is_none()
    }

    /// Whether a channel of this type can receive values of `source` type.
    pub(crate) fn accepts(&self, source: &DagType) -> bool {
        match (self.id, source.id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    pub(crate) fn matches<T: 'static>(&self) -> bool {
        self.id.is_none_or(|id| id == TypeId::of::<T>())
    }

    /// Whether the concrete value behind `value` is of this type.
    pub(crate) fn admits(&self, value: &Dynamic) -> bool {
        self.id.is_none_or(|id| id == (**value).type_id())
    }
}

impl std::fmt::Debug for DagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DagType({})", self.name)
    }
}

impl std::fmt::Display for DagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Named, shared values made available to every step of a run.
///
/// Resources are how steps reach the outside world: the lakehouse a table is
/// materialized into, a client, a connection pool. They are looked up by name
/// and downcast to the requested type.
#[derive(Clone, Default)]
pub struct Resources {
    map: HashMap<String, Dynamic>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `name`, replacing any previous resource.
    pub fn with<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(value));
        self
    }

    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        self.map.get(name).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.map.keys().collect();
        names.sort();
        f.debug_struct("Resources").field("names", &names).finish()
    }
}

/// The context passed to every step execution.
///
/// `SolidContext` provides access to the step's configuration, the run's
/// resources and a tracing span scoped to the step. It is immutable during
/// step execution.
pub struct SolidContext<'a> {
    pub(crate) step: &'a str,
    pub(crate) run_id: &'a str,
    pub(crate) config: Option<&'a serde_json::Value>,
    pub(crate) resources: &'a Resources,
    /// Tracing span assigned to this step.
    pub(crate) span: tracing::Span,
}

impl<'a> SolidContext<'a> {
    /// Fully qualified name of the running step, e.g. `add_both.adder_a`.
    pub fn step_name(&self) -> &'a str {
        self.step
    }

    pub fn run_id(&self) -> &'a str {
        self.run_id
    }

    /// Raw per-solid configuration from the run config, if any was given.
    pub fn config(&self) -> Option<&'a serde_json::Value> {
        self.config
    }

    /// Decodes the per-solid configuration into `T`.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let value = self.config.cloned().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(StepError::Config)
    }

    /// Looks up a shared resource by name.
    pub fn resource<T: 'static>(&self, name: &str) -> Result<&'a T, StepError> {
        self.resources
            .get::<T>(name)
            .ok_or_else(|| StepError::MissingResource {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
