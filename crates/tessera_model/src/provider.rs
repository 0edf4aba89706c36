//! Lazily computed values and the properties that hold them.
//!
//! At store time a provider is reduced to its [`ExecutionTimeValue`]: either
//! a value that is already known, or the changing source that must be
//! queried again when the cached plan runs.

use crate::error::ModelError;
use parking_lot::RwLock;
use tessera_graph::Value;

/// What a provider is worth once configuration is over.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ExecutionTimeValue {
    /// The provider has no value.
    #[default]
    Missing,
    /// The value is known and will not change.
    Fixed(Value),
    /// The value is known, and reading it must also run a side effect.
    FixedWithSideEffect {
        /// The known value.
        value: Value,
        /// The action run when the value is read.
        side_effect: Value,
    },
    /// The value must be recomputed from this source at execution time.
    Changing(Value),
}

impl ExecutionTimeValue {
    /// Returns `true` if there is no value.
    pub fn is_missing(&self) -> bool {
        matches!(self, ExecutionTimeValue::Missing)
    }

    /// Returns the known value, if any.
    pub fn fixed_value(&self) -> Option<&Value> {
        match self {
            ExecutionTimeValue::Fixed(value)
            | ExecutionTimeValue::FixedWithSideEffect { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns the side effect attached to a fixed value.
    pub fn side_effect(&self) -> Option<&Value> {
        match self {
            ExecutionTimeValue::FixedWithSideEffect { side_effect, .. } => Some(side_effect),
            _ => None,
        }
    }

    /// Returns the changing source, if the value is not known yet.
    pub fn changing_source(&self) -> Option<&Value> {
        match self {
            ExecutionTimeValue::Changing(source) => Some(source),
            _ => None,
        }
    }
}

/// A read-only, lazily computed value.
#[derive(Debug)]
pub struct Provider {
    value_type: String,
    value: ExecutionTimeValue,
}

impl Provider {
    /// Creates a provider of `value_type` in the given state.
    pub fn new(value_type: impl Into<String>, value: ExecutionTimeValue) -> Self {
        Self {
            value_type: value_type.into(),
            value,
        }
    }

    /// A provider whose value is known.
    pub fn fixed(value_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(value_type, ExecutionTimeValue::Fixed(value.into()))
    }

    /// A provider without a value.
    pub fn missing(value_type: impl Into<String>) -> Self {
        Self::new(value_type, ExecutionTimeValue::Missing)
    }

    /// A provider backed by a source queried at execution time.
    pub fn changing(value_type: impl Into<String>, source: impl Into<Value>) -> Self {
        Self::new(value_type, ExecutionTimeValue::Changing(source.into()))
    }

    /// Returns the declared value type.
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// Returns the provider's state.
    pub fn execution_time_value(&self) -> &ExecutionTimeValue {
        &self.value
    }

    /// Returns the value if it is already known.
    pub fn get(&self) -> Option<&Value> {
        self.value.fixed_value()
    }
}

/// The shape of value a [`Property`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// A single value.
    Scalar,
    /// An ordered list.
    List,
    /// A set.
    Set,
    /// A map.
    Map,
    /// A directory location.
    Directory,
    /// A regular file location.
    RegularFile,
}

impl PropertyKind {
    /// Every kind, in discriminant order.
    pub const ALL: [PropertyKind; 6] = [
        PropertyKind::Scalar,
        PropertyKind::List,
        PropertyKind::Set,
        PropertyKind::Map,
        PropertyKind::Directory,
        PropertyKind::RegularFile,
    ];

    /// Returns the kind's name, for messages.
    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::Scalar => "scalar",
            PropertyKind::List => "list",
            PropertyKind::Set => "set",
            PropertyKind::Map => "map",
            PropertyKind::Directory => "directory",
            PropertyKind::RegularFile => "regular file",
        }
    }

    /// Returns the stream discriminant.
    pub fn discriminant(self) -> u8 {
        self as u8
    }

    /// Returns the kind with stream discriminant `value`.
    pub fn from_discriminant(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

/// The mutable state of a [`Property`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyState {
    /// The current value.
    pub value: ExecutionTimeValue,
    /// Further changes are rejected.
    pub disallow_changes: bool,
    /// Reading before execution is rejected.
    pub disallow_unsafe_read: bool,
}

/// A configurable provider.
#[derive(Debug)]
pub struct Property {
    kind: PropertyKind,
    value_type: String,
    state: RwLock<PropertyState>,
}

impl Property {
    /// Creates an empty property.
    pub fn new(kind: PropertyKind, value_type: impl Into<String>) -> Self {
        Self::from_state(kind, value_type, PropertyState::default())
    }

    /// Creates a property restored from `state`.
    pub fn from_state(kind: PropertyKind, value_type: impl Into<String>, state: PropertyState) -> Self {
        Self {
            kind,
            value_type: value_type.into(),
            state: RwLock::new(state),
        }
    }

    /// Returns the property kind.
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Returns the declared value type.
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// Returns a snapshot of the state.
    pub fn state(&self) -> PropertyState {
        self.state.read().clone()
    }

    /// Sets a known value.
    pub fn set(&self, value: impl Into<Value>) -> Result<(), ModelError> {
        self.set_value(ExecutionTimeValue::Fixed(value.into()))
    }

    /// Replaces the value with `value`.
    pub fn set_value(&self, value: ExecutionTimeValue) -> Result<(), ModelError> {
        let mut state = self.state.write();
        if state.disallow_changes {
            return Err(ModelError::ChangesDisallowed {
                kind: self.kind.name(),
                value_type: self.value_type.clone(),
            });
        }
        state.value = value;
        Ok(())
    }

    /// Returns the known value, if any.
    pub fn get(&self) -> Option<Value> {
        self.state.read().value.fixed_value().cloned()
    }

    /// Rejects further changes.
    pub fn disallow_changes(&self) {
        self.state.write().disallow_changes = true;
    }

    /// Rejects reads before execution.
    pub fn disallow_unsafe_read(&self) {
        self.state.write().disallow_unsafe_read = true;
    }
}
