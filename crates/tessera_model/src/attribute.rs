//! Variant attributes and the managed factories that rebuild their values.

use crate::error::ModelError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tessera_graph::Value;

/// A named, typed attribute key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute {
    /// The attribute name, e.g. `org.example.usage`.
    pub name: String,
    /// The declared value type.
    pub value_type: String,
}

impl Attribute {
    /// Creates an attribute key.
    pub fn of(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
        }
    }
}

/// A value produced by a managed factory, stored as its public type and state.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedValue {
    /// The id of the factory that rebuilds the value.
    pub factory_id: i32,
    /// The public type of the value.
    pub public_type: String,
    /// The opaque state the factory rebuilds the value from.
    pub state: Value,
}

/// The value of an attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// A plain value, copied as is.
    Isolated(Value),
    /// A value rebuilt through a managed factory.
    Managed(ManagedValue),
}

/// Rebuilds managed values of one family from their state.
pub trait ManagedFactory: Send + Sync + fmt::Debug {
    /// The id written to the stream.
    fn id(&self) -> i32;

    /// Rebuilds a value of `public_type` from `state`.
    fn create(&self, public_type: &str, state: Value) -> Result<ManagedValue, ModelError>;
}

/// Managed values whose state is their name.
#[derive(Debug, Default)]
pub struct NamedFactory;

impl NamedFactory {
    /// The factory id.
    pub const ID: i32 = 1;
}

impl ManagedFactory for NamedFactory {
    fn id(&self) -> i32 {
        Self::ID
    }

    fn create(&self, public_type: &str, state: Value) -> Result<ManagedValue, ModelError> {
        match state {
            Value::Str(name) if !name.is_empty() => Ok(ManagedValue {
                factory_id: Self::ID,
                public_type: public_type.to_string(),
                state: Value::Str(name),
            }),
            other => Err(ModelError::InvalidManagedState {
                public_type: public_type.to_string(),
                reason: format!("expected a non-empty name, found {}", other.kind_name()),
            }),
        }
    }
}

/// Managed factories by id.
#[derive(Debug, Default)]
pub struct ManagedFactoryRegistry {
    factories: HashMap<i32, Arc<dyn ManagedFactory>>,
}

impl ManagedFactoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in factories.
    pub fn standard() -> Self {
        Self::new().with(Arc::new(NamedFactory))
    }

    /// Registers `factory` under its id.
    pub fn with(mut self, factory: Arc<dyn ManagedFactory>) -> Self {
        self.factories.insert(factory.id(), factory);
        self
    }

    /// Returns the factory registered under `id`.
    pub fn lookup(&self, id: i32) -> Result<Arc<dyn ManagedFactory>, ModelError> {
        self.factories
            .get(&id)
            .cloned()
            .ok_or(ModelError::UnknownManagedFactory(id))
    }
}

/// An immutable, name-sorted attribute set.
#[derive(Debug, Default, PartialEq)]
pub struct ImmutableAttributes {
    entries: Vec<(Attribute, AttributeValue)>,
}

impl ImmutableAttributes {
    /// Returns the entries sorted by attribute name.
    pub fn entries(&self) -> &[(Attribute, AttributeValue)] {
        &self.entries
    }

    /// Returns the value of `attribute`.
    pub fn get(&self, attribute: &Attribute) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, v)| v)
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Interns attribute sets so equal sets share one instance.
#[derive(Debug, Default)]
pub struct AttributesFactory {
    interned: Mutex<Vec<Arc<ImmutableAttributes>>>,
}

impl AttributesFactory {
    /// Creates a factory with an empty intern table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the empty attribute set.
    pub fn root(&self) -> Arc<ImmutableAttributes> {
        self.of(Vec::new())
    }

    /// Returns the interned set holding `entries`; later duplicates win.
    pub fn of(&self, entries: Vec<(Attribute, AttributeValue)>) -> Arc<ImmutableAttributes> {
        let mut sorted: Vec<(Attribute, AttributeValue)> = Vec::with_capacity(entries.len());
        for (attribute, value) in entries {
            match sorted.iter_mut().find(|(a, _)| *a == attribute) {
                Some(slot) => slot.1 = value,
                None => sorted.push((attribute, value)),
            }
        }
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let candidate = ImmutableAttributes { entries: sorted };
        let mut interned = self.interned.lock();
        if let Some(existing) = interned.iter().find(|a| ***a == candidate) {
            return Arc::clone(existing);
        }
        let attributes = Arc::new(candidate);
        interned.push(Arc::clone(&attributes));
        attributes
    }

    /// Returns the number of distinct sets created.
    pub fn interned(&self) -> usize {
        self.interned.lock().len()
    }
}

/// A mutable attribute set.
#[derive(Debug, Default)]
pub struct AttributeContainer {
    entries: RwLock<Vec<(Attribute, AttributeValue)>>,
}

impl AttributeContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `attribute` to `value`.
    pub fn attribute(&self, attribute: Attribute, value: AttributeValue) -> &Self {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(a, _)| *a == attribute) {
            Some(slot) => slot.1 = value,
            None => entries.push((attribute, value)),
        }
        self
    }

    /// Returns the value of `attribute`.
    pub fn get(&self, attribute: &Attribute) -> Option<AttributeValue> {
        self.entries
            .read()
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, v)| v.clone())
    }

    /// Returns the entries in insertion order.
    pub fn entries(&self) -> Vec<(Attribute, AttributeValue)> {
        self.entries.read().clone()
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns an immutable copy interned through `factory`.
    pub fn as_immutable(&self, factory: &AttributesFactory) -> Arc<ImmutableAttributes> {
        factory.of(self.entries())
    }
}
