//! The dynamic object model walked by the encoder.
//!
//! A [`Value`] is either an inline scalar or collection, or an [`ObjectRef`]:
//! a shared, type-erased handle whose identity is its allocation address.
//! Identity is what the identity tables key on, so two `ObjectRef`s compare
//! equal only when they point at the same allocation.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Runtime type identity used to resolve bindings.
#[derive(Clone, Copy)]
pub struct TypeKey {
    /// The Rust type id.
    pub id: TypeId,
    /// The Rust type name, for diagnostics only.
    pub name: &'static str,
}

impl TypeKey {
    /// Returns the key of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(idx) => &self.name[idx + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Any shareable value that can sit behind an [`ObjectRef`].
///
/// Implemented for every `Send + Sync + Debug + 'static` type.
pub trait Object: Any + Send + Sync + fmt::Debug {
    /// Borrows `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Converts the shared handle into an `Arc<dyn Any>` for downcasting.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// Returns the runtime type key.
    fn type_key(&self) -> TypeKey;
}

impl<T: Any + Send + Sync + fmt::Debug> Object for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_key(&self) -> TypeKey {
        TypeKey::of::<T>()
    }
}

/// A shared reference to a type-erased object.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Object>);

impl ObjectRef {
    /// Allocates `value` and returns a handle to it.
    ///
    /// Wrapping a handle returns that handle instead of nesting it.
    pub fn new<T: Object>(value: T) -> Self {
        let any: &dyn Any = &value;
        if let Some(inner) = any.downcast_ref::<ObjectRef>() {
            return inner.clone();
        }
        if let Some(inner) = any.downcast_ref::<Arc<dyn Object>>() {
            return Self(Arc::clone(inner));
        }
        Self(Arc::new(value))
    }

    /// Wraps an existing allocation; identity is preserved.
    pub fn from_arc<T: Object>(value: Arc<T>) -> Self {
        let any: &dyn Any = &*value;
        if let Some(inner) = any.downcast_ref::<ObjectRef>() {
            return inner.clone();
        }
        if let Some(inner) = any.downcast_ref::<Arc<dyn Object>>() {
            return Self(Arc::clone(inner));
        }
        Self(value)
    }

    // Calls go through the trait object: `Arc<dyn Object>` is itself an `Object`.
    fn object(&self) -> &dyn Object {
        &*self.0
    }

    /// Returns the runtime type key of the referenced object.
    pub fn type_key(&self) -> TypeKey {
        self.object().type_key()
    }

    /// Returns `true` if the referenced object is a `T`.
    pub fn is<T: Object>(&self) -> bool {
        self.object().as_any().is::<T>()
    }

    /// Borrows the referenced object as a `T`.
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        self.object().as_any().downcast_ref()
    }

    /// Returns a typed handle sharing the same allocation.
    pub fn downcast<T: Object>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).into_any().downcast::<T>().ok()
    }

    /// Returns the allocation address used as identity.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    /// Returns `true` if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.addr() == other.addr()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

// Only the type and address: object graphs may be cyclic.
impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.type_key().short_name(), self.addr())
    }
}

/// Positions of values by hash, for collections that keep insertion order.
#[derive(Clone, Default)]
struct HashIndex(HashMap<u64, Vec<usize>>);

impl HashIndex {
    fn find(&self, hash: u64, mut matches: impl FnMut(usize) -> bool) -> Option<usize> {
        self.0.get(&hash)?.iter().copied().find(|&at| matches(at))
    }

    fn add(&mut self, hash: u64, at: usize) {
        self.0.entry(hash).or_default().push(at);
    }
}

fn fingerprint(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Insertion-ordered set of values.
#[derive(Clone, Default)]
pub struct ValueSet {
    items: Vec<Value>,
    index: HashIndex,
}

impl ValueSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, hash: u64, value: &Value) -> Option<usize> {
        self.index.find(hash, |at| self.items[at] == *value)
    }

    /// Inserts `value` unless an equal value is present; returns whether it was added.
    pub fn insert(&mut self, value: Value) -> bool {
        let hash = fingerprint(&value);
        if self.position(hash, &value).is_some() {
            return false;
        }
        self.index.add(hash, self.items.len());
        self.items.push(value);
        true
    }

    /// Returns `true` if an equal value is present.
    pub fn contains(&self, value: &Value) -> bool {
        self.position(fingerprint(value), value).is_some()
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the set has no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }
}

impl PartialEq for ValueSet {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(&self.items).finish()
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// Insertion-ordered map of values.
#[derive(Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
    index: HashIndex,
}

impl ValueMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, hash: u64, key: &Value) -> Option<usize> {
        self.index.find(hash, |at| self.entries[at].0 == *key)
    }

    /// Inserts or replaces the entry for `key`, returning the previous value.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        let hash = fingerprint(&key);
        if let Some(at) = self.position(hash, &key) {
            return Some(std::mem::replace(&mut self.entries[at].1, value));
        }
        self.index.add(hash, self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Returns the value stored for `key`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(fingerprint(key), key)
            .map(|at| &self.entries[at].1)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Debug for ValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A node in the object graph being serialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absent value, also the placeholder for anything dropped on encode.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A 32-bit integer.
    Int(i32),
    /// A 64-bit integer.
    Long(i64),
    /// A 64-bit float.
    Double(f64),
    /// A character.
    Char(char),
    /// A string.
    Str(String),
    /// A byte array.
    Bytes(Vec<u8>),
    /// A growable, ordered sequence.
    List(Vec<Value>),
    /// A fixed-size array.
    Array(Box<[Value]>),
    /// An insertion-ordered set.
    Set(ValueSet),
    /// An insertion-ordered map.
    Map(ValueMap),
    /// A shared object.
    Object(ObjectRef),
}

impl Value {
    /// Wraps `value` in a fresh [`ObjectRef`].
    pub fn object<T: Object>(value: T) -> Self {
        Value::Object(ObjectRef::new(value))
    }

    /// Returns the runtime type key used for binding resolution.
    pub fn type_key(&self) -> TypeKey {
        match self {
            Value::Null => TypeKey::of::<()>(),
            Value::Bool(_) => TypeKey::of::<bool>(),
            Value::Int(_) => TypeKey::of::<i32>(),
            Value::Long(_) => TypeKey::of::<i64>(),
            Value::Double(_) => TypeKey::of::<f64>(),
            Value::Char(_) => TypeKey::of::<char>(),
            Value::Str(_) => TypeKey::of::<String>(),
            Value::Bytes(_) => TypeKey::of::<Vec<u8>>(),
            Value::List(_) => TypeKey::of::<Vec<Value>>(),
            Value::Array(_) => TypeKey::of::<Box<[Value]>>(),
            Value::Set(_) => TypeKey::of::<ValueSet>(),
            Value::Map(_) => TypeKey::of::<ValueMap>(),
            Value::Object(obj) => obj.type_key(),
        }
    }

    /// Returns a short description of the variant, for mismatch reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(obj) => obj.type_key().short_name(),
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the object handle, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a typed handle if this is an object of type `T`.
    pub fn downcast<T: Object>(&self) -> Option<Arc<T>> {
        self.as_object().and_then(ObjectRef::downcast)
    }
}

// Consistent with `PartialEq`: the zeros compare equal, so they hash alike.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Double(v) => {
                let bits = if *v == 0.0 { 0 } else { v.to_bits() };
                bits.hash(state);
            }
            Value::Char(v) => v.hash(state),
            Value::Str(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::List(items) => items.hash(state),
            Value::Array(items) => items.hash(state),
            Value::Set(set) => set.items.hash(state),
            Value::Map(map) => map.entries.hash(state),
            Value::Object(obj) => obj.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl From<Option<ObjectRef>> for Value {
    fn from(v: Option<ObjectRef>) -> Self {
        v.map_or(Value::Null, Value::Object)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// A decoded value did not have the shape its destination expects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct ValueMismatch {
    /// What the destination accepts.
    pub expected: &'static str,
    /// What the value actually was.
    pub found: &'static str,
}

/// Conversion from a decoded [`Value`] into a concrete field type.
pub trait FromValue: Sized {
    /// Converts `value`, or reports why it does not fit.
    fn from_value(value: Value) -> Result<Self, ValueMismatch>;
}

macro_rules! from_value_variant {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, ValueMismatch> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(ValueMismatch {
                        expected: $expected,
                        found: other.kind_name(),
                    }),
                }
            }
        }
    };
}

from_value_variant!(bool, Bool, "bool");
from_value_variant!(i32, Int, "int");
from_value_variant!(i64, Long, "long");
from_value_variant!(f64, Double, "double");
from_value_variant!(char, Char, "char");
from_value_variant!(String, Str, "string");
from_value_variant!(Vec<u8>, Bytes, "bytes");
from_value_variant!(Vec<Value>, List, "list");
from_value_variant!(ValueSet, Set, "set");
from_value_variant!(ValueMap, Map, "map");
from_value_variant!(ObjectRef, Object, "object");

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Marker;

    #[test]
    fn object_identity_is_pointer() {
        let a = ObjectRef::new(Marker);
        let b = ObjectRef::new(Marker);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn from_arc_keeps_identity() {
        let arc = Arc::new(Marker);
        let a = ObjectRef::from_arc(arc.clone());
        let b = ObjectRef::from_arc(arc);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn downcast_roundtrip() {
        let obj = ObjectRef::new(String::from("x"));
        assert!(obj.is::<String>());
        assert_eq!(obj.downcast_ref::<String>().map(String::as_str), Some("x"));
        let typed = obj.downcast::<String>().unwrap();
        assert_eq!(obj.addr(), Arc::as_ptr(&typed).cast::<()>() as usize);
        assert!(obj.downcast::<Marker>().is_none());
    }

    #[test]
    fn type_keys() {
        assert_eq!(Value::Int(1).type_key(), TypeKey::of::<i32>());
        assert_eq!(Value::object(Marker).type_key(), TypeKey::of::<Marker>());
        assert_eq!(TypeKey::of::<Marker>().short_name(), "Marker");
        assert_eq!(TypeKey::of::<Vec<Value>>().short_name(), "Vec<tessera_graph::value::Value>");
    }

    #[test]
    fn set_deduplicates_in_order() {
        let set: ValueSet = vec![Value::from("b"), Value::from("a"), Value::from("b")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        let items: Vec<_> = set.iter().filter_map(Value::as_str).collect();
        assert_eq!(items, vec!["b", "a"]);
    }

    #[test]
    fn map_replaces_existing_key() {
        let mut map = ValueMap::new();
        assert!(map.insert("k".into(), 1.into()).is_none());
        assert_eq!(map.insert("k".into(), 2.into()), Some(Value::Int(1)));
        assert_eq!(map.get(&"k".into()), Some(&Value::Int(2)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn from_value_conversions() {
        assert_eq!(i32::from_value(Value::Int(3)), Ok(3));
        assert_eq!(
            String::from_value(Value::Int(3)),
            Err(ValueMismatch {
                expected: "string",
                found: "int"
            })
        );
        assert_eq!(Option::<String>::from_value(Value::Null), Ok(None));
    }

    #[test]
    fn nested_handles_collapse() {
        let obj = ObjectRef::new(Marker);
        let wrapped = ObjectRef::new(obj.clone());
        assert!(wrapped.ptr_eq(&obj));
        assert_eq!(wrapped.type_key(), TypeKey::of::<Marker>());
        let from_arc = ObjectRef::from_arc(Arc::new(obj.clone()));
        assert!(from_arc.ptr_eq(&obj));
        assert!(from_arc.is::<Marker>());
    }

    #[test]
    fn set_treats_zeros_as_equal() {
        let set: ValueSet = vec![Value::Double(0.0), Value::Double(-0.0), Value::Double(1.5)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Value::Double(-0.0)));
    }

    #[test]
    fn large_collections_index_by_hash() {
        let set: ValueSet = (0..20_000).map(|i| Value::Int(i % 10_000)).collect();
        assert_eq!(set.len(), 10_000);
        assert!(set.contains(&Value::Int(9_999)));
        assert!(!set.contains(&Value::Long(9_999)));

        let mut map = ValueMap::new();
        for i in 0..10_000 {
            map.insert(Value::from(format!("k{i}")), Value::Int(i));
        }
        map.insert(Value::from("k42"), Value::Int(-1));
        assert_eq!(map.len(), 10_000);
        assert_eq!(map.get(&Value::from("k42")), Some(&Value::Int(-1)));
        let first: Vec<_> = map.iter().take(2).map(|(k, _)| k.clone()).collect();
        assert_eq!(first, vec![Value::from("k0"), Value::from("k1")]);
    }

    #[test]
    fn object_keys_compare_by_identity() {
        let a = ObjectRef::new(Marker);
        let mut map = ValueMap::new();
        map.insert(Value::Object(a.clone()), Value::Int(1));
        map.insert(Value::object(Marker), Value::Int(2));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&Value::Object(a)), Some(&Value::Int(1)));
    }

    #[test]
    fn debug_does_not_recurse() {
        let obj = ObjectRef::new(Marker);
        assert!(format!("{obj:?}").starts_with("Marker@0x"));
    }
}
