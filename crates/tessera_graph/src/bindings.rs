//! Ordered codec registry and the generic encoder built on it.
//!
//! A [`Bindings`] set is an immutable, ordered list of (type matcher, codec)
//! pairs queried first-match-wins. New sets are derived by layering: the
//! parent is never mutated, so one base set can back several independent
//! top-level codecs.
//!
//! [`BindingsCodec`] is the generic encoder. It resolves the binding for a
//! value's runtime type and writes the binding's index as the type tag
//! (`-1` for null), so decoding dispatches by index without type names.

use crate::codec::{Codec, ValueCodec};
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeError, EncodeError};
use crate::value::{Object, ObjectRef, TypeKey, Value};
use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tessera_diagnostics::DiagnosticCode;

/// Tag written for [`Value::Null`].
pub const NULL_TAG: i32 = -1;

type TypePredicate = Arc<dyn Fn(&TypeKey) -> bool + Send + Sync>;

/// Decides whether a binding applies to a runtime type.
#[derive(Clone)]
pub enum Matcher {
    /// Matches exactly one type.
    Exact(TypeId),
    /// Matches every type accepted by the predicate.
    Predicate(TypePredicate),
}

impl Matcher {
    /// Returns `true` if this matcher accepts `key`.
    pub fn matches(&self, key: &TypeKey) -> bool {
        match self {
            Matcher::Exact(id) => key.id == *id,
            Matcher::Predicate(p) => p(key),
        }
    }
}

/// One (matcher, codec) pair.
#[derive(Clone)]
pub struct Binding {
    /// Human-readable name used in debug output.
    pub name: &'static str,
    /// The type match rule.
    pub matcher: Matcher,
    /// The codec applied to matching values.
    pub codec: ValueCodec,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding").field("name", &self.name).finish()
    }
}

/// Adapts a typed `Codec<Arc<T>>` to the dynamic value model.
struct ObjectCodec<T, C> {
    inner: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Object, C: Codec<Arc<T>>> Codec<Value> for ObjectCodec<T, C> {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        let typed = value.downcast::<T>().ok_or_else(|| EncodeError::Illegal {
            what: value.kind_name().to_string(),
            reason: format!("bound codec expects '{}'", type_name::<T>()),
        })?;
        self.inner.encode(ctx, &typed)
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        Ok(self
            .inner
            .decode(ctx)?
            .map(|obj| Value::Object(ObjectRef::from_arc(obj))))
    }
}

/// Collects bindings in registration order.
#[derive(Default)]
pub struct BindingsBuilder {
    bindings: Vec<Binding>,
}

impl BindingsBuilder {
    /// Appends a prepared binding.
    pub fn register(&mut self, binding: Binding) -> &mut Self {
        self.bindings.push(binding);
        self
    }

    /// Binds a typed codec for objects of exactly type `T`.
    pub fn bind<T: Object, C: Codec<Arc<T>> + 'static>(&mut self, codec: C) -> &mut Self {
        self.register(Binding {
            name: type_name::<T>(),
            matcher: Matcher::Exact(TypeId::of::<T>()),
            codec: Arc::new(ObjectCodec {
                inner: codec,
                _marker: PhantomData,
            }),
        })
    }

    /// Binds a dynamic codec for values whose runtime type is `key`.
    pub fn bind_value(&mut self, key: TypeKey, codec: impl Codec<Value> + 'static) -> &mut Self {
        self.register(Binding {
            name: key.name,
            matcher: Matcher::Exact(key.id),
            codec: Arc::new(codec),
        })
    }

    /// Binds a dynamic codec for every runtime type accepted by `predicate`.
    pub fn bind_matching(
        &mut self,
        name: &'static str,
        predicate: impl Fn(&TypeKey) -> bool + Send + Sync + 'static,
        codec: ValueCodec,
    ) -> &mut Self {
        self.register(Binding {
            name,
            matcher: Matcher::Predicate(Arc::new(predicate)),
            codec,
        })
    }
}

/// An immutable, ordered list of bindings.
#[derive(Clone, Debug)]
pub struct Bindings {
    bindings: Arc<[Binding]>,
}

impl Default for Bindings {
    fn default() -> Self {
        Self {
            bindings: Arc::from(Vec::new()),
        }
    }
}

impl Bindings {
    /// Builds a set from the bindings registered by `f`, in order.
    pub fn of(f: impl FnOnce(&mut BindingsBuilder)) -> Self {
        let mut builder = BindingsBuilder::default();
        f(&mut builder);
        Self {
            bindings: builder.bindings.into(),
        }
    }

    /// Returns a new set: this set's bindings followed by those registered by `f`.
    ///
    /// Appended bindings only apply to types nothing earlier matched.
    pub fn append(&self, f: impl FnOnce(&mut BindingsBuilder)) -> Self {
        self.then(&Bindings::of(f))
    }

    /// Returns a new set: the bindings registered by `f` followed by this set's.
    pub fn prepend(&self, f: impl FnOnce(&mut BindingsBuilder)) -> Self {
        Bindings::compose(self, &Bindings::of(f))
    }

    /// Layers `extra` over `parent`, giving `extra` precedence.
    pub fn compose(parent: &Bindings, extra: &Bindings) -> Self {
        extra.then(parent)
    }

    /// Returns a new set: this set's bindings followed by `other`'s.
    pub fn then(&self, other: &Bindings) -> Self {
        let bindings: Vec<Binding> = self
            .bindings
            .iter()
            .chain(other.bindings.iter())
            .cloned()
            .collect();
        Self {
            bindings: bindings.into(),
        }
    }

    /// Returns the index and binding of the first match for `key`.
    pub fn resolve(&self, key: &TypeKey) -> Option<(usize, &Binding)> {
        self.bindings
            .iter()
            .enumerate()
            .find(|(_, b)| b.matcher.matches(key))
    }

    /// Returns the binding at `index`.
    pub fn get(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Builds the generic encoder over this set.
    pub fn build(&self) -> BindingsCodec {
        BindingsCodec::new(self.clone())
    }
}

/// The generic encoder: resolves a binding per value and tags it by index.
pub struct BindingsCodec {
    bindings: Bindings,
    resolved: RwLock<HashMap<TypeId, Option<usize>>>,
}

impl BindingsCodec {
    /// Creates an encoder over `bindings`.
    pub fn new(bindings: Bindings) -> Self {
        Self {
            bindings,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the bindings this encoder dispatches over.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    fn tag_for(&self, key: &TypeKey) -> Option<usize> {
        if let Some(tag) = self.resolved.read().get(&key.id) {
            return *tag;
        }
        let tag = self.bindings.resolve(key).map(|(index, _)| index);
        self.resolved.write().insert(key.id, tag);
        tag
    }
}

impl Codec<Value> for BindingsCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        if value.is_null() {
            return ctx.write_int(NULL_TAG);
        }
        let key = value.type_key();
        let Some(tag) = self.tag_for(&key) else {
            ctx.report_unsupported(
                DiagnosticCode::NO_CODEC,
                format!("cannot serialize object of type '{key}': no codec is registered for it"),
            );
            return ctx.write_int(NULL_TAG);
        };
        ctx.write_int(tag as i32)?;
        let codec = Arc::clone(&self.bindings.bindings[tag].codec);
        codec.encode(ctx, value).map_err(|e| ctx.traced(e))
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        let tag = ctx.read_int()?;
        if tag == NULL_TAG {
            return Ok(None);
        }
        let binding = usize::try_from(tag)
            .ok()
            .and_then(|index| self.bindings.get(index))
            .ok_or(DecodeError::UnknownTag {
                tag,
                bindings: self.bindings.len(),
            })?;
        let codec = Arc::clone(&binding.codec);
        codec.decode(ctx).map_err(|e| ctx.traced(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Session;
    use crate::isolate::IsolateOwner;
    use tessera_common::Path;

    #[derive(Debug)]
    struct Celsius(i32);

    struct CelsiusCodec;

    impl Codec<Arc<Celsius>> for CelsiusCodec {
        fn encode(&self, ctx: &mut WriteContext, value: &Arc<Celsius>) -> Result<(), EncodeError> {
            ctx.write_int(value.0)
        }

        fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<Celsius>>, DecodeError> {
            Ok(Some(Arc::new(Celsius(ctx.read_int()?))))
        }
    }

    struct Constant(i32);

    impl Codec<Value> for Constant {
        fn encode(&self, _: &mut WriteContext, _: &Value) -> Result<(), EncodeError> {
            Ok(())
        }

        fn decode(&self, _: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
            Ok(Some(Value::Int(self.0)))
        }
    }

    fn owner() -> IsolateOwner {
        IsolateOwner::Build(Path::root())
    }

    fn roundtrip(bindings: &Bindings, value: &Value) -> (Value, Session) {
        let codec: ValueCodec = Arc::new(bindings.build());
        let session = Session::new();
        let mut w = WriteContext::new(session.clone(), owner(), Arc::clone(&codec));
        w.write(value).unwrap();
        let mut r = ReadContext::new(session.clone(), owner(), codec, w.into_bytes());
        (r.read().unwrap(), session)
    }

    #[test]
    fn first_match_wins() {
        let bindings = Bindings::of(|b| {
            b.bind_value(TypeKey::of::<i32>(), Constant(1));
            b.bind_value(TypeKey::of::<i32>(), Constant(2));
        });
        let (decoded, _) = roundtrip(&bindings, &Value::Int(0));
        assert_eq!(decoded, Value::Int(1));
    }

    #[test]
    fn compose_gives_extra_precedence_without_mutating_parent() {
        let parent = Bindings::of(|b| {
            b.bind_value(TypeKey::of::<i32>(), Constant(1));
        });
        let extra = Bindings::of(|b| {
            b.bind_value(TypeKey::of::<i32>(), Constant(2));
        });
        let composed = Bindings::compose(&parent, &extra);
        assert_eq!(parent.len(), 1);
        assert_eq!(composed.len(), 2);
        assert_eq!(roundtrip(&composed, &Value::Int(0)).0, Value::Int(2));
        assert_eq!(roundtrip(&parent, &Value::Int(0)).0, Value::Int(1));
    }

    #[test]
    fn append_only_fills_gaps() {
        let base = Bindings::of(|b| {
            b.bind_value(TypeKey::of::<i32>(), Constant(1));
        });
        let extended = base.append(|b| {
            b.bind_value(TypeKey::of::<i32>(), Constant(9));
            b.bind_value(TypeKey::of::<bool>(), Constant(7));
        });
        assert_eq!(roundtrip(&extended, &Value::Int(0)).0, Value::Int(1));
        assert_eq!(roundtrip(&extended, &Value::Bool(true)).0, Value::Int(7));
    }

    #[test]
    fn typed_binding_roundtrip() {
        let bindings = Bindings::of(|b| {
            b.bind::<Celsius, _>(CelsiusCodec);
        });
        let (decoded, _) = roundtrip(&bindings, &Value::object(Celsius(21)));
        assert_eq!(decoded.downcast::<Celsius>().unwrap().0, 21);
    }

    #[test]
    fn object_resolves_to_binding_of_referenced_type() {
        let bindings = Bindings::of(|b| {
            b.bind_value(TypeKey::of::<i32>(), Constant(1));
            b.bind::<Celsius, _>(CelsiusCodec);
            b.bind_matching("anything", |_| true, Arc::new(Constant(0)));
        });
        let value = Value::object(Celsius(4));
        let (index, _) = bindings.resolve(&value.type_key()).unwrap();
        assert_eq!(index, 1);
        let (decoded, _) = roundtrip(&bindings, &value);
        assert_eq!(decoded.downcast::<Celsius>().unwrap().0, 4);
    }

    #[test]
    fn predicate_binding() {
        let bindings = Bindings::of(|b| {
            b.bind_matching(
                "any int-like",
                |key| key.name.ends_with("i32") || key.name.ends_with("i64"),
                Arc::new(Constant(5)),
            );
        });
        assert_eq!(roundtrip(&bindings, &Value::Long(3)).0, Value::Int(5));
    }

    #[test]
    fn null_roundtrip() {
        let bindings = Bindings::default();
        assert_eq!(roundtrip(&bindings, &Value::Null).0, Value::Null);
    }

    #[test]
    fn unresolved_type_degrades_to_null_with_diagnostic() {
        let bindings = Bindings::default();
        let (decoded, session) = roundtrip(&bindings, &Value::object(Celsius(1)));
        assert_eq!(decoded, Value::Null);
        assert_eq!(session.diagnostics.count_code(DiagnosticCode::NO_CODEC), 1);
    }

    #[test]
    fn out_of_range_tag_is_corruption() {
        let codec: ValueCodec = Arc::new(Bindings::default().build());
        let mut w = WriteContext::new(Session::new(), owner(), Arc::clone(&codec));
        w.write_int(3).unwrap();
        let mut r = ReadContext::new(Session::new(), owner(), codec, w.into_bytes());
        let err = r.read().unwrap_err();
        assert!(matches!(err, DecodeError::UnknownTag { tag: 3, bindings: 0 }));
        assert!(err.is_protocol_corruption());
    }
}
