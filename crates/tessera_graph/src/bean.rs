//! The reflective fallback for types without a dedicated codec.
//!
//! A bean describes its own fields through [`Bean`]; the codec walks them in
//! declaration order, recursing through the active codec for every value.
//! Beans live behind a [`BeanCell`] so a decoded instance can be registered
//! for back references before its fields are assigned, which is what makes
//! cyclic graphs decodable.
//!
//! Wire layout of a bean's first occurrence:
//!
//! ```text
//! type name | field count | (field name, tagged value)*
//! ```

use crate::bindings::Bindings;
use crate::codec::{Codec, ValueCodec};
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeError, EncodeError};
use crate::trace::TraceFrame;
use crate::unsupported::UnsupportedTypes;
use crate::value::{ObjectRef, TypeKey, Value, ValueMismatch};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tessera_diagnostics::{DiagnosticCode, Severity};

/// Interior-mutable storage for a bean; the runtime type bindings match on.
pub type BeanCell<T> = RwLock<T>;

/// Wraps `bean` in a fresh [`BeanCell`] object.
pub fn new_bean<T: Bean>(bean: T) -> ObjectRef {
    ObjectRef::new(RwLock::new(bean))
}

/// A field could not be assigned from a decoded value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The bean has no field with this name.
    #[error("no field named '{0}'")]
    UnknownField(String),

    /// The decoded value does not fit the field's type.
    #[error(transparent)]
    Mismatch(#[from] ValueMismatch),

    /// The object is not a bean of the expected type.
    #[error("object is not a '{0}' bean")]
    NotABean(&'static str),
}

/// A type whose state is its list of named fields.
///
/// `fields` must return fields in a stable order; the order is the on-disk
/// layout.
pub trait Bean: Default + Send + Sync + fmt::Debug + 'static {
    /// The name written to the stream and used to find the type on decode.
    const TYPE_NAME: &'static str;

    /// Returns a snapshot of every field, in declaration order.
    fn fields(&self) -> Vec<(&'static str, Value)>;

    /// Assigns one decoded field.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError>;
}

/// Implements [`Bean`] for a struct whose listed fields convert to and from [`Value`].
#[macro_export]
macro_rules! impl_bean {
    ($ty:ty, $name:literal { $($field:ident),* $(,)? }) => {
        impl $crate::Bean for $ty {
            const TYPE_NAME: &'static str = $name;

            fn fields(&self) -> Vec<(&'static str, $crate::Value)> {
                vec![$((stringify!($field), $crate::Value::from(self.$field.clone()))),*]
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::Value,
            ) -> Result<(), $crate::FieldError> {
                match name {
                    $(stringify!($field) => {
                        self.$field = $crate::FromValue::from_value(value)?;
                        Ok(())
                    })*
                    other => Err($crate::FieldError::UnknownField(other.to_string())),
                }
            }
        }
    };
}

struct BeanType {
    name: &'static str,
    fields: fn(&ObjectRef) -> Option<Vec<(&'static str, Value)>>,
    instantiate: fn() -> ObjectRef,
    assign: fn(&ObjectRef, &str, Value) -> Result<(), FieldError>,
}

fn bean_fields<T: Bean>(obj: &ObjectRef) -> Option<Vec<(&'static str, Value)>> {
    obj.downcast_ref::<BeanCell<T>>().map(|cell| cell.read().fields())
}

fn instantiate<T: Bean>() -> ObjectRef {
    new_bean(T::default())
}

fn assign<T: Bean>(obj: &ObjectRef, name: &str, value: Value) -> Result<(), FieldError> {
    let cell = obj
        .downcast_ref::<BeanCell<T>>()
        .ok_or(FieldError::NotABean(T::TYPE_NAME))?;
    cell.write().set_field(name, value)
}

/// The set of types the bean codec may reconstruct.
#[derive(Default)]
pub struct BeanRegistry {
    by_type: HashMap<TypeId, Arc<BeanType>>,
    by_name: HashMap<&'static str, Arc<BeanType>>,
}

impl BeanRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`.
    pub fn register<T: Bean>(&mut self) -> &mut Self {
        let ty = Arc::new(BeanType {
            name: T::TYPE_NAME,
            fields: bean_fields::<T>,
            instantiate: instantiate::<T>,
            assign: assign::<T>,
        });
        self.by_type
            .insert(TypeId::of::<BeanCell<T>>(), Arc::clone(&ty));
        self.by_name.insert(T::TYPE_NAME, ty);
        self
    }

    /// Returns `true` if values of runtime type `key` are registered beans.
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.by_type.contains_key(&key.id)
    }

    /// Returns `true` if a bean is registered under `name`.
    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Returns the number of registered bean types.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    fn by_type(&self, key: &TypeKey) -> Option<&Arc<BeanType>> {
        self.by_type.get(&key.id)
    }

    fn by_name(&self, name: &str) -> Option<&Arc<BeanType>> {
        self.by_name.get(name)
    }
}

impl fmt::Debug for BeanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("BeanRegistry").field("types", &names).finish()
    }
}

/// Encodes registered beans field by field, preserving identity.
pub struct BeanCodec {
    registry: Arc<BeanRegistry>,
    unsupported: Arc<UnsupportedTypes>,
}

impl BeanCodec {
    /// Creates a codec over `registry`, skipping fields whose values are in `unsupported`.
    pub fn new(registry: Arc<BeanRegistry>, unsupported: Arc<UnsupportedTypes>) -> Self {
        Self {
            registry,
            unsupported,
        }
    }

    /// Writes the fields of `obj`, which must be a registered bean.
    ///
    /// Used directly by codecs that write a bean's state without its
    /// identity or type name, such as the task codec.
    pub fn write_bean_state(&self, ctx: &mut WriteContext, obj: &ObjectRef) -> Result<(), EncodeError> {
        let ty = self.bean_type(obj)?;
        let fields = (ty.fields)(obj).ok_or_else(|| not_a_bean(obj))?;
        let mut kept = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let key = value.type_key();
            if self.unsupported.contains(&key) {
                ctx.with_trace(TraceFrame::Field(name.to_string()), |ctx| {
                    ctx.report_unsupported(
                        DiagnosticCode::UNSUPPORTED_FIELD,
                        self.unsupported.message(&key),
                    );
                    Ok(())
                })?;
                continue;
            }
            kept.push((name, value));
        }
        ctx.write_collection(kept, |ctx, (name, value)| {
            ctx.write_str(name)?;
            ctx.with_trace(TraceFrame::Field(name.to_string()), |ctx| ctx.write(&value))
        })
    }

    /// Reads fields written by [`write_bean_state`](Self::write_bean_state) into `obj`.
    ///
    /// A field that cannot take its decoded value keeps its default and is
    /// reported as a warning.
    pub fn read_bean_state(&self, ctx: &mut ReadContext, obj: &ObjectRef) -> Result<(), DecodeError> {
        let ty = self
            .registry
            .by_type(&obj.type_key())
            .cloned()
            .ok_or_else(|| DecodeError::Construction {
                type_name: obj.type_key().short_name().to_string(),
                reason: "not a registered bean".to_string(),
            })?;
        let count = ctx.read_len()?;
        for _ in 0..count {
            let name = ctx.read_string()?;
            ctx.with_trace(TraceFrame::Field(name.clone()), |ctx| {
                let value = ctx.read()?;
                if let Err(err) = (ty.assign)(obj, &name, value) {
                    tracing::warn!(bean = ty.name, field = %name, "field not assignable: {err}");
                    ctx.report_problem(
                        Severity::Warning,
                        DiagnosticCode::FIELD_NOT_ASSIGNABLE,
                        format!("cannot assign field '{name}' of '{}': {err}", ty.name),
                    );
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn bean_type(&self, obj: &ObjectRef) -> Result<&Arc<BeanType>, EncodeError> {
        self.registry
            .by_type(&obj.type_key())
            .ok_or_else(|| not_a_bean(obj))
    }
}

fn not_a_bean(obj: &ObjectRef) -> EncodeError {
    EncodeError::Illegal {
        what: obj.type_key().short_name().to_string(),
        reason: "not a registered bean".to_string(),
    }
}

impl Codec<Value> for BeanCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        let obj = value.as_object().ok_or_else(|| EncodeError::Illegal {
            what: value.kind_name().to_string(),
            reason: "beans must be objects".to_string(),
        })?;
        let name = self.bean_type(obj)?.name;
        ctx.encode_preserving_identity(obj, |ctx| {
            ctx.write_str(name)?;
            ctx.with_trace(TraceFrame::Bean(name.to_string()), |ctx| {
                self.write_bean_state(ctx, obj)
            })
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        let obj = ctx.decode_preserving_identity(|ctx, id| {
            let name = ctx.read_string()?;
            let ty = self
                .registry
                .by_name(&name)
                .ok_or_else(|| DecodeError::Construction {
                    type_name: name.clone(),
                    reason: "no bean type is registered under this name".to_string(),
                })?;
            let obj = (ty.instantiate)();
            ctx.put_instance(id, obj.clone());
            ctx.with_trace(TraceFrame::Bean(name), |ctx| self.read_bean_state(ctx, &obj))?;
            Ok(obj)
        })?;
        Ok(Some(Value::Object(obj)))
    }
}

/// Guards a codec against unbounded recursion through nested beans.
pub struct Reentrant<C> {
    inner: C,
}

impl<C> Reentrant<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Codec<Value>> Codec<Value> for Reentrant<C> {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        ctx.nested(|ctx| self.inner.encode(ctx, value))
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        ctx.nested(|ctx| self.inner.decode(ctx))
    }
}

/// The bean layer: matches every registered bean; goes last.
pub fn bean_types(registry: Arc<BeanRegistry>, unsupported: Arc<UnsupportedTypes>) -> Bindings {
    let known = Arc::clone(&registry);
    let codec: ValueCodec = Arc::new(Reentrant::new(BeanCodec::new(registry, unsupported)));
    Bindings::of(move |b| {
        b.bind_matching("beans", move |key| known.contains(key), codec);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::base_types;
    use crate::context::Session;
    use crate::isolate::IsolateOwner;
    use crate::unsupported::unsupported_types;
    use tessera_common::Path;

    #[derive(Debug, Default)]
    struct Link {
        label: String,
        next: Option<ObjectRef>,
    }

    crate::impl_bean!(Link, "Link" { label, next });

    #[derive(Debug, Default)]
    struct Pair {
        left: Option<ObjectRef>,
        right: Option<ObjectRef>,
    }

    crate::impl_bean!(Pair, "Pair" { left, right });

    #[derive(Debug, Default)]
    struct Counter {
        count: i32,
    }

    crate::impl_bean!(Counter, "Counter" { count });

    #[derive(Debug, Default)]
    struct Holder {
        handle: Option<ObjectRef>,
        note: String,
    }

    crate::impl_bean!(Holder, "Holder" { handle, note });

    #[derive(Debug)]
    struct Handle;

    fn registry() -> Arc<BeanRegistry> {
        let mut registry = BeanRegistry::new();
        registry
            .register::<Link>()
            .register::<Pair>()
            .register::<Counter>()
            .register::<Holder>();
        Arc::new(registry)
    }

    fn codec(registry: Arc<BeanRegistry>) -> ValueCodec {
        let unsupported = Arc::new(UnsupportedTypes::new().with::<Handle>("a handle"));
        let bindings = unsupported_types(Arc::clone(&unsupported))
            .then(&base_types())
            .then(&bean_types(registry, unsupported));
        Arc::new(bindings.build())
    }

    fn owner() -> IsolateOwner {
        IsolateOwner::Build(Path::root())
    }

    fn roundtrip_with(session: Session, registry: Arc<BeanRegistry>, value: &Value) -> Value {
        let codec = codec(registry);
        let mut w = WriteContext::new(session.clone(), owner(), Arc::clone(&codec));
        w.write(value).unwrap();
        let mut r = ReadContext::new(session, owner(), codec, w.into_bytes());
        r.read().unwrap()
    }

    fn roundtrip(value: &Value) -> Value {
        roundtrip_with(Session::new(), registry(), value)
    }

    fn field(obj: &ObjectRef, name: &str) -> Value {
        let cell = obj.downcast_ref::<BeanCell<Pair>>();
        if let Some(cell) = cell {
            let pair = cell.read();
            return match name {
                "left" => pair.left.clone().into(),
                _ => pair.right.clone().into(),
            };
        }
        let link = obj.downcast_ref::<BeanCell<Link>>().unwrap().read();
        match name {
            "next" => link.next.clone().into(),
            _ => link.label.clone().into(),
        }
    }

    #[test]
    fn fields_roundtrip() {
        let decoded = roundtrip(&Value::Object(new_bean(Counter { count: 7 })));
        let counter = decoded.downcast::<BeanCell<Counter>>().unwrap();
        assert_eq!(counter.read().count, 7);
    }

    #[test]
    fn bean_handle_resolves_to_its_own_binding() {
        let bean = new_bean(Counter { count: 3 });
        assert_eq!(bean.type_key(), TypeKey::of::<BeanCell<Counter>>());
        let session = Session::new();
        let decoded = roundtrip_with(session.clone(), registry(), &Value::Object(bean));
        assert_eq!(session.diagnostics.count_code(DiagnosticCode::NO_CODEC), 0);
        assert_eq!(decoded.downcast::<BeanCell<Counter>>().unwrap().read().count, 3);
    }

    #[test]
    fn shared_reference_decodes_to_one_instance() {
        let shared = new_bean(Counter { count: 1 });
        let pair = new_bean(Pair {
            left: Some(shared.clone()),
            right: Some(shared),
        });
        let decoded = roundtrip(&Value::Object(pair));
        let obj = decoded.as_object().unwrap();
        let left = field(obj, "left");
        let right = field(obj, "right");
        assert!(left.as_object().unwrap().ptr_eq(right.as_object().unwrap()));
    }

    #[test]
    fn two_cycle_terminates() {
        let a = new_bean(Link {
            label: "a".into(),
            next: None,
        });
        let b = new_bean(Link {
            label: "b".into(),
            next: Some(a.clone()),
        });
        a.downcast_ref::<BeanCell<Link>>().unwrap().write().next = Some(b.clone());

        let decoded = roundtrip(&Value::Object(a));
        let a2 = decoded.as_object().unwrap().clone();
        let b2 = field(&a2, "next").as_object().unwrap().clone();
        assert_eq!(field(&b2, "label"), Value::from("b"));
        assert!(field(&b2, "next").as_object().unwrap().ptr_eq(&a2));
    }

    #[test]
    fn unsupported_field_is_skipped_once() {
        let session = Session::new();
        let holder = new_bean(Holder {
            handle: Some(ObjectRef::new(Handle)),
            note: "kept".into(),
        });
        let decoded = roundtrip_with(session.clone(), registry(), &Value::Object(holder));
        let holder = decoded.downcast::<BeanCell<Holder>>().unwrap();
        assert!(holder.read().handle.is_none());
        assert_eq!(holder.read().note, "kept");
        let diagnostics = session.diagnostics.snapshot();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::UNSUPPORTED_FIELD);
        assert_eq!(
            diagnostics[0].trace.as_deref(),
            Some("field 'handle' of bean 'Holder'")
        );
    }

    #[test]
    fn mismatched_field_keeps_default_with_warning() {
        #[derive(Debug, Default)]
        struct Loose {
            count: String,
        }
        crate::impl_bean!(Loose, "Counter" { count });

        let session = Session::new();
        let codec_out = codec(registry());
        let mut w = WriteContext::new(session.clone(), owner(), codec_out);
        w.write(&Value::Object(new_bean(Counter { count: 3 }))).unwrap();

        let mut loose = BeanRegistry::new();
        loose.register::<Loose>();
        let codec_in = codec(Arc::new(loose));
        let mut r = ReadContext::new(session.clone(), owner(), codec_in, w.into_bytes());
        let decoded = r.read().unwrap();
        let bean = decoded.downcast::<BeanCell<Loose>>().unwrap();
        assert_eq!(bean.read().count, "");
        assert_eq!(session.diagnostics.count_code(DiagnosticCode::FIELD_NOT_ASSIGNABLE), 1);
    }

    #[test]
    fn unknown_bean_name_is_construction_failure() {
        let codec_out = codec(registry());
        let mut w = WriteContext::new(Session::new(), owner(), codec_out);
        w.write(&Value::Object(new_bean(Counter { count: 3 }))).unwrap();

        let mut other = BeanRegistry::new();
        other.register::<Link>();
        let codec_in = codec(Arc::new(other));
        let mut r = ReadContext::new(Session::new(), owner(), codec_in, w.into_bytes());
        let err = r.read().unwrap_err();
        assert!(matches!(err.root(), DecodeError::Construction { .. }));
        assert!(!err.is_protocol_corruption());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut head = new_bean(Link::default());
        for _ in 0..10 {
            head = new_bean(Link {
                label: String::new(),
                next: Some(head),
            });
        }
        let session = Session::new().with_max_bean_depth(4);
        let mut w = WriteContext::new(session, owner(), codec(registry()));
        let err = w.write(&Value::Object(head)).unwrap_err();
        assert!(matches!(err.root(), EncodeError::TooDeep { limit: 4 }));
    }

    #[test]
    fn identities_reset_per_isolate() {
        let shared = new_bean(Counter { count: 2 });
        let value = Value::Object(shared);
        let codec = codec(registry());
        let mut w = WriteContext::new(Session::new(), owner(), Arc::clone(&codec));
        w.write(&value).unwrap();
        let task = IsolateOwner::Task(Path::parse(":app:compile").unwrap());
        w.with_isolate(task.clone(), None, |w| {
            assert_eq!(w.owner(), &task);
            w.write(&value)
        })
        .unwrap();
        w.write(&value).unwrap();
        assert_eq!(w.owner(), &owner());

        let mut r = ReadContext::new(Session::new(), owner(), codec, w.into_bytes());
        let outer = r.read_object().unwrap().unwrap();
        let inner = r
            .with_isolate(task, None, |r| r.read_object())
            .unwrap()
            .unwrap();
        let again = r.read_object().unwrap().unwrap();
        assert!(!outer.ptr_eq(&inner));
        assert!(outer.ptr_eq(&again));
    }
}
