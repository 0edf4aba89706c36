//! Codecs for scalars and the built-in collection shapes.
//!
//! Collection codecs write a size and then each element through the active
//! codec, so elements are themselves tagged and may be any value. Each
//! collection counts as one level against the session's nesting limit.

use crate::bindings::Bindings;
use crate::codec::Codec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeError, EncodeError};
use crate::value::{TypeKey, Value, ValueMap, ValueSet};

fn unexpected(expected: &'static str, value: &Value) -> EncodeError {
    EncodeError::Illegal {
        what: value.kind_name().to_string(),
        reason: format!("codec only handles {expected}"),
    }
}

macro_rules! scalar_codec {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $write:ident, $read:ident, $label:literal) => {
        $(#[$meta])*
        pub struct $name;

        impl Codec<Value> for $name {
            fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
                match value {
                    Value::$variant(v) => ctx.$write(*v),
                    other => Err(unexpected($label, other)),
                }
            }

            fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
                Ok(Some(Value::$variant(ctx.$read()?)))
            }
        }
    };
}

scalar_codec!(
    /// Encodes [`Value::Bool`].
    BoolCodec, Bool, write_bool, read_bool, "bool"
);
scalar_codec!(
    /// Encodes [`Value::Int`].
    IntCodec, Int, write_int, read_int, "int"
);
scalar_codec!(
    /// Encodes [`Value::Long`].
    LongCodec, Long, write_long, read_long, "long"
);
scalar_codec!(
    /// Encodes [`Value::Double`].
    DoubleCodec, Double, write_double, read_double, "double"
);
scalar_codec!(
    /// Encodes [`Value::Char`].
    CharCodec, Char, write_char, read_char, "char"
);

/// Encodes [`Value::Str`].
pub struct StringCodec;

impl Codec<Value> for StringCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Str(s) => ctx.write_str(s),
            other => Err(unexpected("string", other)),
        }
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        Ok(Some(Value::Str(ctx.read_string()?)))
    }
}

/// Encodes [`Value::Bytes`].
pub struct BytesCodec;

impl Codec<Value> for BytesCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Bytes(b) => ctx.write_bytes(b),
            other => Err(unexpected("bytes", other)),
        }
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        Ok(Some(Value::Bytes(ctx.read_bytes()?)))
    }
}

/// Encodes [`Value::List`].
pub struct ListCodec;

impl Codec<Value> for ListCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::List(items) => {
                ctx.nested(|ctx| ctx.write_collection(items, |ctx, item| ctx.write(item)))
            }
            other => Err(unexpected("list", other)),
        }
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        let items = ctx.nested(|ctx| ctx.read_collection(|ctx| ctx.read()))?;
        Ok(Some(Value::List(items)))
    }
}

/// Encodes [`Value::Array`].
pub struct ArrayCodec;

impl Codec<Value> for ArrayCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Array(items) => {
                ctx.nested(|ctx| ctx.write_collection(items.iter(), |ctx, item| ctx.write(item)))
            }
            other => Err(unexpected("array", other)),
        }
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        let items = ctx.nested(|ctx| ctx.read_collection(|ctx| ctx.read()))?;
        Ok(Some(Value::Array(items.into_boxed_slice())))
    }
}

/// Encodes [`Value::Set`], preserving insertion order.
pub struct SetCodec;

impl Codec<Value> for SetCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Set(items) => {
                ctx.nested(|ctx| ctx.write_collection(items.iter(), |ctx, item| ctx.write(item)))
            }
            other => Err(unexpected("set", other)),
        }
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        let items = ctx.nested(|ctx| ctx.read_collection(|ctx| ctx.read()))?;
        Ok(Some(Value::Set(items.into_iter().collect::<ValueSet>())))
    }
}

/// Encodes [`Value::Map`], preserving insertion order.
pub struct MapCodec;

impl Codec<Value> for MapCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Map(entries) => ctx.nested(|ctx| {
                ctx.write_collection(entries.iter(), |ctx, (k, v)| {
                    ctx.write(k)?;
                    ctx.write(v)
                })
            }),
            other => Err(unexpected("map", other)),
        }
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        let entries =
            ctx.nested(|ctx| ctx.read_collection(|ctx| Ok((ctx.read()?, ctx.read()?))))?;
        Ok(Some(Value::Map(entries.into_iter().collect::<ValueMap>())))
    }
}

/// The base layer: scalars, strings, bytes and the built-in collections.
pub fn base_types() -> Bindings {
    Bindings::of(|b| {
        b.bind_value(TypeKey::of::<bool>(), BoolCodec)
            .bind_value(TypeKey::of::<i32>(), IntCodec)
            .bind_value(TypeKey::of::<i64>(), LongCodec)
            .bind_value(TypeKey::of::<f64>(), DoubleCodec)
            .bind_value(TypeKey::of::<char>(), CharCodec)
            .bind_value(TypeKey::of::<String>(), StringCodec)
            .bind_value(TypeKey::of::<Vec<u8>>(), BytesCodec)
            .bind_value(TypeKey::of::<Vec<Value>>(), ListCodec)
            .bind_value(TypeKey::of::<Box<[Value]>>(), ArrayCodec)
            .bind_value(TypeKey::of::<ValueSet>(), SetCodec)
            .bind_value(TypeKey::of::<ValueMap>(), MapCodec);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValueCodec;
    use crate::context::Session;
    use crate::isolate::IsolateOwner;
    use std::sync::Arc;
    use tessera_common::Path;

    fn roundtrip(value: Value) -> Value {
        let codec: ValueCodec = Arc::new(base_types().build());
        let owner = IsolateOwner::Build(Path::root());
        let mut w = WriteContext::new(Session::new(), owner.clone(), Arc::clone(&codec));
        w.write(&value).unwrap();
        let mut r = ReadContext::new(Session::new(), owner, codec, w.into_bytes());
        let decoded = r.read().unwrap();
        assert!(r.is_at_end());
        decoded
    }

    #[test]
    fn scalars() {
        for value in [
            Value::Bool(false),
            Value::Int(i32::MIN),
            Value::Long(-42),
            Value::Double(0.125),
            Value::Char('z'),
            Value::from("hello"),
            Value::Bytes(vec![0, 1, 255]),
        ] {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn nested_collections() {
        let mut map = ValueMap::new();
        map.insert("sources".into(), Value::from(vec!["a.rs", "b.rs"]));
        map.insert(Value::Int(1), Value::Null);
        let set: ValueSet = vec![Value::Int(3), Value::Int(1)].into_iter().collect();
        let value = Value::List(vec![
            Value::Map(map),
            Value::Set(set),
            Value::Array(vec![Value::Bool(true)].into_boxed_slice()),
        ]);
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn list_and_array_stay_distinct() {
        let list = Value::List(vec![Value::Int(1)]);
        let array = Value::Array(vec![Value::Int(1)].into_boxed_slice());
        assert!(matches!(roundtrip(list), Value::List(_)));
        assert!(matches!(roundtrip(array), Value::Array(_)));
    }

    fn nest(depth: usize, wrap: fn(Value) -> Value) -> Value {
        (0..depth).fold(Value::Int(0), |inner, _| wrap(inner))
    }

    fn list(inner: Value) -> Value {
        Value::List(vec![inner])
    }

    fn map(inner: Value) -> Value {
        Value::Map(std::iter::once((Value::from("k"), inner)).collect())
    }

    #[test]
    fn nesting_within_the_limit_roundtrips() {
        let value = nest(64, list);
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn deep_collections_are_rejected_on_encode() {
        let codec: ValueCodec = Arc::new(base_types().build());
        let session = Session::new().with_max_bean_depth(16);
        let set = |inner| Value::Set(std::iter::once(inner).collect());
        let owner = IsolateOwner::Build(Path::root());
        for value in [nest(17, list), nest(17, map), nest(17, set)] {
            let mut w = WriteContext::new(session.clone(), owner.clone(), Arc::clone(&codec));
            let err = w.write(&value).unwrap_err();
            assert!(matches!(err.root(), EncodeError::TooDeep { limit: 16 }), "{err}");
        }
        let mut w = WriteContext::new(session, owner, codec);
        w.write(&nest(16, list)).unwrap();
    }

    #[test]
    fn deep_collections_are_rejected_on_decode() {
        let codec: ValueCodec = Arc::new(base_types().build());
        let owner = IsolateOwner::Build(Path::root());
        let mut w = WriteContext::new(Session::new(), owner.clone(), Arc::clone(&codec));
        w.write(&nest(40, |v| Value::Array(vec![v].into_boxed_slice()))).unwrap();
        let session = Session::new().with_max_bean_depth(32);
        let mut r = ReadContext::new(session, owner, codec, w.into_bytes());
        let err = r.read().unwrap_err();
        assert!(matches!(err.root(), DecodeError::TooDeep { limit: 32 }), "{err}");
    }

    #[test]
    fn wrong_variant_is_rejected() {
        let mut w = WriteContext::new(
            Session::new(),
            IsolateOwner::Build(Path::root()),
            Arc::new(base_types().build()),
        );
        let err = IntCodec.encode(&mut w, &Value::Bool(true)).unwrap_err();
        assert!(matches!(err, EncodeError::Illegal { .. }));
    }
}
