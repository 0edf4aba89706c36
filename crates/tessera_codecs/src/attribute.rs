//! Codecs for variant attribute sets.
//!
//! Entries are written in order as the attribute key followed by its value.
//! Isolated values go through the active codec. Managed values are written
//! as factory id, public type and state, and rebuilt through the
//! [`ManagedFactoryRegistry`] on load.

use std::sync::Arc;
use tessera_graph::{Bindings, Codec, DecodeError, EncodeError, ObjectRef, ReadContext, WriteContext};
use tessera_model::{
    Attribute, AttributeContainer, AttributeValue, AttributesFactory, ImmutableAttributes,
    ManagedFactoryRegistry, ManagedValue,
};

const ISOLATED: u8 = 0;
const MANAGED: u8 = 1;

fn write_entries(ctx: &mut WriteContext, entries: &[(Attribute, AttributeValue)]) -> Result<(), EncodeError> {
    ctx.write_collection(entries, |ctx, (attribute, value)| {
        ctx.write_str(&attribute.name)?;
        ctx.write_str(&attribute.value_type)?;
        match value {
            AttributeValue::Isolated(value) => {
                ctx.write_byte(ISOLATED)?;
                ctx.write(value)
            }
            AttributeValue::Managed(managed) => {
                ctx.write_byte(MANAGED)?;
                ctx.write_int(managed.factory_id)?;
                ctx.write_str(&managed.public_type)?;
                ctx.write(&managed.state)
            }
        }
    })
}

fn read_entries(
    ctx: &mut ReadContext,
    managed: &ManagedFactoryRegistry,
) -> Result<Vec<(Attribute, AttributeValue)>, DecodeError> {
    ctx.read_collection(|ctx| {
        let attribute = Attribute {
            name: ctx.read_string()?,
            value_type: ctx.read_string()?,
        };
        let value = match ctx.read_byte()? {
            ISOLATED => AttributeValue::Isolated(ctx.read()?),
            MANAGED => AttributeValue::Managed(read_managed(ctx, managed)?),
            other => {
                return Err(DecodeError::UnexpectedDiscriminant {
                    what: "attribute value",
                    value: i64::from(other),
                })
            }
        };
        Ok((attribute, value))
    })
}

fn read_managed(ctx: &mut ReadContext, managed: &ManagedFactoryRegistry) -> Result<ManagedValue, DecodeError> {
    let factory_id = ctx.read_int()?;
    let public_type = ctx.read_string()?;
    let state = ctx.read()?;
    let construction = |reason: String| DecodeError::Construction {
        type_name: public_type.clone(),
        reason,
    };
    let factory = managed
        .lookup(factory_id)
        .map_err(|e| construction(e.to_string()))?;
    factory
        .create(&public_type, state)
        .map_err(|e| construction(e.to_string()))
}

/// Encodes [`ImmutableAttributes`] once per isolate; decoded sets are interned.
pub struct ImmutableAttributesCodec {
    factory: Arc<AttributesFactory>,
    managed: Arc<ManagedFactoryRegistry>,
}

impl ImmutableAttributesCodec {
    /// Creates the codec.
    pub fn new(factory: Arc<AttributesFactory>, managed: Arc<ManagedFactoryRegistry>) -> Self {
        Self { factory, managed }
    }
}

impl Codec<Arc<ImmutableAttributes>> for ImmutableAttributesCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<ImmutableAttributes>) -> Result<(), EncodeError> {
        let obj = ObjectRef::from_arc(Arc::clone(value));
        ctx.encode_preserving_identity(&obj, |ctx| write_entries(ctx, value.entries()))
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<ImmutableAttributes>>, DecodeError> {
        let attributes = ctx.decode_preserving_identity_of(|ctx, _| {
            let entries = read_entries(ctx, &self.managed)?;
            Ok(self.factory.of(entries))
        })?;
        Ok(Some(attributes))
    }
}

/// Encodes a mutable [`AttributeContainer`] as a snapshot of its entries.
pub struct AttributeContainerCodec {
    managed: Arc<ManagedFactoryRegistry>,
}

impl AttributeContainerCodec {
    /// Creates the codec.
    pub fn new(managed: Arc<ManagedFactoryRegistry>) -> Self {
        Self { managed }
    }
}

impl Codec<Arc<AttributeContainer>> for AttributeContainerCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<AttributeContainer>) -> Result<(), EncodeError> {
        write_entries(ctx, &value.entries())
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<AttributeContainer>>, DecodeError> {
        let container = AttributeContainer::new();
        for (attribute, value) in read_entries(ctx, &self.managed)? {
            container.attribute(attribute, value);
        }
        Ok(Some(Arc::new(container)))
    }
}

/// The attribute layer.
pub fn attribute_types(factory: Arc<AttributesFactory>, managed: Arc<ManagedFactoryRegistry>) -> Bindings {
    Bindings::of(|b| {
        b.bind::<ImmutableAttributes, _>(ImmutableAttributesCodec::new(factory, Arc::clone(&managed)))
            .bind::<AttributeContainer, _>(AttributeContainerCodec::new(managed));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::Path;
    use tessera_graph::{base_types, IsolateOwner, Session, Value, ValueCodec};
    use tessera_model::NamedFactory;

    fn usage() -> Attribute {
        Attribute::of("org.example.usage", "Usage")
    }

    fn named(name: &str) -> AttributeValue {
        AttributeValue::Managed(ManagedValue {
            factory_id: NamedFactory::ID,
            public_type: "Usage".to_string(),
            state: Value::from(name),
        })
    }

    fn roundtrip(
        values: &[Value],
        factory: &Arc<AttributesFactory>,
    ) -> Result<Vec<Value>, DecodeError> {
        let codec: ValueCodec = Arc::new(
            base_types()
                .then(&attribute_types(
                    Arc::clone(factory),
                    Arc::new(ManagedFactoryRegistry::standard()),
                ))
                .build(),
        );
        let owner = IsolateOwner::Build(Path::root());
        let mut w = WriteContext::new(Session::new(), owner.clone(), Arc::clone(&codec));
        for value in values {
            w.write(value).unwrap();
        }
        let mut r = ReadContext::new(Session::new(), owner, codec, w.into_bytes());
        values.iter().map(|_| r.read()).collect()
    }

    #[test]
    fn immutable_attributes_are_interned_on_load() {
        let writer = AttributesFactory::new();
        let attributes = writer.of(vec![
            (usage(), named("runtime")),
            (Attribute::of("org.example.jvm", "Int"), AttributeValue::Isolated(Value::Int(17))),
        ]);
        let reader = Arc::new(AttributesFactory::new());
        let value = Value::Object(ObjectRef::from_arc(Arc::clone(&attributes)));
        let decoded = roundtrip(&[value.clone(), value], &reader).unwrap();
        let first = decoded[0].downcast::<ImmutableAttributes>().unwrap();
        let second = decoded[1].downcast::<ImmutableAttributes>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *attributes);
        assert!(Arc::ptr_eq(&first, &reader.of(attributes.entries().to_vec())));
    }

    #[test]
    fn container_keeps_insertion_order() {
        let container = AttributeContainer::new();
        container
            .attribute(Attribute::of("z", "String"), AttributeValue::Isolated(Value::from("last")))
            .attribute(usage(), named("api"));
        let decoded = roundtrip(&[Value::object(container)], &Arc::new(AttributesFactory::new())).unwrap();
        let decoded = decoded[0].downcast::<AttributeContainer>().unwrap();
        let names: Vec<_> = decoded.entries().into_iter().map(|(a, _)| a.name).collect();
        assert_eq!(names, vec!["z".to_string(), "org.example.usage".to_string()]);
        assert_eq!(decoded.get(&usage()), Some(named("api")));
    }

    #[test]
    fn invalid_managed_state_fails_construction() {
        let container = AttributeContainer::new();
        container.attribute(usage(), named(""));
        let err = roundtrip(&[Value::object(container)], &Arc::new(AttributesFactory::new())).unwrap_err();
        assert!(matches!(err, DecodeError::Construction { .. }));
    }
}
