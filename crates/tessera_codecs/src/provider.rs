//! Codecs for providers, properties and the changing sources behind them.
//!
//! A provider is stored as its execution-time value. Known values are
//! written directly and the provider itself is discarded. A value that can
//! only be computed when the plan runs is stored as its source (a value
//! source, a build service or a flow provider), through a dedicated
//! changing-value codec.
//!
//! ```text
//! 1                          missing
//! 2 | value                  fixed
//! 3 | value | side effect    fixed with side effect
//! 4 | changing source        computed at execution time
//! ```

use crate::paths::{read_path, write_path};
use std::sync::Arc;
use tessera_diagnostics::DiagnosticCode;
use tessera_graph::{
    Bindings, Codec, DecodeError, EncodeError, IsolateOwner, ObjectRef, ReadContext, TraceFrame,
    Value, ValueCodec, WriteContext,
};
use tessera_model::{
    BuildServiceProvider, BuildServiceRegistry, BuildWorkResultProvider, ExecutionTimeValue,
    FlowProviders, Property, PropertyKind, PropertyState, Provider, RegisteredFlowAction,
    ValueSourceProvider, ValueSourceProviderFactory,
};

const MISSING: u8 = 1;
const FIXED: u8 = 2;
const FIXED_WITH_SIDE_EFFECT: u8 = 3;
const CHANGING: u8 = 4;

/// Writes execution-time values, replacing providers with their value when it is known.
#[derive(Clone)]
pub struct FixedValueReplacingProviderCodec {
    changing: ValueCodec,
}

impl FixedValueReplacingProviderCodec {
    /// Creates a codec delegating changing sources to `changing`.
    pub fn new(changing: ValueCodec) -> Self {
        Self { changing }
    }

    /// Writes `value` using the smallest applicable strategy.
    pub fn encode_value(&self, ctx: &mut WriteContext, value: &ExecutionTimeValue) -> Result<(), EncodeError> {
        match value {
            ExecutionTimeValue::Missing => ctx.write_byte(MISSING),
            ExecutionTimeValue::Fixed(value) => {
                ctx.write_byte(FIXED)?;
                ctx.write(value)
            }
            ExecutionTimeValue::FixedWithSideEffect { value, side_effect } => {
                ctx.write_byte(FIXED_WITH_SIDE_EFFECT)?;
                ctx.write(value)?;
                ctx.write(side_effect)
            }
            ExecutionTimeValue::Changing(source) => {
                ctx.write_byte(CHANGING)?;
                self.changing.encode(ctx, source)
            }
        }
    }

    /// Reads a value written by [`encode_value`](Self::encode_value).
    ///
    /// A fixed value may decode to null when it was dropped on encode.
    pub fn decode_value(&self, ctx: &mut ReadContext) -> Result<ExecutionTimeValue, DecodeError> {
        match ctx.read_byte()? {
            MISSING => Ok(ExecutionTimeValue::Missing),
            FIXED => Ok(ExecutionTimeValue::Fixed(ctx.read()?)),
            FIXED_WITH_SIDE_EFFECT => {
                let value = ctx.read()?;
                let side_effect = ctx.read()?;
                if side_effect.is_null() {
                    return Err(DecodeError::mismatch("side effect", "null"));
                }
                Ok(ExecutionTimeValue::FixedWithSideEffect { value, side_effect })
            }
            CHANGING => {
                let source = self
                    .changing
                    .decode(ctx)?
                    .ok_or_else(|| DecodeError::mismatch("changing value source", "null"))?;
                Ok(ExecutionTimeValue::Changing(source))
            }
            other => Err(DecodeError::UnexpectedDiscriminant {
                what: "provider value",
                value: i64::from(other),
            }),
        }
    }
}

/// Encodes a [`Provider`] as its value type followed by its execution-time value.
pub struct ProviderCodec {
    values: FixedValueReplacingProviderCodec,
}

impl ProviderCodec {
    /// Creates the codec.
    pub fn new(values: FixedValueReplacingProviderCodec) -> Self {
        Self { values }
    }
}

impl Codec<Arc<Provider>> for ProviderCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<Provider>) -> Result<(), EncodeError> {
        ctx.write_str(value.value_type())?;
        self.values.encode_value(ctx, value.execution_time_value())
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<Provider>>, DecodeError> {
        let value_type = ctx.read_string()?;
        let value = self.values.decode_value(ctx)?;
        Ok(Some(Arc::new(Provider::new(value_type, value))))
    }
}

/// Encodes a [`Property`] of any kind, preserving identity and its finalization flags.
pub struct PropertyCodec {
    values: FixedValueReplacingProviderCodec,
}

impl PropertyCodec {
    /// Creates the codec.
    pub fn new(values: FixedValueReplacingProviderCodec) -> Self {
        Self { values }
    }
}

impl Codec<Arc<Property>> for PropertyCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<Property>) -> Result<(), EncodeError> {
        let obj = ObjectRef::from_arc(Arc::clone(value));
        ctx.encode_preserving_identity(&obj, |ctx| {
            let state = value.state();
            ctx.write_byte(value.kind().discriminant())?;
            ctx.write_str(value.value_type())?;
            ctx.write_bool(state.disallow_changes)?;
            ctx.write_bool(state.disallow_unsafe_read)?;
            self.values.encode_value(ctx, &state.value)
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<Property>>, DecodeError> {
        let property = ctx.decode_preserving_identity_of(|ctx, _| {
            let discriminant = ctx.read_byte()?;
            let kind = PropertyKind::from_discriminant(discriminant).ok_or(
                DecodeError::UnexpectedDiscriminant {
                    what: "property kind",
                    value: i64::from(discriminant),
                },
            )?;
            let value_type = ctx.read_string()?;
            let disallow_changes = ctx.read_bool()?;
            let disallow_unsafe_read = ctx.read_bool()?;
            let value = self.values.decode_value(ctx)?;
            Ok(Arc::new(Property::from_state(
                kind,
                value_type,
                PropertyState {
                    value,
                    disallow_changes,
                    disallow_unsafe_read,
                },
            )))
        })?;
        Ok(Some(property))
    }
}

/// Encodes a [`ValueSourceProvider`] once per stream, recreating it through the factory.
pub struct ValueSourceProviderCodec {
    factory: Arc<ValueSourceProviderFactory>,
}

impl ValueSourceProviderCodec {
    /// Creates the codec.
    pub fn new(factory: Arc<ValueSourceProviderFactory>) -> Self {
        Self { factory }
    }
}

impl Codec<Arc<ValueSourceProvider>> for ValueSourceProviderCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<ValueSourceProvider>) -> Result<(), EncodeError> {
        if value.has_been_obtained() {
            return Err(EncodeError::Illegal {
                what: format!("value source '{}'", value.source_type()),
                reason: "its value was already obtained as a build logic input".to_string(),
            });
        }
        let obj = ObjectRef::from_arc(Arc::clone(value));
        ctx.encode_preserving_shared_identity(&obj, |ctx| {
            ctx.write_bool(true)?;
            ctx.write_str(value.source_type())?;
            let has_parameters = !value.parameters().is_null();
            ctx.write_bool(has_parameters)?;
            if has_parameters {
                ctx.write(value.parameters())?;
            }
            Ok(())
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<ValueSourceProvider>>, DecodeError> {
        let provider = ctx.decode_preserving_shared_identity_of(|ctx, _| {
            if !ctx.read_bool()? {
                return Err(DecodeError::UnexpectedDiscriminant {
                    what: "value source",
                    value: 0,
                });
            }
            let source_type = ctx.read_string()?;
            let parameters = if ctx.read_bool()? {
                ctx.read()?
            } else {
                Value::Null
            };
            self.factory
                .instantiate(&source_type, parameters)
                .map_err(|e| DecodeError::Construction {
                    type_name: source_type.clone(),
                    reason: e.to_string(),
                })
        })?;
        Ok(Some(provider))
    }
}

/// Encodes a [`BuildServiceProvider`] once per stream.
///
/// On decode the service is registered again in the [`BuildServiceRegistry`]
/// of the build that declared it, found in the session services under
/// [`IsolateOwner::Build`].
#[derive(Default)]
pub struct BuildServiceProviderCodec;

impl Codec<Arc<BuildServiceProvider>> for BuildServiceProviderCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<BuildServiceProvider>) -> Result<(), EncodeError> {
        let obj = ObjectRef::from_arc(Arc::clone(value));
        ctx.encode_preserving_shared_identity(&obj, |ctx| {
            write_path(ctx, value.build())?;
            ctx.write_str(value.name())?;
            ctx.write_str(value.service_type())?;
            ctx.write_bool(value.is_resolved())?;
            if value.is_resolved() {
                ctx.write_shared_object(value.parameters())?;
                ctx.write_int(value.max_usages())?;
            }
            Ok(())
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<BuildServiceProvider>>, DecodeError> {
        let provider = ctx.decode_preserving_shared_identity_of(|ctx, _| {
            let build = read_path(ctx)?;
            let name = ctx.read_string()?;
            let service_type = ctx.read_string()?;
            let resolved = ctx.read_bool()?;
            let owner = IsolateOwner::Build(build);
            let registry = ctx
                .session()
                .services
                .lookup::<BuildServiceRegistry>(&owner)
                .ok_or_else(|| DecodeError::MissingService {
                    service: std::any::type_name::<BuildServiceRegistry>(),
                    owner: owner.to_string(),
                })?;
            if resolved {
                let parameters = ctx.read_shared_object()?;
                let max_usages = ctx.read_int()?;
                Ok(registry.register_if_absent(&name, &service_type, parameters, max_usages))
            } else {
                Ok(registry.consume(&name, &service_type))
            }
        })?;
        Ok(Some(provider))
    }
}

/// Encodes the build work result provider, which is only legal inside a flow action.
///
/// Nothing is written: the provider is a per-build singleton taken from
/// [`FlowProviders`] on decode.
pub struct FlowProvidersCodec {
    flow_providers: Arc<FlowProviders>,
}

impl FlowProvidersCodec {
    /// Creates the codec.
    pub fn new(flow_providers: Arc<FlowProviders>) -> Self {
        Self { flow_providers }
    }
}

impl Codec<Arc<BuildWorkResultProvider>> for FlowProvidersCodec {
    fn encode(&self, ctx: &mut WriteContext, _value: &Arc<BuildWorkResultProvider>) -> Result<(), EncodeError> {
        if !ctx.owner().is_flow_action() {
            ctx.report_problem(
                DiagnosticCode::PROVIDER_MISUSE,
                "cannot serialize 'BuildWorkResultProvider': it can only be used as input to flow actions",
            );
        }
        Ok(())
    }

    fn decode(&self, _ctx: &mut ReadContext) -> Result<Option<Arc<BuildWorkResultProvider>>, DecodeError> {
        Ok(Some(self.flow_providers.build_work_result()))
    }
}

/// Encodes a [`RegisteredFlowAction`]; its parameters get their own flow action isolate.
#[derive(Default)]
pub struct RegisteredFlowActionCodec;

impl Codec<Arc<RegisteredFlowAction>> for RegisteredFlowActionCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<RegisteredFlowAction>) -> Result<(), EncodeError> {
        let IsolateOwner::FlowScope(scope) = ctx.owner().clone() else {
            return Err(EncodeError::Illegal {
                what: format!("flow action '{}'", value.action_type),
                reason: format!("flow actions must belong to a flow scope, not {}", ctx.owner()),
            });
        };
        ctx.write_str(&value.action_type)?;
        ctx.with_isolate(IsolateOwner::FlowAction(scope), None, |ctx| {
            ctx.with_trace(TraceFrame::BuildLogic(value.action_type.clone()), |ctx| {
                ctx.write(&value.parameters)
            })
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<RegisteredFlowAction>>, DecodeError> {
        let action_type = ctx.read_string()?;
        let IsolateOwner::FlowScope(scope) = ctx.owner().clone() else {
            return Err(DecodeError::Construction {
                type_name: action_type,
                reason: format!("flow actions must belong to a flow scope, not {}", ctx.owner()),
            });
        };
        let parameters = ctx.with_isolate(IsolateOwner::FlowAction(scope), None, |ctx| {
            ctx.with_trace(TraceFrame::BuildLogic(action_type.clone()), |ctx| ctx.read())
        })?;
        Ok(Some(Arc::new(RegisteredFlowAction::new(action_type, parameters))))
    }
}

/// The layer shared by the user and internal codecs: properties and providers.
pub fn provider_types(values: FixedValueReplacingProviderCodec) -> Bindings {
    Bindings::of(|b| {
        b.bind::<Property, _>(PropertyCodec::new(values.clone()));
        b.bind::<Provider, _>(ProviderCodec::new(values));
    })
}

/// The bindings for sources of changing values; beans complete the set.
pub fn changing_value_types(
    value_sources: Arc<ValueSourceProviderFactory>,
    flow_providers: Arc<FlowProviders>,
) -> Bindings {
    Bindings::of(|b| {
        b.bind::<ValueSourceProvider, _>(ValueSourceProviderCodec::new(value_sources));
        b.bind::<BuildServiceProvider, _>(BuildServiceProviderCodec);
        b.bind::<BuildWorkResultProvider, _>(FlowProvidersCodec::new(flow_providers));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::Path;
    use tessera_graph::{base_types, Session};

    struct Fixture {
        session: Session,
        codec: ValueCodec,
        value_sources: Arc<ValueSourceProviderFactory>,
    }

    fn fixture() -> Fixture {
        let value_sources = Arc::new(ValueSourceProviderFactory::new().with_source("EnvVar"));
        let flow = Arc::new(FlowProviders::new());
        let changing: ValueCodec = Arc::new(
            changing_value_types(Arc::clone(&value_sources), Arc::clone(&flow))
                .then(&base_types())
                .build(),
        );
        let values = FixedValueReplacingProviderCodec::new(changing);
        let bindings = base_types()
            .then(&provider_types(values))
            .append(|b| {
                b.bind::<RegisteredFlowAction, _>(RegisteredFlowActionCodec);
                b.bind::<BuildWorkResultProvider, _>(FlowProvidersCodec::new(flow));
            });
        let session = Session::new();
        session
            .services
            .register_for(build_owner(), Arc::new(BuildServiceRegistry::new(Path::root())));
        Fixture {
            session,
            codec: Arc::new(bindings.build()),
            value_sources,
        }
    }

    fn build_owner() -> IsolateOwner {
        IsolateOwner::Build(Path::root())
    }

    fn roundtrip_as(fixture: &Fixture, owner: IsolateOwner, values: &[Value]) -> Vec<Value> {
        let mut w = WriteContext::new(fixture.session.clone(), owner.clone(), Arc::clone(&fixture.codec));
        for value in values {
            w.write(value).unwrap();
        }
        let mut r = ReadContext::new(
            fixture.session.clone(),
            owner,
            Arc::clone(&fixture.codec),
            w.into_bytes(),
        );
        values.iter().map(|_| r.read().unwrap()).collect()
    }

    fn roundtrip(fixture: &Fixture, values: &[Value]) -> Vec<Value> {
        roundtrip_as(fixture, build_owner(), values)
    }

    #[test]
    fn fixed_and_missing_providers() {
        let f = fixture();
        let decoded = roundtrip(
            &f,
            &[
                Value::object(Provider::fixed("String", "hello")),
                Value::object(Provider::missing("Integer")),
            ],
        );
        let fixed = decoded[0].downcast::<Provider>().unwrap();
        assert_eq!(fixed.value_type(), "String");
        assert_eq!(fixed.get(), Some(&Value::from("hello")));
        let missing = decoded[1].downcast::<Provider>().unwrap();
        assert!(missing.execution_time_value().is_missing());
    }

    #[test]
    fn side_effect_is_kept() {
        let f = fixture();
        let provider = Provider::new(
            "String",
            ExecutionTimeValue::FixedWithSideEffect {
                value: Value::from("v"),
                side_effect: Value::from("log"),
            },
        );
        let decoded = roundtrip(&f, &[Value::object(provider)]);
        let provider = decoded[0].downcast::<Provider>().unwrap();
        assert_eq!(provider.execution_time_value().side_effect(), Some(&Value::from("log")));
    }

    #[test]
    fn property_keeps_identity_and_flags() {
        let f = fixture();
        let property = Arc::new(Property::new(PropertyKind::List, "String"));
        property.set(vec![Value::from("a")]).unwrap();
        property.disallow_changes();
        let value = Value::Object(ObjectRef::from_arc(Arc::clone(&property)));
        let decoded = roundtrip(&f, &[value.clone(), value]);
        let first = decoded[0].downcast::<Property>().unwrap();
        let second = decoded[1].downcast::<Property>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kind(), PropertyKind::List);
        assert!(first.state().disallow_changes);
        assert!(!first.state().disallow_unsafe_read);
        assert_eq!(first.get(), Some(Value::List(vec![Value::from("a")])));
        assert!(first.set("b").is_err());
    }

    #[test]
    fn value_source_is_recreated_once() {
        let f = fixture();
        let source = Arc::new(ValueSourceProvider::new("EnvVar", Value::from("HOME")));
        let provider = |source: &Arc<ValueSourceProvider>| {
            Value::object(Provider::changing(
                "String",
                Value::Object(ObjectRef::from_arc(Arc::clone(source))),
            ))
        };
        let decoded = roundtrip(&f, &[provider(&source), provider(&source)]);
        let sources: Vec<_> = decoded
            .iter()
            .map(|v| {
                v.downcast::<Provider>()
                    .unwrap()
                    .execution_time_value()
                    .changing_source()
                    .and_then(Value::downcast::<ValueSourceProvider>)
                    .unwrap()
            })
            .collect();
        assert!(Arc::ptr_eq(&sources[0], &sources[1]));
        assert_eq!(sources[0].parameters(), &Value::from("HOME"));
        assert_eq!(f.value_sources.instantiated(), 1);
    }

    #[test]
    fn obtained_value_source_is_rejected() {
        let f = fixture();
        let source = Arc::new(ValueSourceProvider::new("EnvVar", Value::Null));
        source.mark_obtained();
        let value = Value::object(Provider::changing("String", Value::Object(ObjectRef::from_arc(source))));
        let mut w = WriteContext::new(f.session.clone(), build_owner(), Arc::clone(&f.codec));
        assert!(matches!(w.write(&value).unwrap_err().root(), EncodeError::Illegal { .. }));
    }

    #[test]
    fn build_service_is_registered_on_decode() {
        let f = fixture();
        let writer_registry = BuildServiceRegistry::new(Path::root());
        let service = writer_registry.register_if_absent("cache", "CacheService", Value::Int(3), 2);
        let value = Value::object(Provider::changing("CacheService", Value::Object(ObjectRef::from_arc(service))));
        let decoded = roundtrip(&f, &[value]);
        let provider = decoded[0].downcast::<Provider>().unwrap();
        let service = provider
            .execution_time_value()
            .changing_source()
            .and_then(Value::downcast::<BuildServiceProvider>)
            .unwrap();
        assert!(service.is_resolved());
        assert_eq!(service.max_usages(), 2);
        assert_eq!(service.parameters(), &Value::Int(3));
        let registry = f.session.services.lookup::<BuildServiceRegistry>(&build_owner()).unwrap();
        assert!(Arc::ptr_eq(&registry.get("cache").unwrap(), &service));
    }

    #[test]
    fn build_work_result_outside_flow_action_is_a_problem() {
        let f = fixture();
        let decoded = roundtrip(&f, &[Value::object(BuildWorkResultProvider)]);
        assert!(decoded[0].downcast::<BuildWorkResultProvider>().is_some());
        assert_eq!(f.session.diagnostics.count_code(DiagnosticCode::PROVIDER_MISUSE), 1);
    }

    #[test]
    fn flow_action_parameters_live_in_a_flow_action_isolate() {
        let f = fixture();
        let scope = IsolateOwner::FlowScope(Path::root());
        let action = RegisteredFlowAction::new(
            "NotifyAction",
            Value::List(vec![Value::object(BuildWorkResultProvider)]),
        );
        let decoded = roundtrip_as(&f, scope, &[Value::object(action)]);
        let action = decoded[0].downcast::<RegisteredFlowAction>().unwrap();
        assert_eq!(action.action_type, "NotifyAction");
        assert!(f.session.diagnostics.is_empty());
    }

    #[test]
    fn flow_action_outside_flow_scope_fails() {
        let f = fixture();
        let action = Value::object(RegisteredFlowAction::new("NotifyAction", Value::Null));
        let mut w = WriteContext::new(f.session.clone(), build_owner(), Arc::clone(&f.codec));
        let err = w.write(&action).unwrap_err();
        assert!(err.to_string().contains("flow scope"));
    }
}
