//! The codec for configured tasks.
//!
//! The task's identity (type, project, name, unique id) is written with the
//! internal codec. Everything user build logic put into the task (its
//! declared state, registered properties, destroyables, local state) is
//! written with the user codec inside an isolate owned by the task.

use crate::paths::{read_path, write_path};
use std::sync::Arc;
use tessera_graph::{
    Codec, DecodeError, EncodeError, IsolateOwner, ObjectRef, ReadContext, TraceFrame, Value,
    ValueCodec, WriteContext,
};
use tessera_model::{FilePropertyType, RegisteredProperty, RegisteredPropertyKind, Task};

const VALUE_PROPERTY: u8 = 0;
const FILE_PROPERTY: u8 = 1;

/// Encodes a [`Task`] once per isolate.
pub struct TaskCodec {
    user: ValueCodec,
}

impl TaskCodec {
    /// Creates a codec writing task state with `user`.
    pub fn new(user: ValueCodec) -> Self {
        Self { user }
    }
}

fn write_properties(
    ctx: &mut WriteContext,
    kind: &'static str,
    properties: &[RegisteredProperty],
) -> Result<(), EncodeError> {
    ctx.write_collection(properties, |ctx, property| {
        ctx.write_str(&property.name)?;
        match property.kind {
            RegisteredPropertyKind::Value => ctx.write_byte(VALUE_PROPERTY)?,
            RegisteredPropertyKind::File(file_type) => {
                ctx.write_byte(FILE_PROPERTY)?;
                ctx.write_byte(file_type.discriminant())?;
            }
        }
        ctx.write_bool(property.optional)?;
        let frame = TraceFrame::Property {
            kind,
            name: property.name.clone(),
        };
        ctx.with_trace(frame, |ctx| ctx.write(&property.value))
    })
}

fn read_properties(ctx: &mut ReadContext, kind: &'static str) -> Result<Vec<RegisteredProperty>, DecodeError> {
    ctx.read_collection(|ctx| {
        let name = ctx.read_string()?;
        let property_kind = match ctx.read_byte()? {
            VALUE_PROPERTY => RegisteredPropertyKind::Value,
            FILE_PROPERTY => {
                let discriminant = ctx.read_byte()?;
                let file_type = FilePropertyType::from_discriminant(discriminant).ok_or(
                    DecodeError::UnexpectedDiscriminant {
                        what: "file property type",
                        value: i64::from(discriminant),
                    },
                )?;
                RegisteredPropertyKind::File(file_type)
            }
            other => {
                return Err(DecodeError::UnexpectedDiscriminant {
                    what: "registered property kind",
                    value: i64::from(other),
                })
            }
        };
        let optional = ctx.read_bool()?;
        let frame = TraceFrame::Property {
            kind,
            name: name.clone(),
        };
        let value = ctx.with_trace(frame, |ctx| ctx.read())?;
        Ok(RegisteredProperty {
            name,
            kind: property_kind,
            optional,
            value,
        })
    })
}

fn write_values(ctx: &mut WriteContext, values: &[Value]) -> Result<(), EncodeError> {
    ctx.write_collection(values, |ctx, value| ctx.write(value))
}

impl Codec<Arc<Task>> for TaskCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<Task>) -> Result<(), EncodeError> {
        let obj = ObjectRef::from_arc(Arc::clone(value));
        ctx.encode_preserving_identity(&obj, |ctx| {
            ctx.write_str(&value.type_name)?;
            write_path(ctx, &value.project)?;
            ctx.write_str(&value.name)?;
            ctx.write_long(value.unique_id)?;
            let path = value.path();
            let owner = IsolateOwner::Task(path.clone());
            ctx.with_isolate(owner, Some(Arc::clone(&self.user)), |ctx| {
                ctx.with_trace(TraceFrame::Task(path.to_string()), |ctx| {
                    ctx.write_bool(value.state.is_some())?;
                    if let Some(state) = &value.state {
                        ctx.write_object(state)?;
                    }
                    write_properties(ctx, "input", &value.inputs)?;
                    write_properties(ctx, "output", &value.outputs)?;
                    write_values(ctx, &value.destroyables)?;
                    write_values(ctx, &value.local_state)
                })
            })
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<Task>>, DecodeError> {
        let task = ctx.decode_preserving_identity_of(|ctx, _| {
            let type_name = ctx.read_string()?;
            let project = read_path(ctx)?;
            let name = ctx.read_string()?;
            let unique_id = ctx.read_long()?;
            let mut task = Task::new(type_name, project, name, unique_id);
            let path = task.path();
            let owner = IsolateOwner::Task(path.clone());
            ctx.with_isolate(owner, Some(Arc::clone(&self.user)), |ctx| {
                ctx.with_trace(TraceFrame::Task(path.to_string()), |ctx| {
                    if ctx.read_bool()? {
                        task.state = ctx.read_object()?;
                    }
                    task.inputs = read_properties(ctx, "input")?;
                    task.outputs = read_properties(ctx, "output")?;
                    task.destroyables = ctx.read_collection(|ctx| ctx.read())?;
                    task.local_state = ctx.read_collection(|ctx| ctx.read())?;
                    Ok(())
                })
            })?;
            Ok(Arc::new(task))
        })?;
        Ok(Some(task))
    }
}
