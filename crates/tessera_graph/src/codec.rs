//! The codec abstraction shared by every encoder in the engine.

use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeError, EncodeError};
use crate::value::Value;
use std::sync::Arc;

/// Paired encode and decode logic for one value shape.
///
/// `decode` returning `Ok(None)` means the value was intentionally dropped on
/// encode (for example an unsupported object); it is distinct from an error.
pub trait Codec<T>: Send + Sync {
    /// Writes `value` to the context's stream.
    fn encode(&self, ctx: &mut WriteContext, value: &T) -> Result<(), EncodeError>;

    /// Reads a value previously written by [`encode`](Self::encode).
    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<T>, DecodeError>;
}

/// A type-erased codec over the dynamic [`Value`] model.
pub type ValueCodec = Arc<dyn Codec<Value>>;

impl<T, C: Codec<T> + ?Sized> Codec<T> for Arc<C> {
    fn encode(&self, ctx: &mut WriteContext, value: &T) -> Result<(), EncodeError> {
        (**self).encode(ctx, value)
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<T>, DecodeError> {
        (**self).decode(ctx)
    }
}
