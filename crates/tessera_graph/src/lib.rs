//! The object-graph serialization engine.
//!
//! Values form a graph of scalars, collections and shared [`ObjectRef`]s.
//! A [`WriteContext`] walks that graph through a top-level [`Codec`], usually
//! a [`BindingsCodec`] built from layered [`Bindings`]; a [`ReadContext`]
//! mirrors it. Both contexts keep per-isolate and shared identity tables, so
//! aliasing and cycles survive a round trip, and a property trace that turns
//! every diagnostic and error into a breadcrumb back to the offending field.
//!
//! Layers provided here:
//!
//! - [`unsupported_types`]: handles that can never be cached, degraded to null.
//! - [`base_types`]: scalars, strings, bytes and the built-in collections.
//! - [`bean_types`]: the reflective fallback over registered [`Bean`]s.

#![warn(missing_docs)]

pub mod base;
pub mod bean;
pub mod bindings;
pub mod codec;
pub mod context;
pub mod error;
pub mod identity;
pub mod isolate;
pub mod stream;
pub mod trace;
pub mod unsupported;
pub mod value;

pub use base::base_types;
pub use bean::{bean_types, new_bean, Bean, BeanCell, BeanCodec, BeanRegistry, FieldError, Reentrant};
pub use bindings::{Binding, Bindings, BindingsBuilder, BindingsCodec, Matcher, NULL_TAG};
pub use codec::{Codec, ValueCodec};
pub use context::{ReadContext, Session, WriteContext};
pub use error::{DecodeError, EncodeError};
pub use identity::{ReadIdentities, SharedReads, SharedWrites, WriteIdentities, FIRST_OCCURRENCE};
pub use isolate::{IsolateOwner, ServiceRegistry};
pub use stream::{StreamReader, StreamWriter};
pub use trace::{PropertyTrace, TraceFrame};
pub use unsupported::{unsupported_types, UnsupportedTypeCodec, UnsupportedTypes};
pub use value::{FromValue, Object, ObjectRef, TypeKey, Value, ValueMap, ValueMismatch, ValueSet};
