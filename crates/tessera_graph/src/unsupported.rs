//! The denylist of runtime types that can never be cached.
//!
//! Operating system handles, threads and processes only mean something in
//! the process that created them. Values of these types are reported once
//! per occurrence and replaced by a null placeholder, so the stream stays
//! well formed.

use crate::bindings::Bindings;
use crate::codec::Codec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeError, EncodeError};
use crate::value::{TypeKey, Value};
use std::sync::Arc;
use tessera_diagnostics::DiagnosticCode;

/// A set of runtime types, each with the category reported for it.
#[derive(Clone, Debug, Default)]
pub struct UnsupportedTypes {
    entries: Vec<(TypeKey, &'static str)>,
}

impl UnsupportedTypes {
    /// Creates an empty denylist.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard library handle types.
    pub fn standard() -> Self {
        Self::new()
            .with::<std::fs::File>("an open file handle")
            .with::<std::net::TcpStream>("a network socket")
            .with::<std::net::TcpListener>("a network socket")
            .with::<std::net::UdpSocket>("a network socket")
            .with::<std::process::Child>("a child process")
            .with::<std::thread::JoinHandle<()>>("a thread")
            .with::<std::thread::Thread>("a thread")
            .with::<std::io::Stdin>("a standard stream")
            .with::<std::io::Stdout>("a standard stream")
            .with::<std::io::Stderr>("a standard stream")
    }

    /// Adds `T` under `category`.
    pub fn with<T: ?Sized + 'static>(mut self, category: &'static str) -> Self {
        self.entries.push((TypeKey::of::<T>(), category));
        self
    }

    /// Returns the category `key` is denied under.
    pub fn category(&self, key: &TypeKey) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, category)| *category)
    }

    /// Returns `true` if `key` is denied.
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.category(key).is_some()
    }

    /// Returns the number of denied types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is denied.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The message reported for a value of type `key`.
    pub fn message(&self, key: &TypeKey) -> String {
        let category = self.category(key).unwrap_or("an unsupported type");
        format!(
            "cannot serialize object of type '{}', a subtype of '{category}', as these are not supported",
            key.short_name()
        )
    }
}

/// Reports the value and writes nothing; decodes to the null placeholder.
pub struct UnsupportedTypeCodec {
    types: Arc<UnsupportedTypes>,
}

impl UnsupportedTypeCodec {
    /// Creates a codec reporting against `types`.
    pub fn new(types: Arc<UnsupportedTypes>) -> Self {
        Self { types }
    }
}

impl Codec<Value> for UnsupportedTypeCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Value) -> Result<(), EncodeError> {
        ctx.report_unsupported(
            DiagnosticCode::UNSUPPORTED_TYPE,
            self.types.message(&value.type_key()),
        );
        Ok(())
    }

    fn decode(&self, _ctx: &mut ReadContext) -> Result<Option<Value>, DecodeError> {
        Ok(None)
    }
}

/// A layer matching every type in `types`; goes before any other binding.
pub fn unsupported_types(types: Arc<UnsupportedTypes>) -> Bindings {
    let denied = Arc::clone(&types);
    Bindings::of(move |b| {
        b.bind_matching(
            "unsupported types",
            move |key| denied.contains(key),
            Arc::new(UnsupportedTypeCodec::new(types)),
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::base_types;
    use crate::codec::ValueCodec;
    use crate::context::Session;
    use crate::isolate::IsolateOwner;
    use crate::value::ObjectRef;
    use tessera_common::Path;
    use tessera_diagnostics::Severity;

    #[derive(Debug)]
    struct Handle;

    fn codec(types: UnsupportedTypes) -> ValueCodec {
        let bindings = Bindings::compose(&base_types(), &unsupported_types(Arc::new(types)));
        Arc::new(bindings.build())
    }

    fn owner() -> IsolateOwner {
        IsolateOwner::Build(Path::root())
    }

    #[test]
    fn standard_denylist_covers_handles() {
        let types = UnsupportedTypes::standard();
        assert!(types.contains(&TypeKey::of::<std::fs::File>()));
        assert!(types.contains(&TypeKey::of::<std::net::TcpStream>()));
        assert!(!types.contains(&TypeKey::of::<String>()));
    }

    #[test]
    fn message_names_type_and_category() {
        let types = UnsupportedTypes::new().with::<Handle>("an operating system handle");
        let message = types.message(&TypeKey::of::<Handle>());
        assert!(message.contains("'Handle'"));
        assert!(message.contains("a subtype of 'an operating system handle'"));
    }

    #[test]
    fn unsupported_value_degrades_to_null() {
        let codec = codec(UnsupportedTypes::new().with::<Handle>("a handle"));
        let session = Session::new();
        let mut w = WriteContext::new(session.clone(), owner(), Arc::clone(&codec));
        w.write(&Value::List(vec![Value::object(Handle), Value::Int(4)]))
            .unwrap();
        let mut r = ReadContext::new(session.clone(), owner(), codec, w.into_bytes());
        let decoded = r.read().unwrap();
        assert_eq!(decoded, Value::List(vec![Value::Null, Value::Int(4)]));
        let diagnostics = session.diagnostics.snapshot();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::UNSUPPORTED_TYPE);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn strict_mode_reports_errors() {
        let codec = codec(UnsupportedTypes::new().with::<Handle>("a handle"));
        let session = Session::new().with_strict_unsupported(true);
        let mut w = WriteContext::new(session.clone(), owner(), codec);
        w.write_object(&ObjectRef::new(Handle)).unwrap();
        assert!(session.diagnostics.has_errors());
    }
}
