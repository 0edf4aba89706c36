//! Per-session encode and decode state.
//!
//! A context owns the byte stream, a stack of isolates (each with its own
//! identity table and active codec), the property trace, and the
//! [`Session`] holding collaborators that outlive a single stream.
//!
//! The shared identity table spans every isolate of the root context and of
//! every context forked from it. A shared object first met in the root is
//! written inline; one first met in a fork is written as a record that the
//! root emits with [`WriteContext::write_shared_records`] once its forks are
//! done. Readers load those records before decoding the forks.

use crate::codec::ValueCodec;
use crate::error::{DecodeError, EncodeError};
use crate::identity::{ReadIdentities, SharedReads, SharedWrites, WriteIdentities, FIRST_OCCURRENCE};
use crate::isolate::{IsolateOwner, ServiceRegistry};
use crate::stream::{StreamReader, StreamWriter};
use crate::trace::{PropertyTrace, TraceFrame};
use crate::value::{Object, ObjectRef, Value};
use std::any::{type_name, Any};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tessera_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink, Severity};

/// Collaborators and limits shared by every context of one cache operation.
#[derive(Clone, Debug)]
pub struct Session {
    /// Where unsupported values and problems are reported.
    pub diagnostics: Arc<DiagnosticSink>,
    /// Owner-scoped service lookup.
    pub services: Arc<ServiceRegistry>,
    /// Maximum nesting of beans and collections before a stream is rejected.
    pub max_bean_depth: usize,
    /// Report unsupported values as errors instead of warnings.
    pub strict_unsupported: bool,
}

impl Session {
    /// Creates a session with an empty sink and registry.
    pub fn new() -> Self {
        Self {
            diagnostics: Arc::new(DiagnosticSink::new()),
            services: Arc::new(ServiceRegistry::new()),
            max_bean_depth: 512,
            strict_unsupported: false,
        }
    }

    /// Replaces the service registry.
    pub fn with_services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = services;
        self
    }

    /// Replaces the diagnostic sink.
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Sets the nesting limit.
    pub fn with_max_bean_depth(mut self, depth: usize) -> Self {
        self.max_bean_depth = depth;
        self
    }

    /// Sets whether unsupported values are reported as errors.
    pub fn with_strict_unsupported(mut self, strict: bool) -> Self {
        self.strict_unsupported = strict;
        self
    }

    fn emit(&self, severity: Severity, code: DiagnosticCode, message: String, trace: String) {
        tracing::debug!(code = %code, trace = %trace, "{message}");
        self.diagnostics
            .emit(Diagnostic::new(severity, code, message).with_trace(trace));
    }

    fn unsupported_severity(&self) -> Severity {
        Severity::for_unsupported(self.strict_unsupported)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

struct Isolate<I> {
    owner: IsolateOwner,
    codec: ValueCodec,
    identities: I,
}

impl<I: Default> Isolate<I> {
    fn new(owner: IsolateOwner, codec: ValueCodec) -> Self {
        Self {
            owner,
            codec,
            identities: I::default(),
        }
    }
}

/// Encoder state for one output stream.
pub struct WriteContext {
    out: StreamWriter,
    isolate: Isolate<WriteIdentities>,
    shared: Arc<SharedWrites>,
    forked: bool,
    trace: PropertyTrace,
    session: Session,
    depth: usize,
}

impl WriteContext {
    /// Creates a context whose root isolate belongs to `owner` and encodes with `codec`.
    pub fn new(session: Session, owner: IsolateOwner, codec: ValueCodec) -> Self {
        Self {
            out: StreamWriter::new(),
            isolate: Isolate::new(owner, codec),
            shared: Arc::new(SharedWrites::new()),
            forked: false,
            trace: PropertyTrace::new(),
            session,
            depth: 0,
        }
    }

    /// Creates a context for an independent sub-stream.
    ///
    /// The sub-stream shares this context's session, active codec, trace and
    /// shared identity table, but starts with an empty isolate identity table.
    /// Shared objects it meets first become records of this context.
    pub fn fork(&self, owner: IsolateOwner) -> Self {
        Self {
            out: StreamWriter::new(),
            isolate: Isolate::new(owner, Arc::clone(&self.isolate.codec)),
            shared: Arc::clone(&self.shared),
            forked: true,
            trace: self.trace.clone(),
            session: self.session.clone(),
            depth: 0,
        }
    }

    fn record_context(&self) -> Self {
        let mut record = self.fork(self.owner().clone());
        record.depth = self.depth;
        record
    }

    /// Writes the records of shared objects first met inside forks of this context.
    ///
    /// Must run after every fork has been encoded.
    pub fn write_shared_records(&mut self) -> Result<(), EncodeError> {
        let records = self.shared.take_records();
        self.write_collection(&records, |ctx, (id, payload)| {
            ctx.write_int(*id as i32)?;
            ctx.write_bytes(payload)
        })
    }

    /// Returns the session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the owner of the active isolate.
    pub fn owner(&self) -> &IsolateOwner {
        &self.isolate.owner
    }

    /// Returns the active isolate's codec.
    pub fn codec(&self) -> ValueCodec {
        Arc::clone(&self.isolate.codec)
    }

    /// Writes any value through the active codec.
    pub fn write(&mut self, value: &Value) -> Result<(), EncodeError> {
        let codec = self.codec();
        codec.encode(self, value)
    }

    /// Writes an object through the active codec.
    pub fn write_object(&mut self, obj: &ObjectRef) -> Result<(), EncodeError> {
        self.write(&Value::Object(obj.clone()))
    }

    /// Writes a value whose identity is shared across every isolate and fork.
    ///
    /// Not for types whose codec already preserves shared identity itself.
    pub fn write_shared_object(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Object(obj) => {
                let obj = obj.clone();
                self.encode_preserving_shared_identity(&obj, |ctx| ctx.write(&Value::Object(obj.clone())))
            }
            other => {
                self.write_bool(false)?;
                self.write(other)
            }
        }
    }

    /// Runs `f` inside a new isolate owned by `owner`.
    ///
    /// The isolate starts with an empty identity table and uses `codec`, or
    /// the current codec when `None`. The previous isolate is restored on
    /// every exit path.
    pub fn with_isolate<R>(
        &mut self,
        owner: IsolateOwner,
        codec: Option<ValueCodec>,
        f: impl FnOnce(&mut Self) -> Result<R, EncodeError>,
    ) -> Result<R, EncodeError> {
        let codec = codec.unwrap_or_else(|| self.codec());
        let outer = std::mem::replace(&mut self.isolate, Isolate::new(owner, codec));
        let result = f(self);
        self.isolate = outer;
        result
    }

    /// Runs `f` with `codec` as the active codec, keeping the current isolate.
    pub fn with_codec<R>(
        &mut self,
        codec: ValueCodec,
        f: impl FnOnce(&mut Self) -> Result<R, EncodeError>,
    ) -> Result<R, EncodeError> {
        let outer = std::mem::replace(&mut self.isolate.codec, codec);
        let result = f(self);
        self.isolate.codec = outer;
        result
    }

    /// Writes `obj` once per isolate: the payload on first encounter, its id afterwards.
    pub fn encode_preserving_identity(
        &mut self,
        obj: &ObjectRef,
        f: impl FnOnce(&mut Self) -> Result<(), EncodeError>,
    ) -> Result<(), EncodeError> {
        if let Some(id) = self.isolate.identities.get_id(obj) {
            return self.write_int(id as i32);
        }
        self.isolate.identities.new_id(obj);
        self.write_int(FIRST_OCCURRENCE)?;
        f(self)
    }

    /// Like [`encode_preserving_identity`](Self::encode_preserving_identity),
    /// but against the table shared by all isolates and forks.
    ///
    /// Ids are written explicitly. Inside a fork the payload goes to a record
    /// and only the id is written inline.
    pub fn encode_preserving_shared_identity(
        &mut self,
        obj: &ObjectRef,
        f: impl FnOnce(&mut Self) -> Result<(), EncodeError>,
    ) -> Result<(), EncodeError> {
        let (id, first) = self.shared.claim(obj);
        self.write_bool(true)?;
        if !first {
            return self.write_int(id as i32);
        }
        if !self.forked {
            self.write_int(FIRST_OCCURRENCE)?;
            self.write_int(id as i32)?;
            return f(self);
        }
        let mut record = self.record_context();
        f(&mut record)?;
        self.shared.add_record(id, record.into_bytes());
        self.write_int(id as i32)
    }

    /// Writes a size followed by every item.
    pub fn write_collection<I, F>(&mut self, items: I, mut f: F) -> Result<(), EncodeError>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(&mut Self, I::Item) -> Result<(), EncodeError>,
    {
        let items = items.into_iter();
        self.write_len(items.len())?;
        for item in items {
            f(self, item)?;
        }
        Ok(())
    }

    /// Runs `f` with `frame` pushed on the property trace.
    pub fn with_trace<R>(
        &mut self,
        frame: TraceFrame,
        f: impl FnOnce(&mut Self) -> Result<R, EncodeError>,
    ) -> Result<R, EncodeError> {
        self.trace.push(frame);
        let result = f(self);
        self.trace.pop();
        result
    }

    /// Returns the rendered property trace.
    pub fn trace(&self) -> String {
        self.trace.render()
    }

    /// Annotates `err` with the current trace unless it already carries one.
    pub fn traced(&self, err: EncodeError) -> EncodeError {
        if matches!(err, EncodeError::Traced { .. }) || self.trace.is_empty() {
            return err;
        }
        EncodeError::Traced {
            trace: self.trace(),
            source: Box::new(err),
        }
    }

    /// Records that a value could not be serialized and was replaced by a placeholder.
    pub fn report_unsupported(&self, code: DiagnosticCode, message: impl Into<String>) {
        let severity = self.session.unsupported_severity();
        self.session
            .emit(severity, code, message.into(), self.trace());
    }

    /// Records an illegal usage that does not prevent the stream from being written.
    pub fn report_problem(&self, code: DiagnosticCode, message: impl Into<String>) {
        self.session
            .emit(Severity::Error, code, message.into(), self.trace());
    }

    /// Looks up a collaborator visible to the active isolate owner.
    pub fn service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, EncodeError> {
        self.session
            .services
            .lookup::<T>(self.owner())
            .ok_or_else(|| EncodeError::MissingService {
                service: type_name::<T>(),
                owner: self.owner().to_string(),
            })
    }

    /// Runs `f` one bean or collection level deeper, failing once the session limit is exceeded.
    pub fn nested<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, EncodeError>,
    ) -> Result<R, EncodeError> {
        if self.depth >= self.session.max_bean_depth {
            return Err(EncodeError::TooDeep {
                limit: self.session.max_bean_depth,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Consumes the context and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out.into_bytes()
    }
}

impl Deref for WriteContext {
    type Target = StreamWriter;

    fn deref(&self) -> &StreamWriter {
        &self.out
    }
}

impl DerefMut for WriteContext {
    fn deref_mut(&mut self) -> &mut StreamWriter {
        &mut self.out
    }
}

/// Decoder state for one input stream.
pub struct ReadContext {
    input: StreamReader,
    isolate: Isolate<ReadIdentities>,
    shared: Arc<SharedReads>,
    trace: PropertyTrace,
    session: Session,
    depth: usize,
}

impl ReadContext {
    /// Creates a context over `data` whose root isolate belongs to `owner`.
    pub fn new(session: Session, owner: IsolateOwner, codec: ValueCodec, data: Vec<u8>) -> Self {
        Self {
            input: StreamReader::new(data),
            isolate: Isolate::new(owner, codec),
            shared: Arc::new(SharedReads::new()),
            trace: PropertyTrace::new(),
            session,
            depth: 0,
        }
    }

    /// Creates a context over an independent sub-stream written by [`WriteContext::fork`].
    ///
    /// The shared records of the parent must be loaded before the fork
    /// references them.
    pub fn fork(&self, owner: IsolateOwner, data: Vec<u8>) -> Self {
        Self {
            input: StreamReader::new(data),
            isolate: Isolate::new(owner, Arc::clone(&self.isolate.codec)),
            shared: Arc::clone(&self.shared),
            trace: self.trace.clone(),
            session: self.session.clone(),
            depth: 0,
        }
    }

    fn record_context(&self, payload: Vec<u8>) -> Self {
        let mut record = self.fork(self.owner().clone(), payload);
        record.depth = self.depth;
        record
    }

    /// Loads the records written by [`WriteContext::write_shared_records`].
    pub fn read_shared_records(&mut self) -> Result<(), DecodeError> {
        let len = self.read_len()?;
        for _ in 0..len {
            let id = shared_id(self.read_int()?)?;
            let payload = self.read_bytes()?;
            self.shared.add_record(id, payload);
        }
        Ok(())
    }

    /// Returns the session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the owner of the active isolate.
    pub fn owner(&self) -> &IsolateOwner {
        &self.isolate.owner
    }

    /// Returns the active isolate's codec.
    pub fn codec(&self) -> ValueCodec {
        Arc::clone(&self.isolate.codec)
    }

    /// Reads any value through the active codec; dropped values read as [`Value::Null`].
    pub fn read(&mut self) -> Result<Value, DecodeError> {
        let codec = self.codec();
        Ok(codec.decode(self)?.unwrap_or(Value::Null))
    }

    /// Reads a value that must be an object or null.
    pub fn read_object(&mut self) -> Result<Option<ObjectRef>, DecodeError> {
        match self.read()? {
            Value::Null => Ok(None),
            Value::Object(obj) => Ok(Some(obj)),
            other => Err(DecodeError::mismatch("object", other.kind_name())),
        }
    }

    /// Reads a value that must be a `T` or null.
    pub fn read_as<T: Object>(&mut self) -> Result<Option<Arc<T>>, DecodeError> {
        match self.read_object()? {
            None => Ok(None),
            Some(obj) => obj
                .downcast::<T>()
                .map(Some)
                .ok_or_else(|| DecodeError::mismatch(type_name::<T>(), obj.type_key().name)),
        }
    }

    /// Reads a value that must be a non-null `T`.
    pub fn read_non_null<T: Object>(&mut self) -> Result<Arc<T>, DecodeError> {
        self.read_as::<T>()?
            .ok_or_else(|| DecodeError::mismatch(type_name::<T>(), "null"))
    }

    /// Reads a value written by [`WriteContext::write_shared_object`].
    pub fn read_shared_object(&mut self) -> Result<Value, DecodeError> {
        if !self.read_bool()? {
            return self.read();
        }
        let obj = self.decode_shared_identity(|ctx, _| {
            ctx.read_object()?
                .ok_or_else(|| DecodeError::mismatch("shared object", "null"))
        })?;
        Ok(Value::Object(obj))
    }

    /// Runs `f` inside a new isolate owned by `owner`; mirrors [`WriteContext::with_isolate`].
    pub fn with_isolate<R>(
        &mut self,
        owner: IsolateOwner,
        codec: Option<ValueCodec>,
        f: impl FnOnce(&mut Self) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        let codec = codec.unwrap_or_else(|| self.codec());
        let outer = std::mem::replace(&mut self.isolate, Isolate::new(owner, codec));
        let result = f(self);
        self.isolate = outer;
        result
    }

    /// Runs `f` with `codec` as the active codec; mirrors [`WriteContext::with_codec`].
    pub fn with_codec<R>(
        &mut self,
        codec: ValueCodec,
        f: impl FnOnce(&mut Self) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        let outer = std::mem::replace(&mut self.isolate.codec, codec);
        let result = f(self);
        self.isolate.codec = outer;
        result
    }

    fn decode_identity(
        &mut self,
        f: impl FnOnce(&mut Self, u32) -> Result<ObjectRef, DecodeError>,
    ) -> Result<ObjectRef, DecodeError> {
        let marker = self.read_int()?;
        if marker == FIRST_OCCURRENCE {
            let id = self.isolate.identities.reserve();
            let obj = f(self, id)?;
            self.isolate.identities.put_instance(id, obj.clone());
            return Ok(obj);
        }
        u32::try_from(marker)
            .ok()
            .and_then(|id| self.isolate.identities.get_instance(id))
            .ok_or(DecodeError::UnknownIdentity { id: marker })
    }

    fn decode_shared_identity(
        &mut self,
        f: impl FnOnce(&mut Self, u32) -> Result<ObjectRef, DecodeError>,
    ) -> Result<ObjectRef, DecodeError> {
        let marker = self.read_int()?;
        if marker == FIRST_OCCURRENCE {
            let id = shared_id(self.read_int()?)?;
            let obj = f(self, id)?;
            self.shared.put_instance(id, obj.clone());
            return Ok(obj);
        }
        let id = shared_id(marker)?;
        let shared = Arc::clone(&self.shared);
        shared.resolve(id, |payload| {
            let mut record = self.record_context(payload);
            f(&mut record, id)
        })
    }

    /// Reads an object written by [`WriteContext::encode_preserving_identity`].
    ///
    /// `f` receives the reserved id and may call
    /// [`put_instance`](Self::put_instance) before reading the payload so
    /// that cyclic references back to the object resolve.
    pub fn decode_preserving_identity(
        &mut self,
        f: impl FnOnce(&mut Self, u32) -> Result<ObjectRef, DecodeError>,
    ) -> Result<ObjectRef, DecodeError> {
        self.decode_identity(f)
    }

    /// Typed form of [`decode_preserving_identity`](Self::decode_preserving_identity).
    pub fn decode_preserving_identity_of<T: Object>(
        &mut self,
        f: impl FnOnce(&mut Self, u32) -> Result<Arc<T>, DecodeError>,
    ) -> Result<Arc<T>, DecodeError> {
        let obj = self.decode_identity(|ctx, id| f(ctx, id).map(ObjectRef::from_arc))?;
        downcast_identity(obj)
    }

    /// Reads an object written by [`WriteContext::encode_preserving_shared_identity`].
    pub fn decode_preserving_shared_identity_of<T: Object>(
        &mut self,
        f: impl FnOnce(&mut Self, u32) -> Result<Arc<T>, DecodeError>,
    ) -> Result<Arc<T>, DecodeError> {
        if !self.read_bool()? {
            return Err(DecodeError::UnexpectedDiscriminant {
                what: "shared identity",
                value: 0,
            });
        }
        let obj = self.decode_shared_identity(|ctx, id| f(ctx, id).map(ObjectRef::from_arc))?;
        downcast_identity(obj)
    }

    /// Registers `obj` under an id reserved by the enclosing identity decode.
    pub fn put_instance(&mut self, id: u32, obj: ObjectRef) {
        self.isolate.identities.put_instance(id, obj);
    }

    /// Registers `obj` under an id reserved by the enclosing shared identity decode.
    pub fn put_shared_instance(&mut self, id: u32, obj: ObjectRef) {
        self.shared.put_instance(id, obj);
    }

    /// Reads a size followed by that many items.
    pub fn read_collection<T>(
        &mut self,
        mut f: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let len = self.read_len()?;
        // The size is untrusted input; grow as items actually decode.
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Runs `f` with `frame` pushed on the property trace.
    pub fn with_trace<R>(
        &mut self,
        frame: TraceFrame,
        f: impl FnOnce(&mut Self) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        self.trace.push(frame);
        let result = f(self);
        self.trace.pop();
        result
    }

    /// Returns the rendered property trace.
    pub fn trace(&self) -> String {
        self.trace.render()
    }

    /// Annotates `err` with the current trace unless it already carries one.
    pub fn traced(&self, err: DecodeError) -> DecodeError {
        if matches!(err, DecodeError::Traced { .. }) || self.trace.is_empty() {
            return err;
        }
        DecodeError::Traced {
            trace: self.trace(),
            source: Box::new(err),
        }
    }

    /// Records a non-fatal problem found while decoding.
    pub fn report_problem(&self, severity: Severity, code: DiagnosticCode, message: impl Into<String>) {
        self.session.emit(severity, code, message.into(), self.trace());
    }

    /// Looks up a collaborator visible to the active isolate owner.
    pub fn service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, DecodeError> {
        self.session
            .services
            .lookup::<T>(self.owner())
            .ok_or_else(|| DecodeError::MissingService {
                service: type_name::<T>(),
                owner: self.owner().to_string(),
            })
    }

    /// Runs `f` one bean or collection level deeper, failing once the session limit is exceeded.
    pub fn nested<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        if self.depth >= self.session.max_bean_depth {
            return Err(DecodeError::TooDeep {
                limit: self.session.max_bean_depth,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

fn shared_id(raw: i32) -> Result<u32, DecodeError> {
    u32::try_from(raw).map_err(|_| DecodeError::UnknownIdentity { id: raw })
}

fn downcast_identity<T: Object>(obj: ObjectRef) -> Result<Arc<T>, DecodeError> {
    obj.downcast::<T>()
        .ok_or_else(|| DecodeError::mismatch(type_name::<T>(), obj.type_key().name))
}

impl Deref for ReadContext {
    type Target = StreamReader;

    fn deref(&self) -> &StreamReader {
        &self.input
    }
}

impl DerefMut for ReadContext {
    fn deref_mut(&mut self) -> &mut StreamReader {
        &mut self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::base_types;
    use tessera_common::Path;

    fn build() -> IsolateOwner {
        IsolateOwner::Build(Path::root())
    }

    fn codec() -> ValueCodec {
        Arc::new(base_types().build())
    }

    #[derive(Debug)]
    struct Registry;

    #[test]
    fn isolate_is_restored_after_error() {
        let mut ctx = WriteContext::new(Session::new(), build(), codec());
        let task = IsolateOwner::Task(Path::parse(":a:b").unwrap());
        let result: Result<(), _> = ctx.with_isolate(task, None, |ctx| {
            assert!(matches!(ctx.owner(), IsolateOwner::Task(_)));
            Err(EncodeError::Stream("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(ctx.owner(), &build());
    }

    #[test]
    fn identity_repeats_write_the_id() {
        let obj = ObjectRef::new(Registry);
        let mut ctx = WriteContext::new(Session::new(), build(), codec());
        ctx.encode_preserving_identity(&obj, |_| Ok(())).unwrap();
        ctx.encode_preserving_identity(&obj, |_| panic!("payload written twice"))
            .unwrap();
        let mut r = ReadContext::new(Session::new(), build(), codec(), ctx.into_bytes());
        assert_eq!(r.read_int().unwrap(), FIRST_OCCURRENCE);
        assert_eq!(r.read_int().unwrap(), 0);
    }

    #[test]
    fn shared_identity_survives_isolate_changes() {
        let obj = ObjectRef::new(Registry);
        let mut w = WriteContext::new(Session::new(), build(), codec());
        for name in ["a", "b"] {
            let owner = IsolateOwner::Task(Path::root().child(name));
            w.with_isolate(owner, None, |ctx| {
                ctx.encode_preserving_shared_identity(&obj, |_| Ok(()))
            })
            .unwrap();
        }
        let mut r = ReadContext::new(Session::new(), build(), codec(), w.into_bytes());
        let mut decoded = Vec::new();
        for name in ["a", "b"] {
            let owner = IsolateOwner::Task(Path::root().child(name));
            let registry = r
                .with_isolate(owner, None, |ctx| {
                    ctx.decode_preserving_shared_identity_of(|_, _| Ok(Arc::new(Registry)))
                })
                .unwrap();
            decoded.push(registry);
        }
        assert!(Arc::ptr_eq(&decoded[0], &decoded[1]));
    }

    #[test]
    fn unknown_identity_is_corruption() {
        let mut w = WriteContext::new(Session::new(), build(), codec());
        w.write_int(7).unwrap();
        let mut r = ReadContext::new(Session::new(), build(), codec(), w.into_bytes());
        let err = r
            .decode_preserving_identity(|_, _| Ok(ObjectRef::new(Registry)))
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownIdentity { id: 7 }));
        assert!(err.is_protocol_corruption());
    }

    #[test]
    fn fork_starts_with_empty_tables() {
        let obj = ObjectRef::new(Registry);
        let mut parent = WriteContext::new(Session::new(), build(), codec());
        parent.encode_preserving_identity(&obj, |_| Ok(())).unwrap();
        let mut child = parent.fork(IsolateOwner::Project(Path::parse(":lib").unwrap()));
        child.encode_preserving_identity(&obj, |_| Ok(())).unwrap();
        let mut r = ReadContext::new(Session::new(), build(), codec(), child.into_bytes());
        assert_eq!(r.read_int().unwrap(), FIRST_OCCURRENCE);
    }

    #[test]
    fn forks_share_one_identity_for_shared_objects() {
        let obj = ObjectRef::new(Registry);
        let mut parent = WriteContext::new(Session::new(), build(), codec());
        let streams: Vec<Vec<u8>> = ["a", "b"]
            .into_iter()
            .map(|name| {
                let mut fork = parent.fork(IsolateOwner::Project(Path::root().child(name)));
                fork.encode_preserving_shared_identity(&obj, |ctx| ctx.write_int(42))
                    .unwrap();
                fork.into_bytes()
            })
            .collect();
        for bytes in &streams {
            parent.write_bytes(bytes).unwrap();
        }
        parent.write_shared_records().unwrap();

        let mut r = ReadContext::new(Session::new(), build(), codec(), parent.into_bytes());
        let streams = [r.read_bytes().unwrap(), r.read_bytes().unwrap()];
        r.read_shared_records().unwrap();
        let mut created = 0;
        let mut decoded = Vec::new();
        for (name, bytes) in ["a", "b"].into_iter().zip(streams) {
            let mut fork = r.fork(IsolateOwner::Project(Path::root().child(name)), bytes);
            let registry = fork
                .decode_preserving_shared_identity_of(|ctx, _| {
                    assert_eq!(ctx.read_int()?, 42);
                    created += 1;
                    Ok(Arc::new(Registry))
                })
                .unwrap();
            decoded.push(registry);
        }
        assert!(Arc::ptr_eq(&decoded[0], &decoded[1]));
        assert_eq!(created, 1);
    }

    #[test]
    fn fork_reference_to_root_object_resolves() {
        let obj = ObjectRef::new(Registry);
        let mut parent = WriteContext::new(Session::new(), build(), codec());
        parent
            .encode_preserving_shared_identity(&obj, |_| Ok(()))
            .unwrap();
        let mut fork = parent.fork(build());
        fork.encode_preserving_shared_identity(&obj, |_| panic!("payload written twice"))
            .unwrap();
        let bytes = fork.into_bytes();
        parent.write_bytes(&bytes).unwrap();
        parent.write_shared_records().unwrap();

        let mut r = ReadContext::new(Session::new(), build(), codec(), parent.into_bytes());
        let root = r
            .decode_preserving_shared_identity_of(|_, _| Ok(Arc::new(Registry)))
            .unwrap();
        let bytes = r.read_bytes().unwrap();
        r.read_shared_records().unwrap();
        let mut fork = r.fork(build(), bytes);
        let forked = fork
            .decode_preserving_shared_identity_of(|_, _| Ok(Arc::new(Registry)))
            .unwrap();
        assert!(Arc::ptr_eq(&root, &forked));
    }

    #[test]
    fn shared_reference_without_record_is_corruption() {
        let mut w = WriteContext::new(Session::new(), build(), codec());
        w.write_bool(true).unwrap();
        w.write_int(4).unwrap();
        let mut r = ReadContext::new(Session::new(), build(), codec(), w.into_bytes());
        let err = r
            .decode_preserving_shared_identity_of(|_, _| Ok(Arc::new(Registry)))
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownIdentity { id: 4 }));
    }

    #[test]
    fn with_codec_keeps_identities() {
        let obj = ObjectRef::new(Registry);
        let mut ctx = WriteContext::new(Session::new(), build(), codec());
        ctx.encode_preserving_identity(&obj, |_| Ok(())).unwrap();
        ctx.with_codec(codec(), |ctx| ctx.encode_preserving_identity(&obj, |_| Ok(())))
            .unwrap();
        let mut r = ReadContext::new(Session::new(), build(), codec(), ctx.into_bytes());
        assert_eq!(r.read_int().unwrap(), FIRST_OCCURRENCE);
        assert_eq!(r.read_int().unwrap(), 0);
    }

    #[test]
    fn missing_service_names_the_owner() {
        let ctx = WriteContext::new(Session::new(), build(), codec());
        let err = ctx.service::<Registry>().unwrap_err();
        assert!(err.to_string().contains("build ':'"));
    }
}
