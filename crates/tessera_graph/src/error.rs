//! Error types for encoding and decoding object graphs.
//!
//! Unsupported values are not errors: they are reported as diagnostics and
//! replaced by a placeholder. The errors here abort the whole session.

/// Errors that abort an encode session.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The underlying stream rejected a write.
    #[error("stream write failed: {0}")]
    Stream(String),

    /// Bean nesting exceeded the configured limit.
    #[error("object graph nested deeper than {limit} beans")]
    TooDeep {
        /// The configured maximum depth.
        limit: usize,
    },

    /// A collaborator service was not registered for the current isolate owner.
    #[error("no service of type '{service}' available to {owner}")]
    MissingService {
        /// The service type name.
        service: &'static str,
        /// The isolate owner that performed the lookup.
        owner: String,
    },

    /// A codec received a value it cannot encode in the current context.
    #[error("cannot encode {what}: {reason}")]
    Illegal {
        /// What was being encoded.
        what: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A nested error, annotated with the property trace where it happened.
    #[error("{source} (while encoding {trace})")]
    Traced {
        /// The rendered property trace.
        trace: String,
        /// The original error.
        source: Box<EncodeError>,
    },
}

impl EncodeError {
    /// Returns the innermost error, skipping trace annotations.
    pub fn root(&self) -> &EncodeError {
        match self {
            EncodeError::Traced { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors that abort a decode session.
///
/// Every variant means the stream cannot be trusted; callers discard the
/// cache entry and rebuild.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The underlying stream contained malformed bytes.
    #[error("malformed stream: {0}")]
    Stream(String),

    /// The stream ended before the value was complete.
    #[error("unexpected end of stream at byte {offset}")]
    UnexpectedEof {
        /// Byte offset where more input was required.
        offset: usize,
    },

    /// A type tag does not correspond to any binding.
    #[error("unknown type tag {tag} (registry has {bindings} bindings)")]
    UnknownTag {
        /// The tag read from the stream.
        tag: i32,
        /// The number of bindings in the active registry.
        bindings: usize,
    },

    /// An identity reference points at an id that was never registered.
    #[error("reference to unknown object id {id}")]
    UnknownIdentity {
        /// The id read from the stream.
        id: i32,
    },

    /// A discriminant had a value no codec writes.
    #[error("unexpected {what} discriminant {value}")]
    UnexpectedDiscriminant {
        /// What the discriminant selects.
        what: &'static str,
        /// The value read from the stream.
        value: i64,
    },

    /// A decoded value was not of the type its position requires.
    #[error("expected {expected}, decoded {found}")]
    TypeMismatch {
        /// The required type.
        expected: &'static str,
        /// The decoded value kind.
        found: String,
    },

    /// A work-graph reference points at a node id that was never written.
    #[error("reference to unknown work node id {id}")]
    UnknownNode {
        /// The node id read from the stream.
        id: i32,
    },

    /// The stream does not end with the expected trailer.
    #[error("missing stream trailer: found {found:#x}")]
    MissingTrailer {
        /// The value found where the trailer should be.
        found: i64,
    },

    /// An object could not be reconstructed.
    #[error("cannot construct '{type_name}': {reason}")]
    Construction {
        /// The type being reconstructed.
        type_name: String,
        /// Why construction failed.
        reason: String,
    },

    /// Bean nesting exceeded the configured limit.
    #[error("object graph nested deeper than {limit} beans")]
    TooDeep {
        /// The configured maximum depth.
        limit: usize,
    },

    /// A collaborator service was not registered for the current isolate owner.
    #[error("no service of type '{service}' available to {owner}")]
    MissingService {
        /// The service type name.
        service: &'static str,
        /// The isolate owner that performed the lookup.
        owner: String,
    },

    /// A nested error, annotated with the property trace where it happened.
    #[error("{source} (while decoding {trace})")]
    Traced {
        /// The rendered property trace.
        trace: String,
        /// The original error.
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Returns the innermost error, skipping trace annotations.
    pub fn root(&self) -> &DecodeError {
        match self {
            DecodeError::Traced { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the stream itself is inconsistent, as opposed to
    /// the environment failing to rebuild a well-formed value.
    pub fn is_protocol_corruption(&self) -> bool {
        !matches!(
            self.root(),
            DecodeError::Construction { .. }
                | DecodeError::TooDeep { .. }
                | DecodeError::MissingService { .. }
        )
    }

    /// Shorthand for a [`DecodeError::TypeMismatch`].
    pub fn mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        DecodeError::TypeMismatch {
            expected,
            found: found.into(),
        }
    }
}
