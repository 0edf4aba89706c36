//! Errors raised by build-domain collaborators.

/// A collaborator could not produce or update a domain value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A property was changed after changes were disallowed.
    #[error("the value of {kind} property of type '{value_type}' cannot be changed any further")]
    ChangesDisallowed {
        /// The property kind.
        kind: &'static str,
        /// The declared value type.
        value_type: String,
    },

    /// No value source of this type has been registered.
    #[error("unknown value source type '{0}'")]
    UnknownValueSource(String),

    /// No managed factory is registered under this id.
    #[error("no managed factory registered with id {0}")]
    UnknownManagedFactory(i32),

    /// A managed factory rejected the state it was asked to restore.
    #[error("cannot create managed '{public_type}': {reason}")]
    InvalidManagedState {
        /// The public type requested.
        public_type: String,
        /// Why the state was rejected.
        reason: String,
    },
}
