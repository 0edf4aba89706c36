//! The error for a broken engine invariant.

/// Raised when the engine itself is wrong, for example a plan edge that
/// names a node which was never added.
///
/// Damaged or outdated cache entries are never reported this way.
#[derive(Debug, thiserror::Error)]
#[error("tessera invariant violated: {message}")]
pub struct InternalError {
    /// The invariant that does not hold.
    pub message: String,
}

impl InternalError {
    /// Reports a violated invariant.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_the_invariant() {
        let err = InternalError::new(format!("edge to unknown node {}", "#9"));
        assert_eq!(err.message, "edge to unknown node #9");
        assert_eq!(err.to_string(), "tessera invariant violated: edge to unknown node #9");
    }
}
