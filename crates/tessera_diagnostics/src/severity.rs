//! How bad a reported problem is for the cache entry being written.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a [`Diagnostic`](crate::Diagnostic).
///
/// Warnings describe values that were replaced on the way into the cache.
/// Errors prevent the entry from being stored at all.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Severity {
    /// Extra context attached to a store or load.
    Note,
    /// A value was degraded but the entry is still usable.
    Warning,
    /// The entry must not be stored.
    Error,
}

impl Severity {
    /// The severity used for a value the cache cannot represent.
    pub fn for_unsupported(strict: bool) -> Self {
        if strict {
            Severity::Error
        } else {
            Severity::Warning
        }
    }

    /// Whether a diagnostic of this severity blocks storing the entry.
    pub fn is_error(self) -> bool {
        matches!(self, Severity::Error)
    }

    /// Lowercase label used by the renderers.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
