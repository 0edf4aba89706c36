//! Failures of the plan cache.

use std::path::PathBuf;
use tessera_graph::{DecodeError, EncodeError};

/// Why a plan could not be stored, or why a stored entry was rejected.
///
/// [`PlanCache::load`](crate::PlanCache::load) turns these into a
/// [`CacheOutcome`](crate::CacheOutcome) instead of returning them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cache file could not be read, written or removed.
    #[error("cache file {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The entry is intact but was written by another engine or format.
    #[error("outdated cache entry {}: {reason}", path.display())]
    Stale {
        /// Entry file.
        path: PathBuf,
        /// Which version differs.
        reason: String,
    },

    /// The entry file is damaged.
    #[error("damaged cache entry {}: {reason}", path.display())]
    Corrupt {
        /// Entry file.
        path: PathBuf,
        /// What failed to validate.
        reason: String,
    },

    /// An entry header could not be encoded.
    #[error("cannot frame cache entry: {0}")]
    Frame(String),

    /// The index could not be written.
    #[error("cannot write cache index: {0}")]
    Index(String),

    /// The work graph could not be encoded.
    #[error("cannot store work graph: {0}")]
    Encode(#[from] EncodeError),

    /// The work graph could not be decoded.
    #[error("cannot load work graph: {0}")]
    Decode(#[from] DecodeError),

    /// Encoding reported error diagnostics, so the entry would be incomplete.
    #[error("{count} problem(s) were found storing the work graph")]
    Problems {
        /// Error diagnostics reported.
        count: usize,
    },
}

impl CacheError {
    /// Whether the entry should be treated as a miss and left on disk.
    pub fn is_stale(&self) -> bool {
        matches!(self, CacheError::Stale { .. })
    }
}
