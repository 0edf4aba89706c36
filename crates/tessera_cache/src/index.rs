//! The cache index.
//!
//! Stored as `index.json` in the cache directory. It records which entries
//! exist, which build each belongs to, and the checksum each was written
//! with, so that stale entries can be collected.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;

use crate::error::CacheError;

/// Name of the index file within the cache directory.
const INDEX_FILE: &str = "index.json";

/// The entries of one cache directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Engine version that produced this index. Invalidate on version change.
    pub engine_version: String,

    /// Entries by key.
    pub entries: BTreeMap<String, IndexEntry>,
}

/// What the index knows about one stored work graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The build the work graph belongs to.
    pub build: String,

    /// Checksum of the stored payload.
    pub checksum: ContentHash,

    /// Number of scheduled nodes.
    pub scheduled: usize,
}

impl CacheIndex {
    /// Creates an empty index for `engine_version`.
    pub fn new(engine_version: &str) -> Self {
        Self {
            engine_version: engine_version.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the index from `cache_dir`, returning `None` if it is absent or unreadable.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let path = cache_dir.join(INDEX_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "discarding unreadable cache index");
                None
            }
        }
    }

    /// Saves the index to `cache_dir`, creating the directory if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let path = cache_dir.join(INDEX_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Index(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Returns `true` if this index was produced by `current_version`.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.engine_version == current_version
    }
}
