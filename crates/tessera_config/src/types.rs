//! Configuration types deserialized from `tessera.toml`.

use serde::Deserialize;
use std::path::PathBuf;

/// The top-level configuration parsed from `tessera.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TesseraConfig {
    /// Where cache entries live and which engine version stamps them.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Encoder and decoder behavior.
    #[serde(default)]
    pub serialization: SerializationConfig,
}

/// The `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cache entries, relative to the project root.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Version string stamped into every entry header. Entries written by a
    /// different version are treated as a cache miss.
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            engine_version: default_engine_version(),
        }
    }
}

/// The `[serialization]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SerializationConfig {
    /// Encode per-owner work-graph groups on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel_store: bool,
    /// Decode per-owner work-graph groups on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel_load: bool,
    /// Maximum nesting of beans and collections in one stream.
    #[serde(default = "default_max_bean_depth")]
    pub max_bean_depth: usize,
    /// Report unsupported values as errors instead of warnings.
    #[serde(default)]
    pub strict_unsupported: bool,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            parallel_store: true,
            parallel_load: true,
            max_bean_depth: default_max_bean_depth(),
            strict_unsupported: false,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".tessera/cache")
}

fn default_engine_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_bean_depth() -> usize {
    512
}

fn default_true() -> bool {
    true
}
