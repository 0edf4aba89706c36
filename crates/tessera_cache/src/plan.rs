//! Storing and loading the work graph of a build.
//!
//! A stored plan is the work-graph stream of the build followed by
//! [`STREAM_TRAILER`], framed by the [`EntryStore`]. Loading classifies
//! every failure: an absent or outdated entry is a miss, anything that fails
//! validation or decoding is invalid and gets deleted so the next run
//! rebuilds it.

use std::path::{Path as FsPath, PathBuf};

use tessera_codecs::Codecs;
use tessera_common::{ContentHash, Path};
use tessera_config::CacheConfig;
use tessera_diagnostics::{ProblemSummary, TerminalRenderer};
use tessera_graph::{DecodeError, EncodeError, IsolateOwner, ReadContext, Session, WriteContext};
use tessera_plan::ScheduledWork;

use crate::entry::EntryStore;
use crate::error::CacheError;
use crate::index::{CacheIndex, IndexEntry};

/// The integer every stored work-graph stream ends with.
pub const STREAM_TRAILER: i32 = 0x1ecac8e;

/// Subdirectory of the cache directory holding plan entries.
pub const PLAN_SUBDIR: &str = "plans";
/// Extension of plan entry files.
pub const PLAN_EXT: &str = "bin";

/// The result of looking up a stored plan.
#[derive(Debug)]
pub enum CacheOutcome<T> {
    /// The entry was loaded.
    Hit(T),
    /// There is no usable entry; nothing is wrong with the cache.
    Miss(String),
    /// The entry was corrupt and has been discarded.
    Invalid(String),
}

impl<T> CacheOutcome<T> {
    /// Returns `true` for [`CacheOutcome::Hit`].
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit(_))
    }

    /// Returns the loaded value, if any.
    pub fn into_hit(self) -> Option<T> {
        match self {
            CacheOutcome::Hit(value) => Some(value),
            CacheOutcome::Miss(_) | CacheOutcome::Invalid(_) => None,
        }
    }
}

/// Encodes the work graph of `build` followed by the stream trailer.
pub fn encode_plan(
    codecs: &Codecs,
    session: &Session,
    build: &Path,
    work: &ScheduledWork,
) -> Result<Vec<u8>, EncodeError> {
    let mut ctx = WriteContext::new(
        session.clone(),
        IsolateOwner::Build(build.clone()),
        codecs.internal_types_codec(),
    );
    codecs.work_node_codec_for(build.clone()).write_work(&mut ctx, work)?;
    ctx.write_int(STREAM_TRAILER)?;
    Ok(ctx.into_bytes())
}

/// Decodes a stream written by [`encode_plan`].
pub fn decode_plan(
    codecs: &Codecs,
    session: &Session,
    build: &Path,
    bytes: Vec<u8>,
) -> Result<ScheduledWork, DecodeError> {
    let mut ctx = ReadContext::new(
        session.clone(),
        IsolateOwner::Build(build.clone()),
        codecs.internal_types_codec(),
        bytes,
    );
    let work = codecs.work_node_codec_for(build.clone()).read_work(&mut ctx)?;
    let trailer = ctx.read_int().map_err(|_| DecodeError::MissingTrailer { found: -1 })?;
    if trailer != STREAM_TRAILER {
        return Err(DecodeError::MissingTrailer {
            found: i64::from(trailer),
        });
    }
    if !ctx.is_at_end() {
        return Err(DecodeError::Stream(format!(
            "unexpected bytes after the trailer at byte {}",
            ctx.position()
        )));
    }
    Ok(work)
}

/// The plan entries of one cache directory.
pub struct PlanCache {
    cache_dir: PathBuf,
    index: CacheIndex,
    entries: EntryStore,
    engine_version: String,
}

impl PlanCache {
    /// Opens the cache in `cache_dir`.
    ///
    /// An index written by another engine version is discarded.
    pub fn open(cache_dir: &FsPath, engine_version: &str) -> Self {
        let index = CacheIndex::load(cache_dir)
            .filter(|index| index.is_compatible(engine_version))
            .unwrap_or_else(|| CacheIndex::new(engine_version));
        Self {
            cache_dir: cache_dir.to_path_buf(),
            index,
            entries: EntryStore::new(cache_dir.join(PLAN_SUBDIR), PLAN_EXT),
            engine_version: engine_version.to_string(),
        }
    }

    /// Opens the cache configured by the `[cache]` section, relative to `project_dir`.
    pub fn from_config(project_dir: &FsPath, config: &CacheConfig) -> Self {
        Self::open(&project_dir.join(&config.dir), &config.engine_version)
    }

    /// Derives an entry key from the build and the requested work.
    pub fn key_for(build: &Path, requested: &[&str]) -> String {
        let build = build.to_string();
        let parts = std::iter::once(build.as_bytes())
            .chain(requested.iter().flat_map(|r| [b"\0".as_slice(), r.as_bytes()]));
        ContentHash::from_parts(parts).to_string()
    }

    /// Encodes `work` and stores it under `key`.
    ///
    /// Nothing is written if encoding reported an error diagnostic.
    pub fn store(
        &mut self,
        key: &str,
        codecs: &Codecs,
        session: &Session,
        build: &Path,
        work: &ScheduledWork,
    ) -> Result<(), CacheError> {
        let bytes = encode_plan(codecs, session, build, work)?;
        let problems = ProblemSummary::from_diagnostics(session.diagnostics.snapshot());
        if problems.distinct() > 0 {
            tracing::warn!(key, "{}", problems.render(&TerminalRenderer::new(false)));
        }
        if session.diagnostics.has_errors() {
            return Err(CacheError::Problems {
                count: session.diagnostics.error_count(),
            });
        }
        let checksum = self.entries.write(key, &bytes, &self.engine_version)?;
        tracing::debug!(key, build = %build, bytes = bytes.len(), "stored work graph");
        self.index.entries.insert(
            key.to_string(),
            IndexEntry {
                build: build.to_string(),
                checksum,
                scheduled: work.scheduled().len(),
            },
        );
        self.index.save(&self.cache_dir)
    }

    /// Loads the plan stored under `key`.
    pub fn load(
        &mut self,
        key: &str,
        codecs: &Codecs,
        session: &Session,
        build: &Path,
    ) -> CacheOutcome<ScheduledWork> {
        let bytes = match self.entries.read(key, &self.engine_version) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key, "cache miss: no entry");
                return CacheOutcome::Miss(format!("no cache entry for '{key}'"));
            }
            Err(e) if e.is_stale() => {
                tracing::debug!(key, reason = %e, "cache miss: stale entry");
                return CacheOutcome::Miss(e.to_string());
            }
            Err(e) => return self.discard(key, e),
        };
        match decode_plan(codecs, session, build, bytes) {
            Ok(work) => {
                tracing::debug!(key, build = %build, nodes = work.len(), "cache hit");
                CacheOutcome::Hit(work)
            }
            Err(e) => self.discard(key, CacheError::Decode(e)),
        }
    }

    fn discard(&mut self, key: &str, reason: CacheError) -> CacheOutcome<ScheduledWork> {
        tracing::debug!(key, reason = %reason, "cache entry invalid, discarding");
        if let Err(e) = self.invalidate(key) {
            tracing::debug!(key, error = %e, "failed to discard invalid cache entry");
        }
        CacheOutcome::Invalid(reason.to_string())
    }

    /// Deletes the entry under `key` and drops it from the index.
    pub fn invalidate(&mut self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key)?;
        if self.index.entries.remove(key).is_some() {
            self.index.save(&self.cache_dir)?;
        }
        Ok(())
    }

    /// Returns the index.
    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// Removes entry files the index does not know and returns how many were removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        self.entries.retain(|key| self.index.entries.contains_key(key))
    }
}
