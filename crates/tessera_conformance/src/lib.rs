//! Conformance test helpers for the tessera object-graph cache.
//!
//! Provides a [`Harness`] that runs values and work graphs through the fully
//! composed codecs and the plan cache, and returns the decoded results with
//! the diagnostics recorded along the way.

#![warn(missing_docs)]

use std::path::Path as FsPath;
use std::sync::Arc;

use tessera_cache::{
    decode_plan, encode_plan, CacheError, CacheOutcome, EntryStore, PlanCache, PLAN_EXT,
    PLAN_SUBDIR,
};
use tessera_codecs::{Codecs, Collaborators};
use tessera_common::Path;
use tessera_config::TesseraConfig;
use tessera_diagnostics::Diagnostic;
use tessera_graph::{
    BeanRegistry, IsolateOwner, ReadContext, ServiceRegistry, Session, UnsupportedTypes, Value,
    WriteContext,
};
use tessera_model::{FileCollectionFactory, FileFactory};
use tessera_plan::ScheduledWork;

/// Directory that file values resolve against.
pub const BASE_DIR: &str = "/work";

/// Engine version used by harness caches.
pub const ENGINE_VERSION: &str = "conformance";

/// Creates a `TesseraConfig` with the given parallelism and strictness.
pub fn make_config(parallel: bool, strict_unsupported: bool) -> TesseraConfig {
    let toml_str = format!(
        r#"
[cache]
dir = ".tessera"
engine_version = "{ENGINE_VERSION}"

[serialization]
parallel_store = {parallel}
parallel_load = {parallel}
strict_unsupported = {strict_unsupported}
"#
    );
    toml::from_str(&toml_str).unwrap()
}

/// The composed codecs of a test build, with its services.
pub struct Harness {
    collaborators: Collaborators,
    codecs: Codecs,
    services: Arc<ServiceRegistry>,
}

impl Harness {
    /// Creates a harness for `beans` with the standard denylist and default settings.
    pub fn new(beans: BeanRegistry) -> Self {
        Self::with_unsupported(beans, UnsupportedTypes::standard())
    }

    /// Creates a harness with a custom denylist.
    pub fn with_unsupported(beans: BeanRegistry, unsupported: UnsupportedTypes) -> Self {
        Self::with_config(beans, unsupported, &TesseraConfig::default())
    }

    /// Creates a harness with the settings of `config`.
    pub fn with_config(
        beans: BeanRegistry,
        unsupported: UnsupportedTypes,
        config: &TesseraConfig,
    ) -> Self {
        let collaborators = Collaborators::default()
            .with_beans(beans)
            .with_unsupported(unsupported);
        Self::with_collaborators(collaborators, config)
    }

    /// Creates a harness over prepared collaborators.
    pub fn with_collaborators(collaborators: Collaborators, config: &TesseraConfig) -> Self {
        let services = Arc::new(ServiceRegistry::new());
        services.register(Arc::new(FileFactory::new(BASE_DIR)));
        services.register(Arc::new(FileCollectionFactory::new(FileFactory::new(BASE_DIR))));
        Self {
            codecs: Codecs::from_config(&collaborators, config),
            collaborators,
            services,
        }
    }

    /// Returns the collaborators the codecs were composed from.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Returns the composed codecs.
    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    /// Creates a fresh session over the harness services.
    pub fn session(&self) -> Session {
        self.codecs.session(Arc::clone(&self.services))
    }

    /// Writes `values` to one stream with the user codec and reads them back.
    ///
    /// Returns the decoded values and every diagnostic reported while writing.
    pub fn roundtrip(&self, values: &[Value]) -> Result<(Vec<Value>, Vec<Diagnostic>), CacheError> {
        let session = self.session();
        let owner = IsolateOwner::Project(Path::root().child("app"));
        let mut writer =
            WriteContext::new(session.clone(), owner.clone(), self.codecs.user_types_codec());
        for value in values {
            writer.write(value)?;
        }
        let mut reader = ReadContext::new(
            session.clone(),
            owner,
            self.codecs.user_types_codec(),
            writer.into_bytes(),
        );
        let decoded = values
            .iter()
            .map(|_| reader.read())
            .collect::<Result<Vec<_>, _>>()?;
        Ok((decoded, session.diagnostics.take_all()))
    }

    /// Encodes and decodes `work` as a plan of the root build.
    pub fn roundtrip_work(&self, work: &ScheduledWork) -> Result<ScheduledWork, CacheError> {
        let bytes = self.encode_work(work)?;
        self.decode_work(bytes)
    }

    /// Encodes `work` as a plan of the root build, trailer included.
    pub fn encode_work(&self, work: &ScheduledWork) -> Result<Vec<u8>, CacheError> {
        Ok(encode_plan(&self.codecs, &self.session(), &Path::root(), work)?)
    }

    /// Decodes a plan of the root build.
    pub fn decode_work(&self, bytes: Vec<u8>) -> Result<ScheduledWork, CacheError> {
        Ok(decode_plan(&self.codecs, &self.session(), &Path::root(), bytes)?)
    }

    /// Opens a plan cache in `dir`.
    pub fn open_cache(&self, dir: &FsPath) -> PlanCache {
        PlanCache::open(dir, ENGINE_VERSION)
    }

    /// Writes `bytes` as the payload of the entry under `key`, with a valid header.
    pub fn store_raw(&self, dir: &FsPath, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        EntryStore::new(dir.join(PLAN_SUBDIR), PLAN_EXT).write(key, bytes, ENGINE_VERSION)?;
        Ok(())
    }

    /// Stores `work` under `key` in the cache in `dir`, then loads it back.
    pub fn store_and_load(
        &self,
        dir: &FsPath,
        key: &str,
        work: &ScheduledWork,
    ) -> Result<CacheOutcome<ScheduledWork>, CacheError> {
        let mut cache = self.open_cache(dir);
        cache.store(key, &self.codecs, &self.session(), &Path::root(), work)?;
        Ok(self
            .open_cache(dir)
            .load(key, &self.codecs, &self.session(), &Path::root()))
    }
}
