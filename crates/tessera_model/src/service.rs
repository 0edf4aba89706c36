//! Value sources, build services and flow providers.
//!
//! These are the changing sources a provider can delegate to. Each comes
//! with the collaborator that recreates it on load.

use crate::error::ModelError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tessera_common::Path;
use tessera_graph::Value;

/// A provider computing its value from an external source at execution time.
#[derive(Debug)]
pub struct ValueSourceProvider {
    source_type: String,
    parameters: Value,
    obtained: AtomicBool,
}

impl ValueSourceProvider {
    /// Creates a provider for `source_type` with optional `parameters`.
    pub fn new(source_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            source_type: source_type.into(),
            parameters,
            obtained: AtomicBool::new(false),
        }
    }

    /// Returns the value source type.
    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Returns the parameters, or null when the source takes none.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Returns `true` if the value was read during configuration.
    pub fn has_been_obtained(&self) -> bool {
        self.obtained.load(Ordering::Acquire)
    }

    /// Records that the value was read during configuration.
    pub fn mark_obtained(&self) {
        self.obtained.store(true, Ordering::Release);
    }
}

/// Recreates value source providers for registered source types.
#[derive(Debug, Default)]
pub struct ValueSourceProviderFactory {
    known: HashSet<String>,
    instantiated: AtomicUsize,
}

impl ValueSourceProviderFactory {
    /// Creates a factory with no known source types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `source_type` instantiable.
    pub fn with_source(mut self, source_type: impl Into<String>) -> Self {
        self.known.insert(source_type.into());
        self
    }

    /// Creates a provider for `source_type`.
    pub fn instantiate(&self, source_type: &str, parameters: Value) -> Result<Arc<ValueSourceProvider>, ModelError> {
        if !self.known.contains(source_type) {
            return Err(ModelError::UnknownValueSource(source_type.to_string()));
        }
        self.instantiated.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(ValueSourceProvider::new(source_type, parameters)))
    }

    /// Returns how many providers this factory has created.
    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::Relaxed)
    }
}

/// A provider of a shared build service.
#[derive(Debug)]
pub struct BuildServiceProvider {
    build: Path,
    name: String,
    service_type: String,
    resolved: bool,
    parameters: Value,
    max_usages: i32,
}

impl BuildServiceProvider {
    /// Returns the build that registered the service.
    pub fn build(&self) -> &Path {
        &self.build
    }

    /// Returns the registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the service implementation type.
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Returns `true` if the registration details are known.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Returns the service parameters.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Returns the maximum number of concurrent usages, `-1` for unlimited.
    pub fn max_usages(&self) -> i32 {
        self.max_usages
    }
}

/// The build services registered in one build.
#[derive(Debug)]
pub struct BuildServiceRegistry {
    build: Path,
    registrations: Mutex<HashMap<String, Arc<BuildServiceProvider>>>,
}

impl BuildServiceRegistry {
    /// Creates an empty registry for `build`.
    pub fn new(build: Path) -> Self {
        Self {
            build,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the build this registry belongs to.
    pub fn build(&self) -> &Path {
        &self.build
    }

    /// Registers a service unless one with the same name exists, returning the registration.
    pub fn register_if_absent(
        &self,
        name: &str,
        service_type: &str,
        parameters: Value,
        max_usages: i32,
    ) -> Arc<BuildServiceProvider> {
        let mut registrations = self.registrations.lock();
        Arc::clone(registrations.entry(name.to_string()).or_insert_with(|| {
            Arc::new(BuildServiceProvider {
                build: self.build.clone(),
                name: name.to_string(),
                service_type: service_type.to_string(),
                resolved: true,
                parameters,
                max_usages,
            })
        }))
    }

    /// Returns a provider consuming the service `name`.
    ///
    /// The registration is used if it exists; otherwise the provider is
    /// unresolved and is bound when the service is registered later.
    pub fn consume(&self, name: &str, service_type: &str) -> Arc<BuildServiceProvider> {
        if let Some(existing) = self.registrations.lock().get(name) {
            return Arc::clone(existing);
        }
        Arc::new(BuildServiceProvider {
            build: self.build.clone(),
            name: name.to_string(),
            service_type: service_type.to_string(),
            resolved: false,
            parameters: Value::Null,
            max_usages: -1,
        })
    }

    /// Returns the registration for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<BuildServiceProvider>> {
        self.registrations.lock().get(name).cloned()
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }
}

/// The result of the build's work, available to flow actions only.
#[derive(Debug, Default)]
pub struct BuildWorkResultProvider;

/// Providers that flow actions may consume.
#[derive(Debug, Default)]
pub struct FlowProviders {
    build_work_result: Arc<BuildWorkResultProvider>,
}

impl FlowProviders {
    /// Creates the providers for one build.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the build work result provider.
    pub fn build_work_result(&self) -> Arc<BuildWorkResultProvider> {
        Arc::clone(&self.build_work_result)
    }
}

/// A flow action registered to run when the build finishes.
#[derive(Debug)]
pub struct RegisteredFlowAction {
    /// The flow action type.
    pub action_type: String,
    /// The action parameters, or null.
    pub parameters: Value,
}

impl RegisteredFlowAction {
    /// Creates a registration.
    pub fn new(action_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            action_type: action_type.into(),
            parameters,
        }
    }
}
