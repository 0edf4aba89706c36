//! Isolate owners and owner-scoped service lookup.
//!
//! An isolate marks the logical owner of the subgraph currently being
//! encoded or decoded. Codecs use it to find collaborators that depend on
//! the owner (a project's file resolver, a build's service registry) and to
//! reject values that are illegal outside a particular owner.

use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tessera_common::Path;

/// The logical owner of an isolate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IsolateOwner {
    /// A build, by build path.
    Build(Path),
    /// A project's work nodes, by project path.
    Project(Path),
    /// A single task, by task path.
    Task(Path),
    /// The scope that owns registered flow actions of a build.
    FlowScope(Path),
    /// The parameters of one flow action inside a flow scope.
    FlowAction(Path),
}

impl IsolateOwner {
    /// Returns the owner's path.
    pub fn path(&self) -> &Path {
        match self {
            IsolateOwner::Build(p)
            | IsolateOwner::Project(p)
            | IsolateOwner::Task(p)
            | IsolateOwner::FlowScope(p)
            | IsolateOwner::FlowAction(p) => p,
        }
    }

    /// Returns `true` for [`IsolateOwner::FlowAction`].
    pub fn is_flow_action(&self) -> bool {
        matches!(self, IsolateOwner::FlowAction(_))
    }

    /// Returns `true` for [`IsolateOwner::FlowScope`].
    pub fn is_flow_scope(&self) -> bool {
        matches!(self, IsolateOwner::FlowScope(_))
    }
}

impl fmt::Display for IsolateOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolateOwner::Build(p) => write!(f, "build '{p}'"),
            IsolateOwner::Project(p) => write!(f, "project '{p}'"),
            IsolateOwner::Task(p) => write!(f, "task '{p}'"),
            IsolateOwner::FlowScope(p) => write!(f, "flow scope of '{p}'"),
            IsolateOwner::FlowAction(p) => write!(f, "flow action of '{p}'"),
        }
    }
}

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Service locator keyed by isolate owner, with a global fallback.
///
/// Lookups first consult services registered for the exact owner, then
/// services registered globally.
#[derive(Default)]
pub struct ServiceRegistry {
    global: RwLock<ServiceMap>,
    scoped: RwLock<HashMap<IsolateOwner, ServiceMap>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` for every owner.
    pub fn register<T: Any + Send + Sync>(&self, service: Arc<T>) {
        self.global.write().insert(TypeId::of::<T>(), service);
    }

    /// Registers `service` for a single owner, shadowing any global one.
    pub fn register_for<T: Any + Send + Sync>(&self, owner: IsolateOwner, service: Arc<T>) {
        self.scoped
            .write()
            .entry(owner)
            .or_default()
            .insert(TypeId::of::<T>(), service);
    }

    /// Looks up a `T` visible to `owner`.
    pub fn lookup<T: Any + Send + Sync>(&self, owner: &IsolateOwner) -> Option<Arc<T>> {
        let key = TypeId::of::<T>();
        let scoped = self
            .scoped
            .read()
            .get(owner)
            .and_then(|services| services.get(&key).cloned());
        let service = scoped.or_else(|| self.global.read().get(&key).cloned())?;
        service.downcast::<T>().ok()
    }

    /// Returns the type name of `T`, for missing-service reports.
    pub fn service_name<T: Any>() -> &'static str {
        type_name::<T>()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("global", &self.global.read().len())
            .field("scoped_owners", &self.scoped.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Resolver(&'static str);

    fn project(p: &str) -> IsolateOwner {
        IsolateOwner::Project(Path::parse(p).unwrap())
    }

    #[test]
    fn global_lookup() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Resolver("root")));
        let found = registry.lookup::<Resolver>(&project(":a")).unwrap();
        assert_eq!(*found, Resolver("root"));
    }

    #[test]
    fn scoped_shadows_global() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Resolver("root")));
        registry.register_for(project(":lib"), Arc::new(Resolver("lib")));
        assert_eq!(*registry.lookup::<Resolver>(&project(":lib")).unwrap(), Resolver("lib"));
        assert_eq!(*registry.lookup::<Resolver>(&project(":app")).unwrap(), Resolver("root"));
    }

    #[test]
    fn missing_service() {
        let registry = ServiceRegistry::new();
        assert!(registry.lookup::<Resolver>(&project(":a")).is_none());
    }

    #[test]
    fn owner_display() {
        assert_eq!(project(":lib").to_string(), "project ':lib'");
        assert!(IsolateOwner::FlowAction(Path::root()).is_flow_action());
    }
}
