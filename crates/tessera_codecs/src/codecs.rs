//! The entry point that assembles the user and internal codecs.
//!
//! The user codec serializes whatever build logic put into the object graph.
//! Its layers, in lookup order, are the unsupported-type denylist, base
//! types, providers, changing value sources, files, attributes, artifacts,
//! flow actions, and finally beans. The internal codec serializes the
//! engine's own structures and reaches the user codec through tasks.

use crate::artifact::artifact_types;
use crate::attribute::attribute_types;
use crate::file::file_types;
use crate::provider::{
    changing_value_types, provider_types, FixedValueReplacingProviderCodec, RegisteredFlowActionCodec,
};
use crate::task::TaskCodec;
use crate::work::WorkNodeCodec;
use std::sync::Arc;
use tessera_common::Path;
use tessera_config::{SerializationConfig, TesseraConfig};
use tessera_graph::{
    base_types, bean_types, unsupported_types, BeanRegistry, Bindings, ServiceRegistry, Session,
    UnsupportedTypes, ValueCodec,
};
use tessera_model::{
    AttributesFactory, FlowProviders, ManagedFactoryRegistry, RegisteredFlowAction, Task,
    ValueSourceProviderFactory,
};
use tessera_plan::OrdinalGroupFactory;

/// Collaborators shared by every cache operation of one build.
///
/// Owner-scoped collaborators (file factories, build service registries) are
/// not listed here; codecs look them up through the session's
/// [`ServiceRegistry`].
pub struct Collaborators {
    /// The types the bean codec may reconstruct.
    pub beans: Arc<BeanRegistry>,
    /// The types that are never serialized.
    pub unsupported: Arc<UnsupportedTypes>,
    /// Recreates value-source providers on load.
    pub value_sources: Arc<ValueSourceProviderFactory>,
    /// Supplies flow providers inside flow actions.
    pub flow_providers: Arc<FlowProviders>,
    /// Interns attribute sets on load.
    pub attributes: Arc<AttributesFactory>,
    /// Rebuilds managed attribute values.
    pub managed_factories: Arc<ManagedFactoryRegistry>,
    /// Interns ordinal node groups on load.
    pub ordinal_groups: Arc<OrdinalGroupFactory>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            beans: Arc::new(BeanRegistry::new()),
            unsupported: Arc::new(UnsupportedTypes::standard()),
            value_sources: Arc::new(ValueSourceProviderFactory::new()),
            flow_providers: Arc::new(FlowProviders::new()),
            attributes: Arc::new(AttributesFactory::new()),
            managed_factories: Arc::new(ManagedFactoryRegistry::standard()),
            ordinal_groups: Arc::new(OrdinalGroupFactory::new()),
        }
    }
}

impl Collaborators {
    /// Uses `beans` as the bean registry.
    pub fn with_beans(mut self, beans: BeanRegistry) -> Self {
        self.beans = Arc::new(beans);
        self
    }

    /// Uses `unsupported` as the denylist.
    pub fn with_unsupported(mut self, unsupported: UnsupportedTypes) -> Self {
        self.unsupported = Arc::new(unsupported);
        self
    }

    /// Uses `value_sources` to recreate value-source providers.
    pub fn with_value_sources(mut self, value_sources: Arc<ValueSourceProviderFactory>) -> Self {
        self.value_sources = value_sources;
        self
    }

    /// Uses `flow_providers` inside flow actions.
    pub fn with_flow_providers(mut self, flow_providers: Arc<FlowProviders>) -> Self {
        self.flow_providers = flow_providers;
        self
    }
}

/// The composed codecs of one build.
pub struct Codecs {
    user: ValueCodec,
    internal: ValueCodec,
    ordinal_groups: Arc<OrdinalGroupFactory>,
    settings: SerializationConfig,
}

impl Codecs {
    /// Composes the codecs for `collaborators`.
    pub fn new(collaborators: &Collaborators, settings: SerializationConfig) -> Self {
        let user: ValueCodec = Arc::new(user_types(collaborators).build());
        let internal: ValueCodec = Arc::new(internal_types(Arc::clone(&user)).build());
        Self {
            user,
            internal,
            ordinal_groups: Arc::clone(&collaborators.ordinal_groups),
            settings,
        }
    }

    /// Composes the codecs with the `[serialization]` settings of `config`.
    pub fn from_config(collaborators: &Collaborators, config: &TesseraConfig) -> Self {
        Self::new(collaborators, config.serialization.clone())
    }

    /// The codec for values owned by build logic.
    pub fn user_types_codec(&self) -> ValueCodec {
        Arc::clone(&self.user)
    }

    /// The codec for the engine's own structures.
    pub fn internal_types_codec(&self) -> ValueCodec {
        Arc::clone(&self.internal)
    }

    /// The work-graph codec for `build`.
    pub fn work_node_codec_for(&self, build: Path) -> WorkNodeCodec {
        WorkNodeCodec::new(
            build,
            Arc::clone(&self.internal),
            Arc::clone(&self.user),
            Arc::clone(&self.ordinal_groups),
        )
        .with_parallel_store(self.settings.parallel_store)
        .with_parallel_load(self.settings.parallel_load)
    }

    /// Creates a session over `services` with the configured limits.
    pub fn session(&self, services: Arc<ServiceRegistry>) -> Session {
        Session::new()
            .with_services(services)
            .with_max_bean_depth(self.settings.max_bean_depth)
            .with_strict_unsupported(self.settings.strict_unsupported)
    }

    /// The serialization settings.
    pub fn settings(&self) -> &SerializationConfig {
        &self.settings
    }
}

fn user_types(c: &Collaborators) -> Bindings {
    let beans = bean_types(Arc::clone(&c.beans), Arc::clone(&c.unsupported));
    let changing_values = changing_value_types(Arc::clone(&c.value_sources), Arc::clone(&c.flow_providers));
    let changing: ValueCodec = Arc::new(changing_values.then(&beans).build());
    unsupported_types(Arc::clone(&c.unsupported))
        .then(&base_types())
        .then(&provider_types(FixedValueReplacingProviderCodec::new(changing)))
        .then(&changing_values)
        .then(&file_types())
        .then(&attribute_types(Arc::clone(&c.attributes), Arc::clone(&c.managed_factories)))
        .then(&artifact_types())
        .then(&Bindings::of(|b| {
            b.bind::<RegisteredFlowAction, _>(RegisteredFlowActionCodec);
        }))
        .then(&beans)
}

fn internal_types(user: ValueCodec) -> Bindings {
    base_types()
        .then(&provider_types(FixedValueReplacingProviderCodec::new(Arc::clone(&user))))
        .then(&file_types())
        .then(&artifact_types())
        .then(&Bindings::of(|b| {
            b.bind::<Task, _>(TaskCodec::new(user));
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_config::load_config_from_str;
    use tessera_graph::{new_bean, BeanCell, IsolateOwner, ObjectRef, ReadContext, Value, WriteContext};
    use tessera_model::{Directory, FileFactory, Provider};
    use tessera_plan::{NodeKind, ScheduledWork};

    #[derive(Debug, Default)]
    struct Publication {
        version: Option<ObjectRef>,
        output: Option<ObjectRef>,
        signed: bool,
    }

    tessera_graph::impl_bean!(Publication, "Publication" { version, output, signed });

    fn codecs(settings: SerializationConfig) -> Codecs {
        let mut beans = BeanRegistry::new();
        beans.register::<Publication>();
        Codecs::new(&Collaborators::default().with_beans(beans), settings)
    }

    fn services() -> Arc<ServiceRegistry> {
        let services = Arc::new(ServiceRegistry::new());
        services.register(Arc::new(FileFactory::new("/work")));
        services
    }

    #[test]
    fn user_codec_covers_domain_values_inside_beans() {
        let codecs = codecs(SerializationConfig::default());
        let session = codecs.session(services());
        let owner = IsolateOwner::Project(Path::parse(":lib").unwrap());
        let publication = new_bean(Publication {
            version: Some(ObjectRef::new(Provider::fixed("String", "1.2"))),
            output: Some(ObjectRef::from_arc(FileFactory::new("/work").dir("build/pub"))),
            signed: true,
        });
        let mut w = WriteContext::new(session.clone(), owner.clone(), codecs.user_types_codec());
        w.write(&Value::Object(publication)).unwrap();
        let mut r = ReadContext::new(session.clone(), owner, codecs.user_types_codec(), w.into_bytes());
        let decoded = r.read().unwrap();
        let cell = decoded.downcast::<BeanCell<Publication>>().unwrap();
        let publication = cell.read();
        assert!(publication.signed);
        let version = publication.version.as_ref().unwrap().downcast::<Provider>().unwrap();
        assert_eq!(version.get(), Some(&Value::from("1.2")));
        let output = publication.output.as_ref().unwrap().downcast::<Directory>().unwrap();
        assert_eq!(output.path(), std::path::Path::new("/work/build/pub"));
        assert!(session.diagnostics.is_empty());
    }

    #[test]
    fn session_follows_settings() {
        let config = load_config_from_str(
            "[serialization]\nmax_bean_depth = 8\nstrict_unsupported = true\nparallel_load = false\n",
        )
        .unwrap();
        let codecs = Codecs::from_config(&Collaborators::default(), &config);
        let session = codecs.session(Arc::new(ServiceRegistry::new()));
        assert_eq!(session.max_bean_depth, 8);
        assert!(session.strict_unsupported);
        assert!(codecs.settings().parallel_store);
        assert!(!codecs.settings().parallel_load);
    }

    #[test]
    fn work_codec_writes_tasks_with_the_internal_codec() {
        let codecs = codecs(SerializationConfig::default());
        let session = codecs.session(services());
        let mut work = ScheduledWork::new();
        let task = Task::new("Jar", Path::parse(":lib").unwrap(), "jar", 11).with_state(new_bean(
            Publication {
                signed: true,
                ..Publication::default()
            },
        ));
        let id = work.add_local_task(Arc::new(task), Path::parse(":lib").ok());
        work.node_mut(id).unwrap().require();
        work.schedule(id);
        work.add_entry(id);

        let work_codec = codecs.work_node_codec_for(Path::root());
        let owner = IsolateOwner::Build(Path::root());
        let mut w = WriteContext::new(session.clone(), owner.clone(), codecs.internal_types_codec());
        work_codec.write_work(&mut w, &work).unwrap();
        let mut r = ReadContext::new(session, owner, codecs.internal_types_codec(), w.into_bytes());
        let decoded = work_codec.read_work(&mut r).unwrap();
        match decoded.node(decoded.entry_nodes()[0]).unwrap().kind() {
            NodeKind::LocalTask { task, prepare } => {
                assert_eq!(task.path().to_string(), ":lib:jar");
                let state = task.state.as_ref().unwrap();
                assert!(state.downcast_ref::<BeanCell<Publication>>().unwrap().read().signed);
                assert!(prepare.is_some());
            }
            other => panic!("unexpected {}", other.name()),
        }
    }
}
