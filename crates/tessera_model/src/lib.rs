//! Build-domain values stored in the configuration cache.
//!
//! These are the values the domain codecs know how to write: providers and
//! properties, file locations and collections, resolved artifacts, variant
//! attributes, and configured tasks. Each family comes with the collaborator
//! that recreates its values on load ([`ValueSourceProviderFactory`],
//! [`BuildServiceRegistry`], [`FileCollectionFactory`], [`AttributesFactory`],
//! [`ManagedFactoryRegistry`], ...). Collaborators are registered in the
//! session's service registry, scoped to the isolate owner that uses them.

#![warn(missing_docs)]

pub mod artifact;
pub mod attribute;
pub mod error;
pub mod file;
pub mod provider;
pub mod service;
pub mod task;

pub use artifact::{ArtifactCollection, ComponentArtifactId, ResolvableArtifact};
pub use attribute::{
    Attribute, AttributeContainer, AttributeValue, AttributesFactory, ImmutableAttributes,
    ManagedFactory, ManagedFactoryRegistry, ManagedValue, NamedFactory,
};
pub use error::ModelError;
pub use file::{
    Directory, FileCollection, FileCollectionElement, FileCollectionFactory, FileFactory,
    PatternSet, RegularFile,
};
pub use provider::{ExecutionTimeValue, Property, PropertyKind, PropertyState, Provider};
pub use service::{
    BuildServiceProvider, BuildServiceRegistry, BuildWorkResultProvider, FlowProviders,
    RegisteredFlowAction, ValueSourceProvider, ValueSourceProviderFactory,
};
pub use task::{FilePropertyType, RegisteredProperty, RegisteredPropertyKind, Task};
