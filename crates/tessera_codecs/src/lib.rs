//! Domain codecs and the work-graph codec.
//!
//! The generic engine in `tessera_graph` knows scalars, collections and
//! beans. This crate adds the build-domain layers on top of it:
//!
//! - [`provider`]: providers, properties, value sources, build services and
//!   flow providers.
//! - [`file`]: directories, regular files, pattern sets and file collections.
//! - [`artifact`]: resolved artifacts and artifact collections.
//! - [`attribute`]: immutable and mutable attribute sets.
//! - [`task`]: configured tasks with their registered properties.
//! - [`work`]: the scheduled work graph.
//!
//! [`Codecs`] composes these layers into the user and internal codecs of a
//! build and hands out [`WorkNodeCodec`]s.

#![warn(missing_docs)]

pub mod artifact;
pub mod attribute;
pub mod codecs;
pub mod file;
mod paths;
pub mod provider;
pub mod task;
pub mod work;

pub use codecs::{Codecs, Collaborators};
pub use task::TaskCodec;
pub use work::WorkNodeCodec;
