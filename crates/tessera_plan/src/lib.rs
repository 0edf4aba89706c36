//! The execution plan persisted by the configuration cache.
//!
//! A [`ScheduledWork`] holds [`WorkNode`]s in a dense arena so that node ids
//! form the range `[0, n)`. Nodes record successors for five edge kinds and
//! belong to a shared [`NodeGroup`]. The plan is built by the scheduler, and
//! rebuilt from a cache entry by the work-graph codec.

#![warn(missing_docs)]

pub mod arena;
pub mod group;
pub mod ids;
pub mod node;
pub mod work;

pub use arena::NodeArena;
pub use group::{NodeGroup, OrdinalGroupFactory};
pub use ids::NodeId;
pub use node::{EdgeKind, NodeKind, OrdinalKind, PreExecutionStep, WorkNode};
pub use work::ScheduledWork;
