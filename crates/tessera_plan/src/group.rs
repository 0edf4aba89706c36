//! Node groups: where a node sits in the ordinal and finalizer structure.
//!
//! Groups are shared. Every node of one ordinal holds the same
//! `Arc<NodeGroup>`, and the work-graph codec preserves that sharing.

use crate::ids::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// The scheduling group of a work node.
#[derive(Debug)]
pub enum NodeGroup {
    /// Nodes requested at one position on the command line.
    Ordinal {
        /// The command line position.
        ordinal: i32,
    },
    /// Nodes reachable from a finalizer.
    Finalizer {
        /// The finalizer node.
        node: NodeId,
        /// The group the finalizer would otherwise belong to.
        delegate: Arc<NodeGroup>,
        /// The ordinal group the finalizer belongs to, if any.
        ordinal: Option<Arc<NodeGroup>>,
    },
    /// Nodes reachable from several finalizers.
    Composite {
        /// Some member is reachable from an entry point.
        reachable_from_entry_point: bool,
        /// The ordinal group of the members.
        ordinal_group: Arc<NodeGroup>,
        /// The finalizer groups the members belong to.
        finalizer_groups: Vec<Arc<NodeGroup>>,
    },
    /// Nodes with no particular group.
    Default,
}

impl NodeGroup {
    /// Returns the shared default group.
    pub fn default_group() -> Arc<NodeGroup> {
        static DEFAULT: OnceLock<Arc<NodeGroup>> = OnceLock::new();
        Arc::clone(DEFAULT.get_or_init(|| Arc::new(NodeGroup::Default)))
    }

    /// Returns the stream discriminant: `0` ordinal, `1` finalizer, `2` composite, `3` default.
    pub fn discriminant(&self) -> i32 {
        match self {
            NodeGroup::Ordinal { .. } => 0,
            NodeGroup::Finalizer { .. } => 1,
            NodeGroup::Composite { .. } => 2,
            NodeGroup::Default => 3,
        }
    }

    /// Returns the ordinal this group is scheduled under, if any.
    pub fn ordinal(&self) -> Option<i32> {
        match self {
            NodeGroup::Ordinal { ordinal } => Some(*ordinal),
            NodeGroup::Finalizer { ordinal, delegate, .. } => ordinal
                .as_ref()
                .and_then(|group| group.ordinal())
                .or_else(|| delegate.ordinal()),
            NodeGroup::Composite { ordinal_group, .. } => ordinal_group.ordinal(),
            NodeGroup::Default => None,
        }
    }

    /// Returns `true` for a finalizer group.
    pub fn is_finalizer(&self) -> bool {
        matches!(self, NodeGroup::Finalizer { .. })
    }
}

/// Hands out one shared ordinal group per ordinal.
#[derive(Debug, Default)]
pub struct OrdinalGroupFactory {
    groups: Mutex<HashMap<i32, Arc<NodeGroup>>>,
}

impl OrdinalGroupFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the group for `ordinal`, creating it on first request.
    pub fn group(&self, ordinal: i32) -> Arc<NodeGroup> {
        Arc::clone(
            self.groups
                .lock()
                .entry(ordinal)
                .or_insert_with(|| Arc::new(NodeGroup::Ordinal { ordinal })),
        )
    }

    /// Returns the number of ordinal groups created.
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// Returns `true` if no group has been created.
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }
}
