//! Work node ids.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Position of a [`WorkNode`](crate::WorkNode) in its [`ScheduledWork`](crate::ScheduledWork).
///
/// The work-graph codec writes this value as the node's stream id, so the
/// nodes of a plan always occupy `0..len`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Id for the node at `index`.
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// The stream id of this node.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node ids in insertion order, without duplicates.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdList {
    order: Vec<NodeId>,
    members: HashSet<NodeId>,
}

impl IdList {
    /// Appends `id` unless present; returns whether it was added.
    pub(crate) fn insert(&mut self, id: NodeId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push(id);
        true
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub(crate) fn as_slice(&self) -> &[NodeId] {
        &self.order
    }
}

impl FromIterator<NodeId> for IdList {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        let mut list = IdList::default();
        for id in iter {
            list.insert(id);
        }
        list
    }
}
