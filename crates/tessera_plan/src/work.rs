//! The scheduled work graph of a build.

use crate::arena::NodeArena;
use crate::ids::{IdList, NodeId};
use crate::node::{EdgeKind, NodeKind, WorkNode};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::sync::Arc;
use tessera_common::{InternalError, Path};
use tessera_model::Task;

/// The nodes of a build's execution plan with their edges and entry points.
///
/// Node ids are dense: the nodes of a plan occupy ids `[0, len)`.
#[derive(Debug, Default)]
pub struct ScheduledWork {
    nodes: NodeArena<WorkNode>,
    scheduled: IdList,
    entry_nodes: IdList,
}

impl ScheduledWork {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a plan from nodes listed in id order.
    pub fn from_parts(
        nodes: Vec<WorkNode>,
        scheduled: Vec<NodeId>,
        entry_nodes: Vec<NodeId>,
    ) -> Result<Self, InternalError> {
        let mut work = Self::new();
        for node in nodes {
            work.nodes.alloc(node);
        }
        for &id in scheduled.iter().chain(&entry_nodes) {
            if !work.nodes.contains(id) {
                return Err(InternalError::new(format!("unknown scheduled node {id}")));
            }
        }
        work.scheduled = scheduled.into_iter().collect();
        work.entry_nodes = entry_nodes.into_iter().collect();
        Ok(work)
    }

    /// Links the local task node `task` to its prepare node.
    pub fn set_prepare_node(&mut self, task: NodeId, prepare: NodeId) -> Result<(), InternalError> {
        if !self.nodes.contains(prepare) {
            return Err(InternalError::new(format!("unknown prepare node {prepare}")));
        }
        match self.nodes.get_mut(task).map(WorkNode::kind_mut) {
            Some(NodeKind::LocalTask { prepare: slot, .. }) => {
                *slot = Some(prepare);
                Ok(())
            }
            _ => Err(InternalError::new(format!("{task} is not a local task"))),
        }
    }

    /// Adds a node without scheduling it.
    pub fn add_node(&mut self, node: WorkNode) -> NodeId {
        self.nodes.alloc(node)
    }

    /// Adds a local task node together with its prepare node.
    ///
    /// The prepare node gets the id right after the task node.
    pub fn add_local_task(&mut self, task: Arc<Task>, owner: Option<Path>) -> NodeId {
        let id = self.nodes.alloc(WorkNode::new(
            NodeKind::LocalTask {
                task,
                prepare: None,
            },
            owner.clone(),
        ));
        let prepare = self
            .nodes
            .alloc(WorkNode::new(NodeKind::PrepareTask { task: id }, owner));
        if let NodeKind::LocalTask { prepare: slot, .. } = self.nodes[id].kind_mut() {
            *slot = Some(prepare);
        }
        id
    }

    /// Appends `id` to the schedule.
    pub fn schedule(&mut self, id: NodeId) {
        self.scheduled.insert(id);
    }

    /// Returns `true` if `id` is scheduled.
    pub fn is_scheduled(&self, id: NodeId) -> bool {
        self.scheduled.contains(id)
    }

    /// Marks `id` as an entry point of the plan.
    pub fn add_entry(&mut self, id: NodeId) {
        self.entry_nodes.insert(id);
    }

    /// Records that `to` is a successor of `from` of the given kind.
    pub fn add_edge(&mut self, from: NodeId, kind: EdgeKind, to: NodeId) -> Result<(), InternalError> {
        if !self.nodes.contains(to) {
            return Err(InternalError::new(format!("edge to unknown node {to}")));
        }
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| InternalError::new(format!("edge from unknown node {from}")))?;
        node.add_successor(kind, to);
        Ok(())
    }

    /// Returns the node with `id`, if it exists.
    pub fn node(&self, id: NodeId) -> Option<&WorkNode> {
        self.nodes.get(id)
    }

    /// Returns the node with `id` mutably, if it exists.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut WorkNode> {
        self.nodes.get_mut(id)
    }

    /// Iterates over all nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &WorkNode)> {
        self.nodes.iter()
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the plan has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the scheduled nodes in schedule order.
    pub fn scheduled(&self) -> &[NodeId] {
        self.scheduled.as_slice()
    }

    /// Returns the entry points.
    pub fn entry_nodes(&self) -> &[NodeId] {
        self.entry_nodes.as_slice()
    }

    /// Returns the scheduled nodes in an order that respects every ordering edge.
    ///
    /// Only edges between scheduled nodes are considered. Fails if those
    /// edges contain a cycle.
    pub fn execution_order(&self) -> Result<Vec<NodeId>, InternalError> {
        let mut graph = DiGraph::<NodeId, EdgeKind>::new();
        let mut index = vec![None::<NodeIndex>; self.nodes.len()];
        for &id in self.scheduled() {
            index[id.as_raw() as usize] = Some(graph.add_node(id));
        }
        for &id in self.scheduled() {
            let node = &self.nodes[id];
            let Some(to) = index[id.as_raw() as usize] else {
                continue;
            };
            for kind in EdgeKind::ALL.into_iter().filter(|k| k.orders_execution()) {
                for successor in node.successors(kind) {
                    if let Some(Some(from)) = index.get(successor.as_raw() as usize) {
                        graph.add_edge(*from, to, kind);
                    }
                }
            }
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            InternalError::new(format!(
                "cycle in scheduled work at node {}",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted.into_iter().map(|ix| graph[ix]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_graph::Value;

    fn action(work: &mut ScheduledWork) -> NodeId {
        work.add_node(WorkNode::new(NodeKind::Action(Value::Null), None))
    }

    #[test]
    fn local_task_allocates_prepare_node() {
        let mut work = ScheduledWork::new();
        let task = Arc::new(Task::new("Compile", Path::parse(":app").unwrap(), "compile", 1));
        let id = work.add_local_task(task, Path::parse(":app").ok());
        let prepare = match work.node(id).unwrap().kind() {
            NodeKind::LocalTask { prepare, .. } => prepare.unwrap(),
            other => panic!("unexpected kind {}", other.name()),
        };
        assert_eq!(prepare.as_raw(), id.as_raw() + 1);
        assert!(matches!(
            work.node(prepare).unwrap().kind(),
            NodeKind::PrepareTask { task } if *task == id
        ));
        assert_eq!(work.len(), 2);
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let mut work = ScheduledWork::new();
        let a = action(&mut work);
        let b = action(&mut work);
        let c = action(&mut work);
        work.add_edge(a, EdgeKind::Dependency, b).unwrap();
        work.add_edge(b, EdgeKind::MustRunAfter, c).unwrap();
        work.add_edge(c, EdgeKind::ShouldRunAfter, a).unwrap();
        for id in [a, b, c] {
            work.schedule(id);
        }
        assert_eq!(work.execution_order().unwrap(), vec![c, b, a]);
    }

    #[test]
    fn unscheduled_successors_are_ignored() {
        let mut work = ScheduledWork::new();
        let a = action(&mut work);
        let b = action(&mut work);
        work.add_edge(a, EdgeKind::Dependency, b).unwrap();
        work.schedule(a);
        assert_eq!(work.execution_order().unwrap(), vec![a]);
    }

    #[test]
    fn cycle_is_an_internal_error() {
        let mut work = ScheduledWork::new();
        let a = action(&mut work);
        let b = action(&mut work);
        work.add_edge(a, EdgeKind::Dependency, b).unwrap();
        work.add_edge(b, EdgeKind::Finalizing, a).unwrap();
        work.schedule(a);
        work.schedule(b);
        let err = work.execution_order().unwrap_err();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn edge_to_unknown_node_is_rejected() {
        let mut work = ScheduledWork::new();
        let a = action(&mut work);
        assert!(work.add_edge(a, EdgeKind::Dependency, NodeId::from_raw(9)).is_err());
    }

    #[test]
    fn schedule_and_entries_are_deduplicated() {
        let mut work = ScheduledWork::new();
        let a = action(&mut work);
        work.schedule(a);
        work.schedule(a);
        work.add_entry(a);
        work.add_entry(a);
        assert_eq!(work.scheduled(), &[a]);
        assert_eq!(work.entry_nodes(), &[a]);
    }

    #[test]
    fn large_schedule_stays_ordered() {
        let mut work = ScheduledWork::new();
        let ids: Vec<NodeId> = (0..20_000).map(|_| action(&mut work)).collect();
        for &id in ids.iter().chain(ids.iter().rev()) {
            work.schedule(id);
            work.add_entry(id);
        }
        assert_eq!(work.scheduled(), ids.as_slice());
        assert_eq!(work.entry_nodes().len(), ids.len());
        assert!(work.is_scheduled(ids[19_999]));
    }
}
