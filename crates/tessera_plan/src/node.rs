//! Work nodes and the edges between them.

use crate::group::NodeGroup;
use crate::ids::{IdList, NodeId};
use std::fmt;
use std::sync::Arc;
use tessera_common::{InternalError, Path};
use tessera_graph::{IsolateOwner, ServiceRegistry, Value};
use tessera_model::Task;

/// The kinds of successor edge a node records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The successor must complete before this node runs.
    Dependency,
    /// If both run, the successor runs first.
    MustRunAfter,
    /// If both run, the successor preferably runs first.
    ShouldRunAfter,
    /// This node finalizes the successor and runs after it.
    Finalizing,
    /// Lifecycle bookkeeping with no ordering effect.
    Lifecycle,
}

impl EdgeKind {
    /// Every edge kind, in stream order.
    pub const ALL: [EdgeKind; 5] = [
        EdgeKind::Dependency,
        EdgeKind::MustRunAfter,
        EdgeKind::ShouldRunAfter,
        EdgeKind::Finalizing,
        EdgeKind::Lifecycle,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Returns `true` if the successor must run before the node.
    pub fn orders_execution(self) -> bool {
        matches!(
            self,
            EdgeKind::Dependency | EdgeKind::MustRunAfter | EdgeKind::Finalizing
        )
    }
}

/// Where an ordinal node sits relative to the nodes of its ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrdinalKind {
    /// Runs before the destroyers of an ordinal.
    Destroyer,
    /// Runs before the producers of an ordinal.
    Producer,
}

/// What a work node does.
#[derive(Debug)]
pub enum NodeKind {
    /// A task of this build.
    LocalTask {
        /// The configured task.
        task: Arc<Task>,
        /// The node that prepares the task, scheduled right after it.
        prepare: Option<NodeId>,
    },
    /// Resolves and prepares the inputs of a local task.
    PrepareTask {
        /// The task node being prepared.
        task: NodeId,
    },
    /// A task owned by another build in the composite.
    TaskInAnotherBuild {
        /// The other build.
        build: Path,
        /// The task path within that build.
        task: Path,
    },
    /// A scheduled action; null is a no-op.
    Action(Value),
    /// A location marker for the given ordinal.
    Ordinal {
        /// The marker kind.
        kind: OrdinalKind,
        /// The ordinal.
        ordinal: i32,
    },
}

impl NodeKind {
    /// Returns a short name for the kind.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::LocalTask { .. } => "local task",
            NodeKind::PrepareTask { .. } => "prepare task",
            NodeKind::TaskInAnotherBuild { .. } => "task in another build",
            NodeKind::Action(_) => "action",
            NodeKind::Ordinal { .. } => "ordinal",
        }
    }
}

/// A setup step of an action node, run eagerly when the plan is stored.
///
/// The nodes it returns must run after the action. The stored plan records
/// them as dependency successors of the action, so the step never runs
/// again once the plan is loaded.
pub trait PreExecutionStep: Send + Sync + fmt::Debug {
    /// Runs the step with the services visible to `owner`.
    fn run(&self, services: &ServiceRegistry, owner: &IsolateOwner) -> Result<Vec<NodeId>, InternalError>;
}

/// One schedulable unit of the execution plan.
#[derive(Debug)]
pub struct WorkNode {
    kind: NodeKind,
    owner: Option<Path>,
    required: bool,
    dependencies_processed: bool,
    successors: [IdList; 5],
    group: Arc<NodeGroup>,
    pre_execution: Option<Arc<dyn PreExecutionStep>>,
}

impl WorkNode {
    /// Creates a node owned by `owner` (a project path), or by the build when `None`.
    pub fn new(kind: NodeKind, owner: Option<Path>) -> Self {
        Self {
            kind,
            owner,
            required: false,
            dependencies_processed: false,
            successors: Default::default(),
            group: NodeGroup::default_group(),
            pre_execution: None,
        }
    }

    /// Attaches a setup step to an action node.
    pub fn with_pre_execution(mut self, step: Arc<dyn PreExecutionStep>) -> Self {
        self.pre_execution = Some(step);
        self
    }

    /// Returns the setup step of an action node.
    pub fn pre_execution(&self) -> Option<&Arc<dyn PreExecutionStep>> {
        match self.kind {
            NodeKind::Action(_) => self.pre_execution.as_ref(),
            _ => None,
        }
    }

    /// Returns what the node does.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Returns the prepare node of a local task node.
    pub fn prepare_node(&self) -> Option<NodeId> {
        match self.kind {
            NodeKind::LocalTask { prepare, .. } => prepare,
            _ => None,
        }
    }

    /// Returns the owning project, or `None` for build-owned nodes.
    pub fn owner(&self) -> Option<&Path> {
        self.owner.as_ref()
    }

    /// Returns `true` if the node will execute.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Marks the node as required.
    pub fn require(&mut self) {
        self.required = true;
    }

    /// Returns `true` once dependency discovery has run for this node.
    pub fn is_dependencies_processed(&self) -> bool {
        self.dependencies_processed
    }

    /// Records that dependency discovery has run for this node.
    pub fn dependencies_processed(&mut self) {
        self.dependencies_processed = true;
    }

    /// Returns the successors of `kind`, in insertion order.
    pub fn successors(&self, kind: EdgeKind) -> &[NodeId] {
        self.successors[kind.index()].as_slice()
    }

    /// Adds a successor of `kind`; duplicates are ignored.
    pub fn add_successor(&mut self, kind: EdgeKind, successor: NodeId) {
        self.successors[kind.index()].insert(successor);
    }

    /// Returns the node group.
    pub fn group(&self) -> &Arc<NodeGroup> {
        &self.group
    }

    /// Replaces the node group.
    pub fn set_group(&mut self, group: Arc<NodeGroup>) {
        self.group = group;
    }
}
