//! The codec for a build's scheduled work graph.
//!
//! Wire layout:
//!
//! ```text
//! node count
//! owner keys              (is project, path)*
//! owner sub-streams       length-prefixed, one per owner key
//!                           node count | (id, kind, payload[, prepare id])*
//! shared records          (id, payload)*
//! entry node ids
//! per scheduled node      id | 5 x (successor id* | -1) | node group
//! ```
//!
//! Ids are dense over the scheduled nodes, in schedule order. A local task's
//! prepare node takes the id right after its task. Each owner's nodes are
//! written into their own sub-stream with a fresh identity table, so the
//! sub-streams can be written and read in parallel. Shared objects such as
//! value sources and build services keep one identity across owners: the
//! sub-streams only reference them, and their payloads follow as shared
//! records that are loaded before any sub-stream is decoded. Node groups are
//! written through the identity table of the main stream, which preserves
//! group sharing across owners.
//!
//! An action's pre-execution step runs while the action is written. The
//! nodes it yields are stored as extra dependency successors of the action.

use crate::paths::{read_path, write_path};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_common::Path;
use tessera_graph::{
    DecodeError, EncodeError, IsolateOwner, ObjectRef, ReadContext, TraceFrame, ValueCodec,
    WriteContext,
};
use tessera_model::Task;
use tessera_plan::{
    EdgeKind, NodeGroup, NodeId, NodeKind, OrdinalGroupFactory, OrdinalKind, ScheduledWork, WorkNode,
};

const END_OF_SUCCESSORS: i32 = -1;

const LOCAL_TASK: u8 = 0;
const TASK_IN_ANOTHER_BUILD: u8 = 1;
const ACTION: u8 = 2;
const ORDINAL: u8 = 3;

const ORDINAL_GROUP: i32 = 0;
const FINALIZER_GROUP: i32 = 1;
const COMPOSITE_GROUP: i32 = 2;
const DEFAULT_GROUP: i32 = 3;

/// Writes and reads the [`ScheduledWork`] of one build.
pub struct WorkNodeCodec {
    build: Path,
    internal: ValueCodec,
    user: ValueCodec,
    ordinal_groups: Arc<OrdinalGroupFactory>,
    parallel_store: bool,
    parallel_load: bool,
}

/// An encoded owner sub-stream and the post-execution nodes found while writing it.
struct OwnerStream {
    bytes: Vec<u8>,
    post_execution: Vec<(NodeId, Vec<NodeId>)>,
}

/// A node read from an owner sub-stream, before it is placed by id.
struct DecodedNode {
    id: i32,
    node: WorkNode,
    prepare: Option<i32>,
}

impl WorkNodeCodec {
    /// Creates a sequential codec for the work of `build`.
    ///
    /// Tasks are written with `internal`; actions with `user`.
    pub fn new(
        build: Path,
        internal: ValueCodec,
        user: ValueCodec,
        ordinal_groups: Arc<OrdinalGroupFactory>,
    ) -> Self {
        Self {
            build,
            internal,
            user,
            ordinal_groups,
            parallel_store: false,
            parallel_load: false,
        }
    }

    /// Writes owner sub-streams in parallel.
    pub fn with_parallel_store(mut self, parallel: bool) -> Self {
        self.parallel_store = parallel;
        self
    }

    /// Reads owner sub-streams in parallel.
    pub fn with_parallel_load(mut self, parallel: bool) -> Self {
        self.parallel_load = parallel;
        self
    }

    /// Returns the build whose work this codec handles.
    pub fn build(&self) -> &Path {
        &self.build
    }

    fn isolate_owner(&self, owner: Option<&Path>) -> IsolateOwner {
        match owner {
            Some(project) => IsolateOwner::Project(project.clone()),
            None => IsolateOwner::Build(self.build.clone()),
        }
    }

    // ----- write ---------------------------------------------------------

    /// Writes `work`. Only scheduled nodes and edges to required nodes are kept.
    pub fn write_work(&self, ctx: &mut WriteContext, work: &ScheduledWork) -> Result<(), EncodeError> {
        let ids = assign_ids(work)?;
        let count = work
            .scheduled()
            .iter()
            .map(|&id| 1 + usize::from(work.node(id).and_then(WorkNode::prepare_node).is_some()))
            .sum::<usize>();
        ctx.write_int(wire_count(count)?)?;

        let groups = group_by_owner(work);
        ctx.write_collection(&groups, |ctx, (owner, _)| {
            ctx.write_bool(owner.is_some())?;
            write_path(ctx, owner.as_ref().unwrap_or(&self.build))
        })?;
        let mut post_execution: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for stream in self.write_owner_streams(ctx, work, &ids, &groups)? {
            ctx.write_bytes(&stream.bytes)?;
            post_execution.extend(stream.post_execution);
        }
        ctx.write_shared_records()?;

        let entries: Vec<i32> = work
            .entry_nodes()
            .iter()
            .filter_map(|id| ids.get(id).copied())
            .collect();
        ctx.write_collection(&entries, |ctx, id| ctx.write_int(*id))?;

        for &id in work.scheduled() {
            let node = scheduled_node(work, id)?;
            ctx.write_int(ids[&id])?;
            for kind in EdgeKind::ALL {
                let recorded = node.successors(kind);
                let extra: &[NodeId] = match kind {
                    EdgeKind::Dependency => post_execution.get(&id).map(Vec::as_slice).unwrap_or(&[]),
                    _ => &[],
                };
                let extra = extra.iter().filter(|successor| !recorded.contains(*successor));
                for successor in recorded.iter().chain(extra) {
                    if !work.node(*successor).is_some_and(WorkNode::is_required) {
                        continue;
                    }
                    let successor_id = ids.get(successor).ok_or_else(|| EncodeError::Illegal {
                        what: format!("work node {id}"),
                        reason: format!("required successor {successor} is not scheduled"),
                    })?;
                    ctx.write_int(*successor_id)?;
                }
                ctx.write_int(END_OF_SUCCESSORS)?;
            }
            self.write_group(ctx, &ids, node.group())?;
        }
        Ok(())
    }

    fn write_owner_streams(
        &self,
        ctx: &WriteContext,
        work: &ScheduledWork,
        ids: &HashMap<NodeId, i32>,
        groups: &[(Option<Path>, Vec<NodeId>)],
    ) -> Result<Vec<OwnerStream>, EncodeError> {
        let forks: Vec<(WriteContext, &[NodeId])> = groups
            .iter()
            .map(|(owner, nodes)| (ctx.fork(self.isolate_owner(owner.as_ref())), nodes.as_slice()))
            .collect();
        let write = |(mut fork, nodes): (WriteContext, &[NodeId])| -> Result<OwnerStream, EncodeError> {
            let frame = TraceFrame::Owner(fork.owner().path().to_string());
            let mut post_execution = Vec::new();
            fork.with_codec(Arc::clone(&self.internal), |ctx| {
                ctx.with_trace(frame, |ctx| {
                    ctx.write_collection(nodes, |ctx, id| {
                        self.write_node(ctx, work, ids, *id, &mut post_execution)
                    })
                })
            })?;
            Ok(OwnerStream {
                bytes: fork.into_bytes(),
                post_execution,
            })
        };
        if self.parallel_store {
            tracing::debug!(build = %self.build, owners = forks.len(), "saving task graph in parallel");
            forks.into_par_iter().map(write).collect()
        } else {
            tracing::debug!(build = %self.build, owners = forks.len(), "saving task graph sequentially");
            forks.into_iter().map(write).collect()
        }
    }

    fn write_node(
        &self,
        ctx: &mut WriteContext,
        work: &ScheduledWork,
        ids: &HashMap<NodeId, i32>,
        id: NodeId,
        post_execution: &mut Vec<(NodeId, Vec<NodeId>)>,
    ) -> Result<(), EncodeError> {
        let node = scheduled_node(work, id)?;
        ctx.write_int(ids[&id])?;
        match node.kind() {
            NodeKind::LocalTask { task, prepare } => {
                ctx.write_byte(LOCAL_TASK)?;
                ctx.write_object(&ObjectRef::from_arc(Arc::clone(task)))?;
                let prepare = prepare.and_then(|p| ids.get(&p).copied()).unwrap_or(END_OF_SUCCESSORS);
                ctx.write_int(prepare)
            }
            NodeKind::TaskInAnotherBuild { build, task } => {
                ctx.write_byte(TASK_IN_ANOTHER_BUILD)?;
                write_path(ctx, build)?;
                write_path(ctx, task)
            }
            NodeKind::Action(action) => {
                ctx.write_byte(ACTION)?;
                ctx.with_codec(Arc::clone(&self.user), |ctx| ctx.write(action))?;
                if let Some(step) = node.pre_execution() {
                    let successors = step
                        .run(&ctx.session().services, ctx.owner())
                        .map_err(|e| EncodeError::Illegal {
                            what: format!("action node {id}"),
                            reason: e.message,
                        })?;
                    if !successors.is_empty() {
                        post_execution.push((id, successors));
                    }
                }
                Ok(())
            }
            NodeKind::Ordinal { kind, ordinal } => {
                ctx.write_byte(ORDINAL)?;
                ctx.write_byte(match kind {
                    OrdinalKind::Destroyer => 0,
                    OrdinalKind::Producer => 1,
                })?;
                ctx.write_int(*ordinal)
            }
            NodeKind::PrepareTask { .. } => unreachable_prepare(id),
        }
    }

    fn write_group(
        &self,
        ctx: &mut WriteContext,
        ids: &HashMap<NodeId, i32>,
        group: &Arc<NodeGroup>,
    ) -> Result<(), EncodeError> {
        let obj = ObjectRef::from_arc(Arc::clone(group));
        ctx.encode_preserving_identity(&obj, |ctx| {
            ctx.write_int(group.discriminant())?;
            match group.as_ref() {
                NodeGroup::Ordinal { ordinal } => ctx.write_int(*ordinal),
                NodeGroup::Finalizer {
                    node,
                    delegate,
                    ordinal,
                } => {
                    let id = ids.get(node).ok_or_else(|| EncodeError::Illegal {
                        what: "finalizer group".to_string(),
                        reason: format!("finalizer node {node} is not scheduled"),
                    })?;
                    ctx.write_int(*id)?;
                    self.write_group(ctx, ids, delegate)?;
                    let ordinal = ordinal.as_ref().and_then(|group| group.ordinal());
                    ctx.write_bool(ordinal.is_some())?;
                    if let Some(ordinal) = ordinal {
                        ctx.write_int(ordinal)?;
                    }
                    Ok(())
                }
                NodeGroup::Composite {
                    reachable_from_entry_point,
                    ordinal_group,
                    finalizer_groups,
                } => {
                    ctx.write_bool(*reachable_from_entry_point)?;
                    self.write_group(ctx, ids, ordinal_group)?;
                    ctx.write_collection(finalizer_groups, |ctx, group| self.write_group(ctx, ids, group))
                }
                NodeGroup::Default => Ok(()),
            }
        })
    }

    // ----- read ----------------------------------------------------------

    /// Reads a work graph written by [`write_work`](Self::write_work).
    ///
    /// Every decoded node is required and has its dependencies processed.
    pub fn read_work(&self, ctx: &mut ReadContext) -> Result<ScheduledWork, DecodeError> {
        let count = ctx.read_int()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::UnexpectedDiscriminant {
            what: "node count",
            value: i64::from(count),
        })?;

        let owners = ctx.read_collection(|ctx| {
            let is_project = ctx.read_bool()?;
            let path = read_path(ctx)?;
            Ok(is_project.then_some(path))
        })?;
        let mut forks = Vec::with_capacity(owners.len());
        for owner in &owners {
            let bytes = ctx.read_bytes()?;
            forks.push((ctx.fork(self.isolate_owner(owner.as_ref()), bytes), owner.clone()));
        }
        ctx.read_shared_records()?;
        let decoded = self.read_owner_streams(forks)?;

        let scheduled_count = decoded.len();
        let mut slots = place_nodes(decoded, count)?;

        let entries = ctx.read_collection(|ctx| read_node_id(ctx, count))?;
        let mut scheduled = Vec::with_capacity(scheduled_count);
        for _ in 0..scheduled_count {
            let id = read_node_id(ctx, count)?;
            let index = id.as_raw() as usize;
            for kind in EdgeKind::ALL {
                loop {
                    let successor = ctx.read_int()?;
                    if successor == END_OF_SUCCESSORS {
                        break;
                    }
                    let successor = node_id(successor, count)?;
                    slots[index].add_successor(kind, successor);
                }
            }
            let group = self.read_group(ctx, count)?;
            slots[index].set_group(group);
            scheduled.push(id);
        }

        for node in &mut slots {
            node.require();
            node.dependencies_processed();
        }
        ScheduledWork::from_parts(slots, scheduled, entries).map_err(|e| DecodeError::Construction {
            type_name: "ScheduledWork".to_string(),
            reason: e.message,
        })
    }

    fn read_owner_streams(
        &self,
        forks: Vec<(ReadContext, Option<Path>)>,
    ) -> Result<Vec<DecodedNode>, DecodeError> {
        let read = |(mut fork, owner): (ReadContext, Option<Path>)| {
            let frame = TraceFrame::Owner(fork.owner().path().to_string());
            fork.with_codec(Arc::clone(&self.internal), |ctx| {
                ctx.with_trace(frame, |ctx| {
                    ctx.read_collection(|ctx| self.read_node(ctx, owner.as_ref()))
                })
            })
        };
        let groups: Vec<Vec<DecodedNode>> = if self.parallel_load {
            tracing::debug!(build = %self.build, owners = forks.len(), "reading task graph in parallel");
            forks.into_par_iter().map(read).collect::<Result<_, _>>()?
        } else {
            tracing::debug!(build = %self.build, owners = forks.len(), "reading task graph sequentially");
            forks.into_iter().map(read).collect::<Result<_, _>>()?
        };
        Ok(groups.into_iter().flatten().collect())
    }

    fn read_node(&self, ctx: &mut ReadContext, owner: Option<&Path>) -> Result<DecodedNode, DecodeError> {
        let id = ctx.read_int()?;
        let mut prepare = None;
        let kind = match ctx.read_byte()? {
            LOCAL_TASK => {
                let task = ctx.read_non_null::<Task>()?;
                let prepare_id = ctx.read_int()?;
                prepare = (prepare_id != END_OF_SUCCESSORS).then_some(prepare_id);
                NodeKind::LocalTask { task, prepare: None }
            }
            TASK_IN_ANOTHER_BUILD => NodeKind::TaskInAnotherBuild {
                build: read_path(ctx)?,
                task: read_path(ctx)?,
            },
            ACTION => NodeKind::Action(ctx.with_codec(Arc::clone(&self.user), |ctx| ctx.read())?),
            ORDINAL => {
                let kind = match ctx.read_byte()? {
                    0 => OrdinalKind::Destroyer,
                    1 => OrdinalKind::Producer,
                    other => {
                        return Err(DecodeError::UnexpectedDiscriminant {
                            what: "ordinal node kind",
                            value: i64::from(other),
                        })
                    }
                };
                NodeKind::Ordinal {
                    kind,
                    ordinal: ctx.read_int()?,
                }
            }
            other => {
                return Err(DecodeError::UnexpectedDiscriminant {
                    what: "work node kind",
                    value: i64::from(other),
                })
            }
        };
        Ok(DecodedNode {
            id,
            node: WorkNode::new(kind, owner.cloned()),
            prepare,
        })
    }

    fn read_group(&self, ctx: &mut ReadContext, count: usize) -> Result<Arc<NodeGroup>, DecodeError> {
        ctx.decode_preserving_identity_of(|ctx, _| {
            let discriminant = ctx.read_int()?;
            match discriminant {
                ORDINAL_GROUP => Ok(self.ordinal_groups.group(ctx.read_int()?)),
                FINALIZER_GROUP => {
                    let node = read_node_id(ctx, count)?;
                    let delegate = self.read_group(ctx, count)?;
                    let ordinal = if ctx.read_bool()? {
                        Some(self.ordinal_groups.group(ctx.read_int()?))
                    } else {
                        None
                    };
                    Ok(Arc::new(NodeGroup::Finalizer {
                        node,
                        delegate,
                        ordinal,
                    }))
                }
                COMPOSITE_GROUP => {
                    let reachable_from_entry_point = ctx.read_bool()?;
                    let ordinal_group = self.read_group(ctx, count)?;
                    let finalizer_groups = ctx.read_collection(|ctx| self.read_group(ctx, count))?;
                    Ok(Arc::new(NodeGroup::Composite {
                        reachable_from_entry_point,
                        ordinal_group,
                        finalizer_groups,
                    }))
                }
                DEFAULT_GROUP => Ok(NodeGroup::default_group()),
                other => Err(DecodeError::UnexpectedDiscriminant {
                    what: "node group",
                    value: i64::from(other),
                }),
            }
        })
    }
}

/// Assigns dense wire ids over the scheduled nodes, prepare nodes right after their task.
fn assign_ids(work: &ScheduledWork) -> Result<HashMap<NodeId, i32>, EncodeError> {
    let mut ids = HashMap::new();
    let mut next = 0i32;
    let mut assign = |id: NodeId, ids: &mut HashMap<NodeId, i32>| {
        ids.insert(id, next);
        next += 1;
    };
    for &id in work.scheduled() {
        let node = scheduled_node(work, id)?;
        assign(id, &mut ids);
        if let Some(prepare) = node.prepare_node() {
            assign(prepare, &mut ids);
        }
    }
    Ok(ids)
}

fn scheduled_node(work: &ScheduledWork, id: NodeId) -> Result<&WorkNode, EncodeError> {
    let node = work.node(id).ok_or_else(|| EncodeError::Illegal {
        what: format!("work node {id}"),
        reason: "scheduled node does not exist".to_string(),
    })?;
    if let NodeKind::PrepareTask { .. } = node.kind() {
        return unreachable_prepare(id);
    }
    Ok(node)
}

fn unreachable_prepare<T>(id: NodeId) -> Result<T, EncodeError> {
    Err(EncodeError::Illegal {
        what: format!("work node {id}"),
        reason: "prepare nodes are scheduled through their task".to_string(),
    })
}

fn wire_count(count: usize) -> Result<i32, EncodeError> {
    i32::try_from(count).map_err(|_| EncodeError::Illegal {
        what: "work graph".to_string(),
        reason: format!("{count} nodes exceed the id range"),
    })
}

/// Splits the scheduled nodes by owner, owners in first-appearance order.
fn group_by_owner(work: &ScheduledWork) -> Vec<(Option<Path>, Vec<NodeId>)> {
    let mut index: HashMap<Option<Path>, usize> = HashMap::new();
    let mut groups: Vec<(Option<Path>, Vec<NodeId>)> = Vec::new();
    for &id in work.scheduled() {
        let owner = work.node(id).and_then(WorkNode::owner).cloned();
        let slot = *index.entry(owner.clone()).or_insert_with(|| {
            groups.push((owner, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(id);
    }
    groups
}

fn node_id(raw: i32, count: usize) -> Result<NodeId, DecodeError> {
    u32::try_from(raw)
        .ok()
        .filter(|id| (*id as usize) < count)
        .map(NodeId::from_raw)
        .ok_or(DecodeError::UnknownNode { id: raw })
}

fn read_node_id(ctx: &mut ReadContext, count: usize) -> Result<NodeId, DecodeError> {
    let raw = ctx.read_int()?;
    node_id(raw, count)
}

/// Places decoded nodes at their ids and creates the prepare nodes of local tasks.
///
/// Fails unless the ids cover `[0, count)` exactly once.
fn place_nodes(decoded: Vec<DecodedNode>, count: usize) -> Result<Vec<WorkNode>, DecodeError> {
    let prepared = decoded.iter().filter(|d| d.prepare.is_some()).count();
    if decoded.len() + prepared != count {
        return Err(DecodeError::UnexpectedDiscriminant {
            what: "node count",
            value: count as i64,
        });
    }
    let mut slots: Vec<Option<WorkNode>> = std::iter::repeat_with(|| None).take(count).collect();
    let mut place = |id: NodeId, node: WorkNode| {
        let slot = &mut slots[id.as_raw() as usize];
        if slot.is_some() {
            return Err(DecodeError::UnknownNode {
                id: id.as_raw() as i32,
            });
        }
        *slot = Some(node);
        Ok(())
    };
    for DecodedNode { id, node, prepare } in decoded {
        let id = node_id(id, count)?;
        let task = match node.kind() {
            NodeKind::LocalTask { task, .. } => Some(Arc::clone(task)),
            _ => None,
        };
        let node = match (task, prepare) {
            (Some(task), Some(prepare)) => {
                let owner = node.owner().cloned();
                let prepare = node_id(prepare, count)?;
                place(
                    prepare,
                    WorkNode::new(NodeKind::PrepareTask { task: id }, owner.clone()),
                )?;
                WorkNode::new(
                    NodeKind::LocalTask {
                        task,
                        prepare: Some(prepare),
                    },
                    owner,
                )
            }
            _ => node,
        };
        place(id, node)?;
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(id, slot)| slot.ok_or(DecodeError::UnknownNode { id: id as i32 }))
        .collect()
}
