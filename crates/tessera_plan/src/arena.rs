//! Append-only node storage addressed by [`NodeId`].
//!
//! Ids are handed out in insertion order and never reused, so a plan with
//! `n` nodes uses exactly the ids `0..n`.

use crate::ids::NodeId;
use std::ops::{Index, IndexMut};

/// Dense storage of plan nodes.
#[derive(Debug, Clone)]
pub struct NodeArena<T> {
    slots: Vec<T>,
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> NodeArena<T> {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `item` under the next free id.
    pub fn alloc(&mut self, item: T) -> NodeId {
        let id = NodeId::from_raw(self.slots.len() as u32);
        self.slots.push(item);
        id
    }

    /// The item stored under `id`.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id.slot())
    }

    /// Mutable access to the item stored under `id`.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots.get_mut(id.slot())
    }

    /// Whether `id` was handed out by this arena.
    pub fn contains(&self, id: NodeId) -> bool {
        id.slot() < self.slots.len()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Items with their ids, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        (0u32..).map(NodeId::from_raw).zip(&self.slots)
    }
}

impl<T> Index<NodeId> for NodeArena<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        &self.slots[id.slot()]
    }
}

impl<T> IndexMut<NodeId> for NodeArena<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.slots[id.slot()]
    }
}
