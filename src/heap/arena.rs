//! Slot storage for heap nodes.
//!
//! Freed slots go on a free list and are reused by later inserts. Every slot
//! carries a generation that is bumped on release, which is what lets a
//! [`Handle`] detect that its node is gone. Every arena also gets a
//! process-unique id, so a handle issued by one arena never resolves in
//! another.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(0);

/// Stable reference to a node in a [`HeapArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    arena: u64,
    index: usize,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// A heap node. Links are slot indices within the same arena.
#[derive(Debug)]
pub(crate) struct Node<T> {
    pub key: f64,
    pub item: T,
    pub degree: u32,
    pub marked: bool,
    pub parent: Option<usize>,
    pub child: Option<usize>,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Owns every node of one heap.
#[derive(Debug)]
pub struct HeapArena<T> {
    id: u64,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> HeapArena<T> {
    pub fn new() -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated (live + free).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of released slots waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Map a handle to its slot index, if it was issued here and the node is
    /// still live.
    pub fn resolve(&self, handle: Handle) -> Option<usize> {
        if handle.arena != self.id {
            return None;
        }
        let slot = self.slots.get(handle.index)?;
        (slot.generation == handle.generation && slot.node.is_some()).then_some(handle.index)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.resolve(handle).map(|index| &self.node(index).item)
    }

    /// Store a fresh singleton node (its sibling links point at itself).
    pub(crate) fn alloc(&mut self, key: f64, item: T) -> Handle {
        let handle = self.insert_node(Node {
            key,
            item,
            degree: 0,
            marked: false,
            parent: None,
            child: None,
            left: 0,
            right: 0,
        });
        let node = self.node_mut(handle.index);
        node.left = handle.index;
        node.right = handle.index;
        handle
    }

    /// Store a node as-is. Links are the caller's responsibility.
    pub(crate) fn insert_node(&mut self, node: Node<T>) -> Handle {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                Handle {
                    arena: self.id,
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                Handle {
                    arena: self.id,
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Remove a live node, invalidating every handle to it.
    pub(crate) fn release(&mut self, index: usize) -> Node<T> {
        let slot = &mut self.slots[index];
        let Some(node) = slot.node.take() else {
            panic!("heap arena: release of vacant slot {index}");
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
        node
    }

    pub(crate) fn handle_of(&self, index: usize) -> Handle {
        Handle {
            arena: self.id,
            index,
            generation: self.slots[index].generation,
        }
    }

    pub(crate) fn node(&self, index: usize) -> &Node<T> {
        match &self.slots[index].node {
            Some(node) => node,
            None => panic!("heap arena: dangling index {index}"),
        }
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> &mut Node<T> {
        match &mut self.slots[index].node {
            Some(node) => node,
            None => panic!("heap arena: dangling index {index}"),
        }
    }

    /// Live nodes in slot order.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = (usize, &Node<T>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.node.as_ref().map(|node| (index, node)))
    }

    /// Consume the arena, yielding each live node with its handle.
    pub(crate) fn into_nodes(self) -> impl Iterator<Item = (Handle, Node<T>)> {
        let arena = self.id;
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(move |(index, slot)| {
                let generation = slot.generation;
                slot.node
                    .map(|node| (Handle { arena, index, generation }, node))
            })
    }
}

impl<T> Default for HeapArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
