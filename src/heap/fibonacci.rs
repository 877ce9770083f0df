//! Min-oriented Fibonacci heap.
//!
//! Insert, merge, and decrease-key are O(1) amortized; extract-min is
//! O(log n) amortized. Extraction is where the work happens: the minimum's
//! children join the root list, then roots of equal degree are linked until
//! every root degree is distinct.
//!
//! Entries are ordered by `(key, item)`: keys compare with `f64::total_cmp`,
//! and equal keys fall back to the item's `Ord`.

use std::cmp::Ordering;

use super::arena::{Handle, HeapArena};
use super::error::HeapError;

#[derive(Debug)]
pub struct FibonacciHeap<T> {
    arena: HeapArena<T>,
    min: Option<usize>,
}

impl<T> FibonacciHeap<T> {
    pub fn new() -> Self {
        Self {
            arena: HeapArena::new(),
            min: None,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// The backing arena (slot accounting only).
    pub fn arena(&self) -> &HeapArena<T> {
        &self.arena
    }

    /// The minimum item, without removing it.
    pub fn find_min(&self) -> Option<&T> {
        self.min.map(|index| &self.arena.node(index).item)
    }

    /// The minimum item and its key.
    pub fn peek(&self) -> Option<(&T, f64)> {
        self.min.map(|index| {
            let node = self.arena.node(index);
            (&node.item, node.key)
        })
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.arena.get(handle)
    }

    pub fn key(&self, handle: Handle) -> Option<f64> {
        self.arena
            .resolve(handle)
            .map(|index| self.arena.node(index).key)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.arena.resolve(handle).is_some()
    }

    /// Live entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T, f64)> {
        self.arena
            .nodes()
            .map(|(index, node)| (self.arena.handle_of(index), &node.item, node.key))
    }

    // -- circular list plumbing ---------------------------------------------

    /// Insert `x` immediately to the right of `at`.
    fn insert_after(&mut self, at: usize, x: usize) {
        let right = self.arena.node(at).right;
        {
            let node = self.arena.node_mut(x);
            node.left = at;
            node.right = right;
        }
        self.arena.node_mut(at).right = x;
        self.arena.node_mut(right).left = x;
    }

    /// Detach `x` from its sibling list, leaving it a singleton.
    fn unlink(&mut self, x: usize) {
        let (left, right) = {
            let node = self.arena.node(x);
            (node.left, node.right)
        };
        self.arena.node_mut(left).right = right;
        self.arena.node_mut(right).left = left;
        let node = self.arena.node_mut(x);
        node.left = x;
        node.right = x;
    }

    /// Join the circular lists containing `a` and `b`.
    fn splice(&mut self, a: usize, b: usize) {
        let a_right = self.arena.node(a).right;
        let b_left = self.arena.node(b).left;
        self.arena.node_mut(a).right = b;
        self.arena.node_mut(b).left = a;
        self.arena.node_mut(b_left).right = a_right;
        self.arena.node_mut(a_right).left = b_left;
    }

    /// Every node of the circular list containing `start`, beginning there.
    fn siblings(&self, start: usize) -> Vec<usize> {
        let mut out = vec![start];
        let mut cursor = self.arena.node(start).right;
        while cursor != start {
            out.push(cursor);
            cursor = self.arena.node(cursor).right;
        }
        out
    }
}

impl<T: Ord> FibonacciHeap<T> {
    /// Add an item to the root list. O(1).
    pub fn insert(&mut self, item: T, key: f64) -> Result<Handle, HeapError> {
        if !key.is_finite() {
            return Err(HeapError::NonFinitePriority(key));
        }
        let handle = self.arena.alloc(key, item);
        self.add_root(handle.index());
        Ok(handle)
    }

    /// Lower an entry's key. O(1) amortized.
    ///
    /// Raising a key is not supported; delete and reinsert instead.
    pub fn decrease_key(&mut self, handle: Handle, new_key: f64) -> Result<(), HeapError> {
        let index = self.arena.resolve(handle).ok_or(HeapError::StaleHandle)?;
        if !new_key.is_finite() {
            return Err(HeapError::NonFinitePriority(new_key));
        }
        let current = self.arena.node(index).key;
        if new_key >= current {
            return Err(HeapError::NotDecreasing {
                current,
                requested: new_key,
            });
        }
        self.lower_key(index, new_key);
        Ok(())
    }

    /// Remove and return the minimum item. O(log n) amortized.
    pub fn extract_min(&mut self) -> Option<T> {
        self.extract_min_entry().map(|(item, _)| item)
    }

    /// Remove and return the minimum item with its key.
    pub fn extract_min_entry(&mut self) -> Option<(T, f64)> {
        let z = self.min?;

        if let Some(child) = self.arena.node(z).child {
            for c in self.siblings(child) {
                {
                    let node = self.arena.node_mut(c);
                    node.parent = None;
                    node.marked = false;
                    node.left = c;
                    node.right = c;
                }
                self.insert_after(z, c);
            }
            let node = self.arena.node_mut(z);
            node.child = None;
            node.degree = 0;
        }

        let next = self.arena.node(z).right;
        self.unlink(z);
        if next == z {
            self.min = None;
        } else {
            self.min = Some(next);
            self.consolidate(next);
        }

        let node = self.arena.release(z);
        Some((node.item, node.key))
    }

    /// Remove an arbitrary entry: lower it to −∞, then extract the minimum.
    pub fn delete(&mut self, handle: Handle) -> Result<T, HeapError> {
        let index = self.arena.resolve(handle).ok_or(HeapError::StaleHandle)?;
        self.lower_key(index, f64::NEG_INFINITY);
        debug_assert_eq!(self.min, Some(index));
        self.extract_min().ok_or(HeapError::StaleHandle)
    }

    /// Absorb `other` and splice its root list into ours.
    ///
    /// Slot indices are per-arena, so every live node of `other` moves into
    /// this arena; the returned pairs map each old handle to its new one.
    pub fn merge(&mut self, other: FibonacciHeap<T>) -> Vec<(Handle, Handle)> {
        let other_min = other.min;
        let moved: Vec<(Handle, Handle)> = other
            .arena
            .into_nodes()
            .map(|(old, node)| (old, self.arena.insert_node(node)))
            .collect();

        let remap: std::collections::HashMap<usize, usize> = moved
            .iter()
            .map(|(old, new)| (old.index(), new.index()))
            .collect();

        for (_, new) in &moved {
            let node = self.arena.node_mut(new.index());
            node.left = remap[&node.left];
            node.right = remap[&node.right];
            node.parent = node.parent.map(|p| remap[&p]);
            node.child = node.child.map(|c| remap[&c]);
        }

        if let Some(other_min) = other_min.map(|m| remap[&m]) {
            match self.min {
                None => self.min = Some(other_min),
                Some(min) => {
                    self.splice(min, other_min);
                    if self.precedes(other_min, min) {
                        self.min = Some(other_min);
                    }
                }
            }
        }

        moved
    }

    // -- internals ----------------------------------------------------------

    fn precedes(&self, a: usize, b: usize) -> bool {
        let (na, nb) = (self.arena.node(a), self.arena.node(b));
        match na.key.total_cmp(&nb.key) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => na.item < nb.item,
        }
    }

    fn add_root(&mut self, x: usize) {
        self.arena.node_mut(x).parent = None;
        match self.min {
            None => {
                let node = self.arena.node_mut(x);
                node.left = x;
                node.right = x;
                self.min = Some(x);
            }
            Some(min) => {
                self.insert_after(min, x);
                if self.precedes(x, min) {
                    self.min = Some(x);
                }
            }
        }
    }

    fn lower_key(&mut self, x: usize, key: f64) {
        self.arena.node_mut(x).key = key;
        if let Some(parent) = self.arena.node(x).parent
            && self.precedes(x, parent)
        {
            self.cut(x, parent);
            self.cascading_cut(parent);
        }
        if let Some(min) = self.min
            && self.precedes(x, min)
        {
            self.min = Some(x);
        }
    }

    /// Move `x` from `parent`'s child list to the root list.
    fn cut(&mut self, x: usize, parent: usize) {
        let right = self.arena.node(x).right;
        {
            let p = self.arena.node_mut(parent);
            if p.child == Some(x) {
                p.child = (right != x).then_some(right);
            }
            p.degree -= 1;
        }
        self.unlink(x);
        self.arena.node_mut(x).marked = false;
        self.add_root(x);
    }

    /// A non-root that loses a second child is cut as well, up the tree.
    fn cascading_cut(&mut self, mut y: usize) {
        while let Some(parent) = self.arena.node(y).parent {
            if !self.arena.node(y).marked {
                self.arena.node_mut(y).marked = true;
                return;
            }
            self.cut(y, parent);
            y = parent;
        }
    }

    /// Make root `y` a child of root `x`.
    fn link(&mut self, y: usize, x: usize) {
        self.unlink(y);
        {
            let node = self.arena.node_mut(y);
            node.parent = Some(x);
            node.marked = false;
        }
        match self.arena.node(x).child {
            None => self.arena.node_mut(x).child = Some(y),
            Some(child) => self.insert_after(child, y),
        }
        self.arena.node_mut(x).degree += 1;
    }

    /// Link equal-degree roots until all root degrees are distinct, then
    /// rebuild the root list and find the new minimum.
    fn consolidate(&mut self, start: usize) {
        let mut buckets: Vec<Option<usize>> = Vec::new();

        for root in self.siblings(start) {
            let mut x = root;
            let mut degree = self.arena.node(x).degree as usize;
            loop {
                if buckets.len() <= degree {
                    buckets.resize(degree + 1, None);
                }
                match buckets[degree].take() {
                    None => {
                        buckets[degree] = Some(x);
                        break;
                    }
                    Some(mut y) => {
                        if self.precedes(y, x) {
                            std::mem::swap(&mut x, &mut y);
                        }
                        self.link(y, x);
                        degree += 1;
                    }
                }
            }
        }

        self.min = None;
        for root in buckets.into_iter().flatten() {
            let node = self.arena.node_mut(root);
            node.left = root;
            node.right = root;
            self.add_root(root);
        }
    }
}

impl<T> Default for FibonacciHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}
