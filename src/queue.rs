//! Per-peer priority queue of pending workflows.
//!
//! Wraps [`FibonacciHeap`] with a `workflow_id -> handle` map so callers can
//! cancel or reprioritize by id. Lower priority = more urgent; equal
//! priorities pop in lexicographic `workflow_id` order.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::heap::{FibonacciHeap, Handle, HeapError};
use crate::model::WorkflowId;

#[derive(Debug, Default)]
pub struct WorkflowPriorityQueue {
    heap: FibonacciHeap<WorkflowId>,
    handles: HashMap<WorkflowId, Handle>,
}

impl WorkflowPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: &WorkflowId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn priority_of(&self, id: &WorkflowId) -> Option<f64> {
        self.handles.get(id).and_then(|h| self.heap.key(*h))
    }

    /// The most urgent workflow, without removing it.
    pub fn peek(&self) -> Option<(&WorkflowId, f64)> {
        self.heap.peek()
    }

    pub fn push(&mut self, id: WorkflowId, priority: f64) -> Result<()> {
        if self.handles.contains_key(&id) {
            return Err(Error::DuplicateWorkflow(id));
        }
        let handle = self
            .heap
            .insert(id.clone(), priority)
            .map_err(|e| heap_error(&id, e))?;
        self.handles.insert(id, handle);
        Ok(())
    }

    pub fn pop_min(&mut self) -> Option<WorkflowId> {
        let id = self.heap.extract_min()?;
        self.handles.remove(&id);
        Some(id)
    }

    /// Make a queued workflow more urgent.
    pub fn reprioritize(&mut self, id: &WorkflowId, new_priority: f64) -> Result<()> {
        let handle = *self
            .handles
            .get(id)
            .ok_or_else(|| Error::UnknownWorkflow(id.to_string()))?;
        self.heap
            .decrease_key(handle, new_priority)
            .map_err(|e| heap_error(id, e))
    }

    /// Drop a queued workflow (cancellation).
    pub fn remove(&mut self, id: &WorkflowId) -> Result<()> {
        let handle = self
            .handles
            .remove(id)
            .ok_or_else(|| Error::UnknownWorkflow(id.to_string()))?;
        let removed = self.heap.delete(handle).map_err(|e| heap_error(id, e))?;
        debug_assert_eq!(&removed, id);
        Ok(())
    }

    /// Move every entry of `other` into this queue.
    ///
    /// Fails without modifying either queue if the two share a workflow id.
    pub fn merge(&mut self, other: WorkflowPriorityQueue) -> Result<()> {
        if let Some(dup) = other.handles.keys().find(|id| self.handles.contains_key(*id)) {
            return Err(Error::DuplicateWorkflow(dup.clone()));
        }
        for (_, new) in self.heap.merge(other.heap) {
            if let Some(id) = self.heap.get(new) {
                self.handles.insert(id.clone(), new);
            }
        }
        Ok(())
    }

    /// Queued ids with their priorities, most urgent first.
    pub fn snapshot(&self) -> Vec<(WorkflowId, f64)> {
        let mut entries: Vec<(WorkflowId, f64)> = self
            .heap
            .iter()
            .map(|(_, id, key)| (id.clone(), key))
            .collect();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

fn heap_error(id: &WorkflowId, err: HeapError) -> Error {
    match err {
        HeapError::StaleHandle => Error::UnknownWorkflow(id.to_string()),
        HeapError::NonFinitePriority(requested) => Error::InvalidPriority {
            requested,
            current: None,
        },
        HeapError::NotDecreasing { current, requested } => Error::PriorityIncreaseUnsupported {
            id: id.clone(),
            current,
            requested,
        },
    }
}
