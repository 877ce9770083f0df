//! Fibonacci heap over an index arena.
//!
//! Nodes live in a [`HeapArena`]; parent, child, and sibling links are slot
//! indices rather than pointers. Callers hold generation-checked [`Handle`]s,
//! so a handle to a node that has since been extracted is rejected instead of
//! aliasing whatever reused its slot.

mod arena;
mod error;
mod fibonacci;

pub use arena::{Handle, HeapArena};
pub use error::HeapError;
pub use fibonacci::FibonacciHeap;
