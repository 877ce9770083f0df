//! Error types for heap operations.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HeapError {
    /// The handle's node was extracted or deleted, or the handle was issued by
    /// another heap.
    #[error("stale heap handle")]
    StaleHandle,

    /// Keys must be finite.
    #[error("non-finite priority: {0}")]
    NonFinitePriority(f64),

    /// `decrease_key` only lowers a key.
    #[error("new priority {requested} is not less than current {current}")]
    NotDecreasing { current: f64, requested: f64 },
}
