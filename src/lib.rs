//! # workmesh
//!
//! Leaderless workflow scheduling for a mesh of cooperating peers.
//!
//! Each peer runs one [`coordinator::WorkflowCoordinator`]: a hash-chained
//! Merkle clock, a Fibonacci-heap priority queue of pending work, and the
//! known peer set. Owners are chosen by Hamming distance between peer and
//! task digests, so every peer with the same clock head and peer set reaches
//! the same decision without coordination.

pub mod assignment;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod hash;
pub mod heap;
pub mod model;
pub mod queue;
pub mod telemetry;
