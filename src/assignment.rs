//! Leaderless task assignment.
//!
//! Every peer evaluates the same pure function over the same
//! `(clock_head, task_hash, peers)` triple and therefore picks the same owner
//! without talking to anyone. The owner is the peer whose id digest is
//! closest, in Hamming distance, to `Digest(clock_head || task_hash)`; ties go
//! to the lexicographically smallest peer id.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::model::PeerId;

/// The point in digest space a task lands on for a given clock head.
pub fn target(clock_head: &Hash, task_hash: &Hash) -> Hash {
    Hash::digest(&[clock_head.as_bytes(), task_hash.as_bytes()])
}

/// Bits differing between a peer's id digest and `target`.
pub fn hamming_distance(peer_id: &PeerId, target: &Hash) -> u32 {
    Hash::digest(&[peer_id.as_str().as_bytes()]).hamming_distance(target)
}

/// Pick the single peer responsible for a task.
pub fn assign(clock_head: &Hash, task_hash: &Hash, peers: &BTreeSet<PeerId>) -> Result<PeerId> {
    rank_peers(clock_head, task_hash, peers)
        .into_iter()
        .next()
        .map(|(peer, _)| peer)
        .ok_or(Error::NoPeersAvailable)
}

/// Every peer with its distance, closest first.
pub fn rank_peers(clock_head: &Hash, task_hash: &Hash, peers: &BTreeSet<PeerId>) -> Vec<(PeerId, u32)> {
    let target = target(clock_head, task_hash);
    let mut ranked: Vec<(PeerId, u32)> = peers
        .iter()
        .map(|peer| (peer.clone(), hamming_distance(peer, &target)))
        .collect();
    // Stable sort over an already id-ordered set keeps the id tie-break.
    ranked.sort_by_key(|(_, distance)| *distance);
    ranked
}
