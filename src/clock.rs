//! Merkle clock: a hash-chained, append-only event log with a Lamport
//! counter.
//!
//! Each event commits to its predecessor's hash, so altering any byte of any
//! stored event breaks [`MerkleClock::verify_chain`]. Merging a remote
//! head advances the counter past both sides and is itself logged as an
//! event, which keeps merges auditable.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::model::PeerId;

/// One entry in a clock's chain. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleClockEvent {
    pub logical_clock: u64,
    pub peer_id: PeerId,
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    pub parent_hash: Hash,
    pub hash: Hash,
}

impl MerkleClockEvent {
    /// `Digest(peer_id || data || parent_hash || logical_clock)`, with the
    /// counter as 8 big-endian bytes.
    pub fn compute_hash(peer_id: &PeerId, data: &[u8], parent_hash: &Hash, logical_clock: u64) -> Hash {
        Hash::digest(&[
            peer_id.as_str().as_bytes(),
            data,
            parent_hash.as_bytes(),
            &logical_clock.to_be_bytes(),
        ])
    }

    /// Whether the stored hash matches the event's fields.
    pub fn is_intact(&self) -> bool {
        Self::compute_hash(&self.peer_id, &self.data, &self.parent_hash, self.logical_clock)
            == self.hash
    }
}

/// What peers exchange to merge clocks: a counter and a head hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockHead {
    pub logical_clock: u64,
    pub head: Hash,
}

/// Persisted form of a clock. The owning peer id is stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub logical_clock: u64,
    pub events: Vec<MerkleClockEvent>,
}

#[derive(Debug, Clone)]
pub struct MerkleClock {
    peer_id: PeerId,
    logical_clock: u64,
    events: Vec<MerkleClockEvent>,
}

impl MerkleClock {
    /// A genesis clock: counter 0, no events.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            logical_clock: 0,
            events: Vec::new(),
        }
    }

    /// Rebuild a clock from persisted state, refusing a broken chain.
    pub fn from_snapshot(peer_id: PeerId, snapshot: ClockSnapshot) -> Result<Self> {
        let clock = Self {
            peer_id,
            logical_clock: snapshot.logical_clock,
            events: snapshot.events,
        };
        clock.verify_chain()?;
        Ok(clock)
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            logical_clock: self.logical_clock,
            events: self.events.clone(),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn logical_clock(&self) -> u64 {
        self.logical_clock
    }

    pub fn events(&self) -> &[MerkleClockEvent] {
        &self.events
    }

    /// Hash of the latest event, or [`Hash::GENESIS`] before the first.
    pub fn head(&self) -> Hash {
        self.events.last().map_or(Hash::GENESIS, |e| e.hash)
    }

    pub fn clock_head(&self) -> ClockHead {
        ClockHead {
            logical_clock: self.logical_clock,
            head: self.head(),
        }
    }

    /// Record a local event. The only way the counter moves locally.
    ///
    /// Fails with [`Error::ClockOverflow`] once the counter is at `u64::MAX`,
    /// leaving the clock unchanged.
    pub fn append(&mut self, data: impl Into<Vec<u8>>) -> Result<&MerkleClockEvent> {
        let next = self
            .logical_clock
            .checked_add(1)
            .ok_or(Error::ClockOverflow {
                local: self.logical_clock,
                remote: None,
            })?;
        self.logical_clock = next;
        Ok(self.push_event(data.into()))
    }

    /// Fold in a remote peer's head: counter becomes
    /// `max(local, remote) + 1`, and the remote head is logged as the data of
    /// a new local event.
    ///
    /// A remote counter of `u64::MAX` cannot be advanced past and is
    /// rejected; the local clock is left as it was.
    pub fn merge(&mut self, remote_logical_clock: u64, remote_head: Hash) -> Result<&MerkleClockEvent> {
        let before = self.logical_clock;
        let merged = before
            .max(remote_logical_clock)
            .checked_add(1)
            .ok_or(Error::ClockOverflow {
                local: before,
                remote: Some(remote_logical_clock),
            })?;
        self.logical_clock = merged;
        debug!(
            peer = %self.peer_id,
            local = before,
            remote = remote_logical_clock,
            merged,
            "clock merge"
        );
        Ok(self.push_event(remote_head.as_bytes().to_vec()))
    }

    fn push_event(&mut self, data: Vec<u8>) -> &MerkleClockEvent {
        let parent_hash = self.head();
        let hash = MerkleClockEvent::compute_hash(&self.peer_id, &data, &parent_hash, self.logical_clock);
        self.events.push(MerkleClockEvent {
            logical_clock: self.logical_clock,
            peer_id: self.peer_id.clone(),
            data,
            parent_hash,
            hash,
        });
        &self.events[self.events.len() - 1]
    }

    /// Recompute every hash and check the chain end to end.
    pub fn verify_chain(&self) -> Result<()> {
        let mut parent = Hash::GENESIS;
        let mut last_clock = 0u64;

        for (i, event) in self.events.iter().enumerate() {
            if event.peer_id != self.peer_id {
                return Err(Error::CorruptState(format!(
                    "event {i} belongs to peer {} (expected {})",
                    event.peer_id, self.peer_id
                )));
            }
            if event.parent_hash != parent {
                return Err(Error::CorruptState(format!(
                    "event {i} has broken chain link (expected parent {parent}, got {})",
                    event.parent_hash
                )));
            }
            if !event.is_intact() {
                return Err(Error::CorruptState(format!("event {i} has invalid hash")));
            }
            if event.logical_clock <= last_clock {
                return Err(Error::CorruptState(format!(
                    "event {i} clock {} does not advance past {last_clock}",
                    event.logical_clock
                )));
            }
            parent = event.hash;
            last_clock = event.logical_clock;
        }

        if self.logical_clock != last_clock {
            return Err(Error::CorruptState(format!(
                "clock counter {} does not match last event {last_clock}",
                self.logical_clock
            )));
        }
        Ok(())
    }
}
