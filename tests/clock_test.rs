//! Integration tests for the Merkle clock.

use proptest::prelude::*;
use workmesh::clock::{ClockSnapshot, MerkleClock, MerkleClockEvent};
use workmesh::error::Error;
use workmesh::hash::Hash;
use workmesh::model::PeerId;

fn clock_with(events: &[&str]) -> MerkleClock {
    let mut clock = MerkleClock::new(PeerId::from("p1"));
    for data in events {
        clock.append(data.as_bytes()).unwrap();
    }
    clock
}

// ---------------------------------------------------------------------------
// Genesis and append
// ---------------------------------------------------------------------------

#[test]
fn new_clock_is_genesis() {
    let clock = MerkleClock::new(PeerId::from("p1"));
    assert_eq!(clock.logical_clock(), 0);
    assert_eq!(clock.head(), Hash::GENESIS);
    assert!(clock.events().is_empty());
    clock.verify_chain().unwrap();
}

#[test]
fn append_chains_events() {
    let mut clock = MerkleClock::new(PeerId::from("p1"));

    let first = clock.append(b"one".to_vec()).unwrap().clone();
    assert_eq!(first.logical_clock, 1);
    assert_eq!(first.parent_hash, Hash::GENESIS);
    assert_eq!(
        first.hash,
        MerkleClockEvent::compute_hash(&PeerId::from("p1"), b"one", &Hash::GENESIS, 1)
    );

    let second = clock.append(b"two".to_vec()).unwrap().clone();
    assert_eq!(second.logical_clock, 2);
    assert_eq!(second.parent_hash, first.hash);
    assert_eq!(clock.head(), second.hash);
    assert_eq!(clock.logical_clock(), 2);
    clock.verify_chain().unwrap();
}

#[test]
fn event_hash_commits_to_every_field() {
    let peer = PeerId::from("p1");
    let base = MerkleClockEvent::compute_hash(&peer, b"x", &Hash::GENESIS, 1);

    assert_ne!(
        base,
        MerkleClockEvent::compute_hash(&PeerId::from("p2"), b"x", &Hash::GENESIS, 1)
    );
    assert_ne!(base, MerkleClockEvent::compute_hash(&peer, b"y", &Hash::GENESIS, 1));
    assert_ne!(base, MerkleClockEvent::compute_hash(&peer, b"x", &base, 1));
    assert_ne!(base, MerkleClockEvent::compute_hash(&peer, b"x", &Hash::GENESIS, 2));
}

#[test]
fn same_events_give_same_head() {
    let a = clock_with(&["one", "two"]);
    let b = clock_with(&["one", "two"]);
    let c = clock_with(&["two", "one"]);
    assert_eq!(a.head(), b.head());
    assert_ne!(a.head(), c.head());
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[test]
fn merge_takes_max_plus_one() {
    let mut clock = clock_with(&["one", "two"]);
    let remote = Hash::digest(&[b"remote head".as_slice()]);

    let event = clock.merge(10, remote).unwrap().clone();

    assert_eq!(event.logical_clock, 11);
    assert_eq!(event.data, remote.as_bytes().to_vec());
    assert_eq!(clock.logical_clock(), 11);
    assert_eq!(clock.head(), event.hash);
    clock.verify_chain().unwrap();
}

#[test]
fn merge_with_older_remote_still_advances() {
    let mut clock = clock_with(&["a", "b", "c"]);
    clock.merge(1, Hash::GENESIS).unwrap();
    assert_eq!(clock.logical_clock(), 4);
    clock.verify_chain().unwrap();
}

#[test]
fn merge_with_saturated_remote_is_rejected() {
    let mut clock = clock_with(&["a", "b"]);
    let before = clock.snapshot();

    let err = clock.merge(u64::MAX, Hash::GENESIS).unwrap_err();

    assert!(matches!(
        err,
        Error::ClockOverflow {
            local: 2,
            remote: Some(u64::MAX)
        }
    ));
    assert_eq!(clock.snapshot(), before);
    clock.verify_chain().unwrap();
}

#[test]
fn append_at_counter_limit_is_rejected() {
    let mut clock = clock_with(&["a"]);
    clock.merge(u64::MAX - 1, Hash::GENESIS).unwrap();
    assert_eq!(clock.logical_clock(), u64::MAX);
    let head = clock.head();

    let err = clock.append(b"late".to_vec()).unwrap_err();

    assert!(matches!(err, Error::ClockOverflow { remote: None, .. }));
    assert_eq!(clock.logical_clock(), u64::MAX);
    assert_eq!(clock.head(), head);
    clock.verify_chain().unwrap();
}

#[test]
fn clock_head_pairs_counter_and_hash() {
    let clock = clock_with(&["a"]);
    let head = clock.clock_head();
    assert_eq!(head.logical_clock, 1);
    assert_eq!(head.head, clock.head());
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[test]
fn snapshot_restores_identical_clock() {
    let mut clock = clock_with(&["one", "two"]);
    clock.merge(7, Hash::digest(&[b"r".as_slice()])).unwrap();

    let restored = MerkleClock::from_snapshot(PeerId::from("p1"), clock.snapshot()).unwrap();

    assert_eq!(restored.head(), clock.head());
    assert_eq!(restored.logical_clock(), clock.logical_clock());
    assert_eq!(restored.events(), clock.events());
}

#[test]
fn tampered_data_is_detected() {
    let mut snapshot = clock_with(&["one", "two", "three"]).snapshot();
    snapshot.events[1].data[0] ^= 0x01;

    let err = MerkleClock::from_snapshot(PeerId::from("p1"), snapshot).unwrap_err();
    assert!(matches!(err, Error::CorruptState(_)));
}

#[test]
fn reordered_events_are_detected() {
    let mut snapshot = clock_with(&["one", "two"]).snapshot();
    snapshot.events.swap(0, 1);
    assert!(MerkleClock::from_snapshot(PeerId::from("p1"), snapshot).is_err());
}

#[test]
fn dropped_event_is_detected() {
    let mut snapshot = clock_with(&["one", "two", "three"]).snapshot();
    snapshot.events.remove(1);
    assert!(MerkleClock::from_snapshot(PeerId::from("p1"), snapshot).is_err());
}

#[test]
fn counter_mismatch_is_detected() {
    let mut snapshot = clock_with(&["one"]).snapshot();
    snapshot.logical_clock = 5;
    assert!(MerkleClock::from_snapshot(PeerId::from("p1"), snapshot).is_err());
}

#[test]
fn foreign_chain_is_detected() {
    let snapshot = clock_with(&["one"]).snapshot();
    assert!(MerkleClock::from_snapshot(PeerId::from("p2"), snapshot).is_err());
}

#[test]
fn empty_snapshot_with_nonzero_counter_is_rejected() {
    let snapshot = ClockSnapshot {
        logical_clock: 3,
        events: Vec::new(),
    };
    assert!(MerkleClock::from_snapshot(PeerId::from("p1"), snapshot).is_err());
}

proptest! {
    #[test]
    fn any_single_bit_flip_breaks_the_chain(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 1..8),
        pick in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut clock = MerkleClock::new(PeerId::from("p1"));
        for data in &payloads {
            clock.append(data.clone()).unwrap();
        }
        let mut snapshot = clock.snapshot();
        let event = &mut snapshot.events[pick.index(payloads.len())];
        let byte = pick.index(event.data.len());
        event.data[byte] ^= 1 << bit;

        prop_assert!(MerkleClock::from_snapshot(PeerId::from("p1"), snapshot).is_err());
    }
}
