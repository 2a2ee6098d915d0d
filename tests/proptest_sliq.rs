//! Property-based tests for the sent/received window invariants and CC sync
//! sequence-number wrap-around, mirroring `tests/proptest_wire.rs`'s coverage
//! of the framing layer but for the stateful managers above it.

use bytes::Bytes;
use proptest::prelude::*;
use quanta::Instant;
use sliq::received::ReceivedPacketManager;
use sliq::sent::SentPacketManager;
use sliq::types::{DeliveryMode, Reliability};
use sliq::wire::{CcSync, DataFlags, DataHeader};

// ─── SentPacketManager window invariant ─────────────────────────────────────

proptest! {
    #[test]
    fn send_window_never_exceeds_configured_size(
        window in 1u32..64,
        sends in 0usize..200,
    ) {
        let mut spm = SentPacketManager::new(window, 1);
        let now = Instant::now();
        let mut sent = 0usize;
        for _ in 0..sends {
            if !spm.window_has_room() {
                prop_assert!(spm.snd_nxt().wrapping_sub(spm.snd_una()) <= window);
                continue;
            }
            spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"x"), now);
            sent += 1;
            // snd_nxt - snd_fec (== snd_una here, nothing acked) never exceeds window.
            prop_assert!(spm.snd_nxt().wrapping_sub(spm.snd_una()) <= window);
        }
        prop_assert!(sent <= sends);
    }

    /// `snd_una` never runs ahead of `snd_nxt`: every packet acked was one
    /// this manager actually assigned a sequence number to.
    #[test]
    fn snd_una_never_exceeds_snd_nxt(window in 1u32..64, sends in 1usize..32) {
        let mut spm = SentPacketManager::new(window, 1);
        let now = Instant::now();
        for _ in 0..sends {
            if spm.window_has_room() {
                spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"x"), now);
            }
        }
        prop_assert!(spm.snd_una().wrapping_sub(1) <= spm.snd_nxt().wrapping_sub(1));
    }
}

// ─── ReceivedPacketManager window invariant ─────────────────────────────────

fn data_header(seq: u32) -> DataHeader {
    DataHeader {
        flags: DataFlags::empty(),
        cc_id: 0,
        stream_id: 1,
        retransmit_count: 0,
        payload_length: 1,
        seq_num: seq,
        timestamp: 0,
        timestamp_delta: 0,
        move_forward_seq: None,
        fec: None,
        ttg: vec![],
    }
}

proptest! {
    /// Delivering packets in an arbitrary order to an `Ordered` stream
    /// always yields them back out strictly in sequence order, with no
    /// duplicates and nothing delivered twice.
    #[test]
    fn ordered_delivery_is_always_in_sequence(
        mut seqs in prop::collection::vec(0u32..64, 1..64),
    ) {
        seqs.sort_unstable();
        seqs.dedup();
        // Shuffle deterministically by reversing every other half instead of
        // using a PRNG, keeping the test free of `rand`/`Math.random`-style
        // nondeterminism while still exercising out-of-order arrival.
        let mid = seqs.len() / 2;
        seqs[..mid].reverse();

        let mut rpm = ReceivedPacketManager::new(64);
        let mut delivered = Vec::new();
        for seq in &seqs {
            let result = rpm.on_data(&data_header(*seq), Bytes::from_static(b"p"), 0, DeliveryMode::Ordered);
            if let Ok(payloads) = result {
                delivered.extend(payloads.into_iter().map(|(s, _)| s));
            }
        }
        let mut sorted = delivered.clone();
        sorted.sort_unstable();
        prop_assert_eq!(delivered, sorted);
        let unique: std::collections::BTreeSet<_> = sorted.iter().copied().collect();
        prop_assert_eq!(unique.len(), sorted.len());
    }

    /// A second `on_data` call for a sequence already delivered is always
    /// rejected as a duplicate (no payload handed back twice).
    #[test]
    fn duplicate_delivery_is_suppressed(seq in 0u32..64) {
        let mut rpm = ReceivedPacketManager::new(64);
        let first = rpm.on_data(&data_header(seq), Bytes::from_static(b"p"), 0, DeliveryMode::Ordered).unwrap();
        prop_assert_eq!(first.len(), 1);
        let second = rpm.on_data(&data_header(seq), Bytes::from_static(b"p"), 0, DeliveryMode::Ordered).unwrap();
        prop_assert!(second.is_empty());
    }
}

// ─── CC_SYNC sequence-number wrap-around ────────────────────────────────────

proptest! {
    /// `is_newer` agrees with ordinary integer ordering far from the wrap
    /// point, and correctly treats a small value as newer than one close to
    /// `u16::MAX` once the gap is within half the sequence space.
    #[test]
    fn cc_sync_is_newer_matches_unwrapped_order_away_from_wrap(
        old in 0u16..30000,
        delta in 1u16..1000,
    ) {
        let new = old + delta;
        prop_assert!(CcSync::is_newer(new, old));
        prop_assert!(!CcSync::is_newer(old, new));
    }

    #[test]
    fn cc_sync_is_newer_wraps_correctly(old in (u16::MAX - 500)..=u16::MAX, delta in 1u16..500) {
        let new = old.wrapping_add(delta);
        prop_assert!(CcSync::is_newer(new, old));
        prop_assert!(!CcSync::is_newer(old, new));
    }

    #[test]
    fn cc_sync_is_newer_irreflexive(seq in any::<u16>()) {
        prop_assert!(!CcSync::is_newer(seq, seq));
    }
}
