//! Sent Packet Manager (C7).
//!
//! Tracks the transmit window (`snd_fec <= snd_una <= snd_nxt <=
//! snd_fec + window`), drives retransmission for every reliability mode,
//! groups original transmissions into FEC groups and produces repair
//! packets, and reports `pif`/`bif`/pipe counts to the active congestion
//! controller. One instance is owned per stream, per spec §3 ("Stream"
//! attributes list a sent-packet manager and received-packet manager each).

use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::Bytes;

use quanta::Instant;
use std::time::Duration;

use crate::congestion::FlightCounts;
use crate::error::{Result, SliqError};
use crate::stats::SenderStats;
use crate::types::{PktSeqNumber, Reliability, ReliabilityMode, StreamId};
use crate::vdm_fec;
use crate::wire::{AckHeader, FecBlock, FecPktType};

/// Packets become eligible for fast retransmit once this many packets
/// with a higher sequence number have been observed received.
pub const FAST_REXMIT_DIST: u32 = 3;

#[derive(Debug, Clone)]
struct SentPacket {
    stream_id: StreamId,
    payload: Bytes,
    send_time: Instant,
    retransmit_count: u8,
    acked: bool,
    lost: bool,
    /// Set once the retransmit limit is exhausted: the packet is given up
    /// on but kept until `snd_una` slides past it, so move-forward NE can
    /// still reference it.
    given_up: bool,
    /// Count of higher-sequence packets known received, for fast-retransmit.
    higher_acked: u32,
    fec_group: Option<u32>,
    /// The sending stream's own configured reliability, captured at send
    /// time: streams of differing reliability can share one `cc_id`, so
    /// retransmit-limit/give-up and FEC-binding decisions must be made per
    /// packet rather than off one manager-wide setting.
    reliability: Reliability,
}

impl SentPacket {
    fn bytes_len(&self) -> u32 {
        self.payload.len() as u32
    }
}

/// One packet ready to go back out on the wire: the original sequence
/// number (reused, not reassigned), the owning stream, its payload, and
/// the bumped retransmit count to stamp on the `DATA` header.
#[derive(Debug, Clone)]
pub struct Retransmit {
    pub seq: PktSeqNumber,
    pub stream_id: StreamId,
    pub payload: Bytes,
    pub retransmit_count: u8,
}

/// A FEC group under construction: source packets accumulated so far,
/// closed once it reaches its target size or its deadline passes.
struct FecGroup {
    id: u32,
    members: Vec<PktSeqNumber>,
    payloads: Vec<Vec<u8>>,
    target_size: usize,
    opened_at: Instant,
    deadline: Option<Duration>,
    /// Reliability of the stream that opened this group; groups are never
    /// shared across streams with different FEC configuration.
    reliability: Reliability,
    /// Current round, 1 once the group has closed and produced its first
    /// batch of repair symbols (spec §3 "FEC group": "tracks ... current
    /// round, target rounds, per-round quota").
    round: u8,
    /// `target_rounds` from the owning stream's reliability (`1` for a
    /// time-bounded group, which gets exactly one repair batch).
    max_rounds: u8,
    /// Repair symbols already generated across all rounds so far, kept so
    /// the next round continues the Cauchy index sequence instead of
    /// re-deriving symbols already on the wire.
    repairs_sent: usize,
    /// When the current round's quota was computed, for the "RTT since
    /// start-of-round has elapsed" gate on preparing the next one.
    round_started_at: Instant,
    /// Source packets belonging to this group known ACKed, used as the
    /// "observed source/encoded receive counts" input to the next round's
    /// quota (spec §4, "Round progression").
    acked_members: usize,
    /// Set once `max_rounds` is exhausted or enough of the group has been
    /// delivered: the manager stops generating new rounds and (per spec
    /// §3) the stream's reliability mode falls back to plain ARQ rules.
    pure_arq: bool,
    /// Mirrors `reliability.fec_del_time_flag`: a deadline-bounded group
    /// gets one round only, never a round 2.
    latency_sensitive: bool,
    /// Set when the group was force-closed before reaching `target_size`
    /// (for example by a flushed FIN), so a short final group still gets a
    /// sensible repair quota for the packets it actually holds.
    force_end: bool,
}

/// A FEC repair symbol's lightweight tracked entry: repair packets use
/// their own sequence space (see [`SentPacketManager::repair_seq`]) since
/// the receiver never slots them into the ordered receive window, but
/// they still consume bytes on the wire and so still need a
/// `controller.on_packet_sent` accounting point.
struct RepairPacket {
    stream_id: StreamId,
    bytes: u32,
    send_time: Instant,
}

/// Per-stream send-side state.
pub struct SentPacketManager {
    window: u32,
    snd_fec: PktSeqNumber,
    snd_una: PktSeqNumber,
    snd_nxt: PktSeqNumber,
    packets: BTreeMap<PktSeqNumber, SentPacket>,
    fec_group_seq: u32,
    open_group: Option<FecGroup>,
    pif: i32,
    bif: i64,
    stats: SenderStats,
    /// Sequences marked lost (by fast-retransmit or RTO) and awaiting a
    /// retransmit attempt, oldest first.
    retransmit_queue: VecDeque<PktSeqNumber>,
    /// Smallest still-live sequence once a packet was given up on by
    /// `BEST_EFFORT`/`SEMI_RELIABLE_ARQ`'s retransmit-limit, pending
    /// attachment to the next outgoing `DATA` frame as `move_forward_seq`.
    move_forward_pending: Option<PktSeqNumber>,
    /// Repair symbols from a just-closed FEC group, one `DATA` frame each,
    /// awaiting their turn on the wire via [`Self::next_fec_repair`].
    pending_repairs: VecDeque<(FecBlock, Bytes)>,
    /// Groups that have produced at least one round of repairs but may
    /// still owe more (`round < max_rounds` and not yet `pure_arq`),
    /// keyed by group id so [`Self::on_ack`] can credit acked members to
    /// the right group and [`Self::service_fec_rounds`] can find groups
    /// whose round has timed out.
    fec_rounds: HashMap<u32, FecGroup>,
    /// Dedicated sequence space for repair packets, disjoint from
    /// `snd_fec..snd_nxt`'s source-packet space (see [`RepairPacket`]).
    repair_seq: u32,
    repair_packets: BTreeMap<u32, RepairPacket>,
}

impl SentPacketManager {
    pub fn new(window: u32, initial_seq: PktSeqNumber) -> Self {
        SentPacketManager {
            window: window.max(1),
            snd_fec: initial_seq,
            snd_una: initial_seq,
            snd_nxt: initial_seq,
            packets: BTreeMap::new(),
            fec_group_seq: 0,
            open_group: None,
            pif: 0,
            bif: 0,
            stats: SenderStats::new(),
            retransmit_queue: VecDeque::new(),
            move_forward_pending: None,
            pending_repairs: VecDeque::new(),
            fec_rounds: HashMap::new(),
            repair_seq: 0,
            repair_packets: BTreeMap::new(),
        }
    }

    /// Aggregate sender-side counters accumulated since construction.
    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn snd_nxt(&self) -> PktSeqNumber {
        self.snd_nxt
    }

    pub fn snd_una(&self) -> PktSeqNumber {
        self.snd_una
    }

    pub fn window_has_room(&self) -> bool {
        self.snd_nxt.wrapping_sub(self.snd_fec) < self.window
    }

    fn flight_counts(&self) -> FlightCounts {
        FlightCounts {
            pif: self.pif,
            bif: self.bif,
            pipe: self.packets.values().filter(|p| !p.acked && !p.lost).count() as u32,
        }
    }

    /// Record an original transmission, optionally binding it to an
    /// in-progress FEC group when the sending stream's own reliability mode
    /// uses FEC. The payload is retained so it can be replayed verbatim on
    /// retransmit.
    pub fn on_send(
        &mut self,
        stream_id: StreamId,
        reliability: Reliability,
        payload: Bytes,
        now: Instant,
    ) -> (PktSeqNumber, Option<FecBlock>) {
        let seq = self.snd_nxt;
        self.snd_nxt = self.snd_nxt.wrapping_add(1);

        let fec = if reliability.mode == ReliabilityMode::SemiReliableArqFec {
            Some(self.bind_to_fec_group(seq, &payload, &reliability, now))
        } else {
            None
        };

        let len = payload.len();
        self.packets.insert(
            seq,
            SentPacket {
                stream_id,
                payload,
                send_time: now,
                retransmit_count: 0,
                acked: false,
                lost: false,
                given_up: false,
                higher_acked: 0,
                fec_group: fec.as_ref().map(|f| f.group_id),
                reliability,
            },
        );
        self.pif += 1;
        self.bif += len as i64;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += len as u64;
        (seq, fec)
    }

    fn bind_to_fec_group(&mut self, seq: PktSeqNumber, payload: &[u8], reliability: &Reliability, now: Instant) -> FecBlock {
        let target_size = fec_group_size(reliability);
        let needs_new = match &self.open_group {
            Some(g) => g.members.len() >= g.target_size,
            None => true,
        };
        if needs_new {
            // A full group must be closed out right here, not left for a
            // later poll of `next_fec_repair`: a send burst can fill
            // several groups before the caller ever gets back around to
            // polling for repairs, and an overwritten `open_group` would
            // silently lose that group's repair symbols forever.
            if let Some(full) = self.open_group.take() {
                if let Some((repairs, group)) = self.close_group(full, now) {
                    self.pending_repairs.extend(repairs);
                    if !group.pure_arq {
                        self.fec_rounds.insert(group.id, group);
                    }
                }
            }
            self.fec_group_seq = self.fec_group_seq.wrapping_add(1);
            let max_rounds = if reliability.fec_del_time_flag {
                1
            } else {
                reliability.fec_target_pkt_del_rounds.max(1)
            };
            self.open_group = Some(FecGroup {
                id: self.fec_group_seq,
                members: Vec::new(),
                payloads: Vec::new(),
                target_size,
                opened_at: now,
                deadline: reliability
                    .fec_del_time_flag
                    .then(|| Duration::from_secs_f64(reliability.fec_target_pkt_del_time_sec)),
                reliability: reliability.clone(),
                round: 0,
                max_rounds,
                repairs_sent: 0,
                round_started_at: now,
                acked_members: 0,
                pure_arq: false,
                latency_sensitive: reliability.fec_del_time_flag,
                force_end: false,
            });
        }
        let group = self.open_group.as_mut().unwrap();
        let idx = group.members.len() as u8;
        group.members.push(seq);
        group.payloads.push(payload.to_vec());
        FecBlock {
            group_id: group.id,
            encoded_length: payload.len() as u16,
            group_index: idx,
            num_src: group.target_size as u8,
            round: 0,
            pkt_type: FecPktType::Source,
        }
    }

    /// Pad `group`'s source payloads to a common length and generate
    /// `count` more repair symbols continuing from `group.repairs_sent`,
    /// one `(FecBlock, payload)` pair per symbol, each carrying the
    /// `group_index` the receiver's decoder keys on (`k..k+r`, per
    /// [`crate::vdm_fec::FecGroupDecoder::insert`]).
    fn generate_round_repairs(group: &FecGroup, count: usize, round: u8) -> Option<Vec<(FecBlock, Bytes)>> {
        if count == 0 {
            return None;
        }
        let num_src = group.members.len();
        let max_len = group.payloads.iter().map(|p| p.len()).max().unwrap_or(0);
        let padded: Vec<Vec<u8>> = group
            .payloads
            .iter()
            .map(|p| {
                let mut v = p.clone();
                v.resize(max_len, 0);
                v
            })
            .collect();
        let refs: Vec<&[u8]> = padded.iter().map(|v| v.as_slice()).collect();
        let repairs = vdm_fec::generate_repair_range(&refs, group.repairs_sent, count).ok()?;
        let out = repairs
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let block = FecBlock {
                    group_id: group.id,
                    encoded_length: max_len as u16,
                    group_index: (num_src + group.repairs_sent + i) as u8,
                    num_src: num_src as u8,
                    round,
                    pkt_type: FecPktType::Encoded,
                };
                (block, Bytes::from(data))
            })
            .collect();
        Some(out)
    }

    /// Close `group`, producing round 1's repair quota from the
    /// target-receive-probability table (spec §4, "FEC group
    /// construction"), and return the repairs alongside the group's
    /// updated round state so the caller can retain it in `fec_rounds` for
    /// later round progression.
    fn close_group(&mut self, mut group: FecGroup, now: Instant) -> Option<(Vec<(FecBlock, Bytes)>, FecGroup)> {
        let num_src = group.members.len();
        let quota = repair_count(&group.reliability, num_src);
        self.stats.fec_repairs_sent += quota as u64;
        let symbols = Self::generate_round_repairs(&group, quota, 1)?;
        group.round = 1;
        group.round_started_at = now;
        group.repairs_sent += symbols.len();
        if group.latency_sensitive || group.round >= group.max_rounds {
            group.pure_arq = true;
        }
        Some((symbols, group))
    }

    /// Close the current FEC group if it's ready (full, or timed out for a
    /// time-bounded group) and produce its round-1 repair symbols. Most
    /// groups are already closed eagerly by [`Self::bind_to_fec_group`] the
    /// moment they fill up; this is what lets a deadline-bounded group too
    /// small to ever fill close on its own, driven by periodic timer
    /// service.
    pub fn close_fec_group(&mut self, now: Instant) -> Option<Vec<(FecBlock, Bytes)>> {
        let ready = match &self.open_group {
            Some(g) => {
                g.members.len() >= g.target_size
                    || g.deadline.map(|d| now.duration_since(g.opened_at) >= d).unwrap_or(false)
            }
            None => false,
        };
        if !ready {
            return None;
        }
        let group = self.open_group.take()?;
        let (symbols, group) = self.close_group(group, now)?;
        if !group.pure_arq {
            self.fec_rounds.insert(group.id, group);
        }
        Some(symbols)
    }

    /// Close the open FEC group right now regardless of whether it has
    /// reached `target_size`, for a force-end signal such as an app flush
    /// with FIN (spec §4, "FEC group construction": "a group is closed
    /// when any of: k source packets have been enqueued, a force-end
    /// signal arrives ..., or a send deadline ... elapses"). Any repair
    /// symbols produced are queued onto [`Self::pending_repairs`], same as
    /// an eager auto-close.
    pub fn force_close_fec_group(&mut self, now: Instant) {
        let Some(mut group) = self.open_group.take() else { return };
        if group.members.is_empty() {
            return;
        }
        group.force_end = true;
        if let Some((symbols, group)) = self.close_group(group, now) {
            self.pending_repairs.extend(symbols);
            if !group.pure_arq {
                self.fec_rounds.insert(group.id, group);
            }
        }
    }

    /// Recompute and emit the next round's repair quota for every group in
    /// `fec_rounds` whose current round has run for at least `rtt` (spec
    /// §4, "Round progression": "when all quota for the round is sent and
    /// the RTT since start-of-round has elapsed, the manager prepares the
    /// next round"). Groups that exhaust `max_rounds` or whose members are
    /// already fully acked are dropped from `fec_rounds` and fall back to
    /// plain ARQ.
    fn service_fec_rounds(&mut self, now: Instant, rtt: Duration) -> Vec<(FecBlock, Bytes)> {
        let mut out = Vec::new();
        let ready: Vec<u32> = self
            .fec_rounds
            .iter()
            .filter(|(_, g)| !g.pure_arq && now.duration_since(g.round_started_at) >= rtt)
            .map(|(&id, _)| id)
            .collect();
        for id in ready {
            let Some(mut group) = self.fec_rounds.remove(&id) else { continue };
            let remaining = group.members.len().saturating_sub(group.acked_members);
            if remaining == 0 || group.round >= group.max_rounds {
                group.pure_arq = true;
                continue;
            }
            let next_round = group.round + 1;
            let quota = repair_count(&group.reliability, remaining);
            if let Some(symbols) = Self::generate_round_repairs(&group, quota, next_round) {
                self.stats.fec_repairs_sent += symbols.len() as u64;
                group.repairs_sent += symbols.len();
                out.extend(symbols);
            }
            group.round = next_round;
            group.round_started_at = now;
            if group.round < group.max_rounds {
                self.fec_rounds.insert(id, group);
            }
        }
        out
    }

    /// Pop the next repair symbol ready to go out for `stream_id`, closing
    /// a ready FEC group (or advancing an existing group's round) to
    /// refill the queue if it's currently empty. `rtt` is the stream's
    /// current smoothed RTT, used to gate round advancement.
    ///
    /// Returns the repair's own tracked sequence number alongside the
    /// block and payload: repair packets are entered into
    /// [`Self::repair_packets`] here so the caller can run them through
    /// the same `on_packet_sent`/capacity bookkeeping as an original send.
    pub fn next_fec_repair(
        &mut self,
        stream_id: StreamId,
        now: Instant,
        rtt: Duration,
    ) -> Option<(PktSeqNumber, FecBlock, Bytes)> {
        if self.pending_repairs.is_empty() {
            let advanced = self.service_fec_rounds(now, rtt);
            self.pending_repairs.extend(advanced);
        }
        if self.pending_repairs.is_empty() {
            if let Some(items) = self.close_fec_group(now) {
                self.pending_repairs.extend(items);
            }
        }
        let (block, payload) = self.pending_repairs.pop_front()?;
        let seq = self.repair_seq;
        self.repair_seq = self.repair_seq.wrapping_add(1);
        self.repair_packets.insert(
            seq,
            RepairPacket {
                stream_id,
                bytes: payload.len() as u32,
                send_time: now,
            },
        );
        Some((seq, block, payload))
    }

    /// Drop tracked repair entries older than `rto`: repair packets are
    /// never individually acked (the receiver routes them straight to the
    /// FEC group decoder), so they age out of flight accounting on a timer
    /// instead of an ack, the same way an RTO-expired source packet would
    /// leave the flight count.
    pub fn reap_repairs(&mut self, now: Instant, rto: Duration) {
        let stale: Vec<u32> = self
            .repair_packets
            .iter()
            .filter(|(_, p)| now.duration_since(p.send_time) >= rto)
            .map(|(&seq, _)| seq)
            .collect();
        for seq in stale {
            if let Some(pkt) = self.repair_packets.remove(&seq) {
                self.pif -= 1;
                self.bif -= pkt.bytes as i64;
            }
        }
    }

    /// True once a FEC group is open and ready to close (full or timed
    /// out), for callers deciding whether to poll [`Self::close_fec_group`].
    pub fn fec_group_ready(&self, now: Instant) -> bool {
        match &self.open_group {
            Some(g) => {
                g.members.len() >= g.target_size
                    || g.deadline.map(|d| now.duration_since(g.opened_at) >= d).unwrap_or(false)
            }
            None => false,
        }
    }

    /// Process one ACK header: mark packets acked, advance `snd_una`, and
    /// return (rtt samples in microseconds, retransmit *candidates*).
    ///
    /// A candidate is not yet marked lost or queued for retransmission: per
    /// spec §4.7/§4.8, a sent packet only becomes a loss once the owning
    /// congestion controller's `OnPacketLost` returns true for it. Callers
    /// must consult the controller and call [`Self::confirm_loss`] for each
    /// candidate it approves.
    pub fn on_ack(&mut self, ack: &AckHeader, now: Instant, now_us: u32) -> (Vec<f64>, Vec<PktSeqNumber>) {
        let mut rtts = Vec::new();
        let mut candidates = Vec::new();
        let _ = now_us;

        let received: std::collections::BTreeSet<PktSeqNumber> =
            ack.received_sequences().into_iter().collect();

        // A packet is acked either because the receiver explicitly listed it
        // in an ack block (still inside the out-of-order window) or because
        // `next_expected` has moved past it: `rcv_nxt` only advances once
        // everything below it was delivered, so that's a cumulative ack for
        // packets this manager hasn't already given up on. Anything left is a
        // loss *candidate* — becoming an actual retransmission is up to the
        // congestion controller via `confirm_loss`.
        for (&seq, pkt) in self.packets.iter_mut() {
            if pkt.acked || pkt.given_up {
                continue;
            }
            if seq_lt(seq, ack.next_expected) || received.contains(&seq) {
                pkt.acked = true;
                let rtt_us = now.duration_since(pkt.send_time).as_micros() as f64;
                rtts.push(rtt_us);
                self.pif -= 1;
                self.bif -= pkt.bytes_len() as i64;
                self.stats.packets_acked += 1;
                self.stats.last_rtt_us = rtt_us as u64;
                // Feed the owning FEC group's round-quota recomputation
                // (spec §4, "observed source/encoded receive counts
                // gleaned from ACK blocks") before the packet is dropped
                // out of `self.packets` by `advance_una`.
                if let Some(group_id) = pkt.fec_group {
                    if let Some(group) = self.fec_rounds.get_mut(&group_id) {
                        group.acked_members += 1;
                    }
                }
                continue;
            }
            if pkt.lost {
                continue;
            }
            let higher = received
                .iter()
                .filter(|&&s| seq_lt(seq, s))
                .count() as u32;
            pkt.higher_acked = higher;
            if higher >= FAST_REXMIT_DIST {
                candidates.push(seq);
            }
        }

        self.advance_una();
        (rtts, candidates)
    }

    /// The payload length of a still-tracked sequence, for the caller to
    /// pass to the congestion controller's `OnPacketLost`/`OnPacketAcked`.
    pub fn packet_bytes(&self, seq: PktSeqNumber) -> Option<u32> {
        self.packets.get(&seq).map(|p| p.bytes_len())
    }

    /// A controller approved a loss candidate from [`Self::on_ack`]: mark
    /// it lost and queue it for retransmission.
    pub fn confirm_loss(&mut self, seq: PktSeqNumber) {
        if let Some(pkt) = self.packets.get_mut(&seq) {
            if !pkt.acked && !pkt.lost && !pkt.given_up {
                pkt.lost = true;
                self.retransmit_queue.push_back(seq);
            }
        }
    }

    /// Mark any unacked, not-already-lost packet whose send time is older
    /// than `rto` as lost and queue it for retransmission (the RTO-driven
    /// path of spec §4.7, independent of ACK-block fast retransmit).
    pub fn expire_rto(&mut self, now: Instant, rto: Duration) -> Vec<PktSeqNumber> {
        let mut expired = Vec::new();
        for (&seq, pkt) in self.packets.iter_mut() {
            if pkt.acked || pkt.lost || pkt.given_up {
                continue;
            }
            if now.duration_since(pkt.send_time) >= rto {
                pkt.lost = true;
                expired.push(seq);
            }
        }
        self.retransmit_queue.extend(expired.iter().copied());
        expired
    }

    fn advance_una(&mut self) {
        while let Some(pkt) = self.packets.get(&self.snd_una) {
            if pkt.acked || pkt.given_up {
                self.packets.remove(&self.snd_una);
                self.snd_una = self.snd_una.wrapping_add(1);
                self.snd_fec = self.snd_una;
            } else {
                break;
            }
        }
    }

    /// Pop the oldest lost sequence ready to go back out. Internally
    /// enforces the reliability mode's retransmit limit: a packet that
    /// has exhausted its limit is given up on (freeing the window) and
    /// the search continues to the next queued sequence.
    pub fn next_retransmit(&mut self, now: Instant) -> Option<Retransmit> {
        while let Some(seq) = self.retransmit_queue.pop_front() {
            let Some(pkt) = self.packets.get_mut(&seq) else { continue };
            if pkt.acked || pkt.given_up {
                continue;
            }
            if !pkt.lost {
                // Already retransmitted and re-lost since being queued; skip.
                continue;
            }
            let limit = match pkt.reliability.mode {
                ReliabilityMode::BestEffort => 0,
                ReliabilityMode::SemiReliableArq | ReliabilityMode::SemiReliableArqFec => {
                    pkt.reliability.rexmit_limit
                }
                ReliabilityMode::ReliableArq => u8::MAX,
            };
            let gives_move_forward = matches!(
                pkt.reliability.mode,
                ReliabilityMode::BestEffort | ReliabilityMode::SemiReliableArq
            );
            if pkt.retransmit_count >= limit {
                pkt.given_up = true;
                pkt.lost = false;
                self.pif -= 1;
                self.bif -= pkt.bytes_len() as i64;
                self.stats.packets_expired += 1;
                self.advance_una();
                if gives_move_forward {
                    self.move_forward_pending = Some(self.snd_una);
                }
                continue;
            }
            pkt.retransmit_count += 1;
            pkt.send_time = now;
            pkt.lost = false;
            self.stats.retransmissions += 1;
            return Some(Retransmit {
                seq,
                stream_id: pkt.stream_id,
                payload: pkt.payload.clone(),
                retransmit_count: pkt.retransmit_count,
            });
        }
        None
    }

    /// Consume the pending move-forward hint, if a packet was given up on
    /// since the last call.
    pub fn take_move_forward(&mut self) -> Option<PktSeqNumber> {
        self.move_forward_pending.take()
    }

    /// Mark a packet as retransmitted (new send-time, bumped counter).
    /// Returns false once the packet exceeds the reliability mode's
    /// retransmission limit, signaling the caller to give up on it.
    #[cfg(test)]
    fn on_retransmit(&mut self, seq: PktSeqNumber, now: Instant) -> Result<bool> {
        let Some(pkt) = self.packets.get_mut(&seq) else {
            return Err(SliqError::MalformedHeader("retransmit: unknown sequence"));
        };
        let limit = match pkt.reliability.mode {
            ReliabilityMode::BestEffort => 0,
            ReliabilityMode::SemiReliableArq | ReliabilityMode::SemiReliableArqFec => {
                pkt.reliability.rexmit_limit
            }
            ReliabilityMode::ReliableArq => u8::MAX,
        };
        if pkt.retransmit_count >= limit {
            self.stats.packets_expired += 1;
            return Ok(false);
        }
        pkt.retransmit_count += 1;
        pkt.send_time = now;
        pkt.lost = false;
        self.stats.retransmissions += 1;
        Ok(true)
    }

    pub fn flight(&self) -> FlightCounts {
        self.flight_counts()
    }

    /// Sequences currently marked lost and awaiting retransmission.
    pub fn lost_sequences(&self) -> Vec<PktSeqNumber> {
        self.packets
            .iter()
            .filter(|(_, p)| p.lost && !p.acked)
            .map(|(&s, _)| s)
            .collect()
    }

    pub fn outstanding_count(&self) -> usize {
        self.packets.values().filter(|p| !p.acked).count()
    }

    /// Forget everything tracked; the congestion controller's counts must
    /// be corrected by the caller via `update_counts`.
    pub fn force_lost(&mut self) -> FlightCounts {
        let counts = self.flight_counts();
        for pkt in self.packets.values_mut() {
            if !pkt.acked {
                pkt.lost = true;
            }
        }
        self.pif = 0;
        self.bif = 0;
        counts
    }
}

/// Source-group size "k" (spec §3, "k ∈ [1,10]"): orthogonal to
/// `fec_target_pkt_del_rounds`, which governs how many repair rounds the
/// group gets, not how many source packets it holds.
fn fec_group_size(reliability: &Reliability) -> usize {
    (reliability.fec_group_size.max(1) as usize).min(crate::vdm_fec::MAX_GROUP_SIZE)
}

/// How many repair symbols to generate for a round given `remaining`
/// not-yet-acked source packets in the group.
fn repair_count(reliability: &Reliability, remaining: usize) -> usize {
    if remaining == 0 {
        return 0;
    }
    let p = reliability.fec_target_pkt_recv_prob.clamp(0.95, 0.999);
    let loss_budget = ((1.0 - p) * remaining as f64).ceil() as usize;
    loss_budget.max(1)
}

fn seq_lt(a: PktSeqNumber, b: PktSeqNumber) -> bool {
    a != b && b.wrapping_sub(a) < (1 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_advances_snd_nxt_and_tracks_flight() {
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        let (seq, fec) = spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"hello"), now);
        assert_eq!(seq, 1);
        assert!(fec.is_none());
        assert_eq!(spm.snd_nxt(), 2);
        assert_eq!(spm.flight().pif, 1);
    }

    #[test]
    fn ack_retires_packet_and_advances_una() {
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"one"), now);
        spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"two"), now);
        let ack = AckHeader {
            next_expected: 3,
            largest_observed: 2,
            observed_timestamp: 0,
            ack_blocks: vec![crate::wire::AckBlock { gap: 0, length: 2 }],
            observed_times: vec![],
            received_history: vec![],
        };
        let (rtts, candidates) = spm.on_ack(&ack, now + Duration::from_millis(10), 0);
        assert_eq!(rtts.len(), 2);
        assert!(candidates.is_empty());
        assert_eq!(spm.snd_una(), 3);
        assert_eq!(spm.flight().pif, 0);
    }

    #[test]
    fn fast_retransmit_candidate_after_three_higher_acks() {
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..5 {
            spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"x"), now);
        }
        let ack = AckHeader {
            next_expected: 1,
            largest_observed: 5,
            observed_timestamp: 0,
            ack_blocks: vec![crate::wire::AckBlock { gap: 1, length: 4 }],
            observed_times: vec![],
            received_history: vec![],
        };
        let (_rtts, candidates) = spm.on_ack(&ack, now, 0);
        assert_eq!(candidates, vec![1]);
        // A candidate is not yet queued: the controller hasn't confirmed it.
        assert!(spm.next_retransmit(now).is_none());
    }

    #[test]
    fn confirmed_loss_feeds_next_retransmit() {
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..5 {
            spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"x"), now);
        }
        let ack = AckHeader {
            next_expected: 1,
            largest_observed: 5,
            observed_timestamp: 0,
            ack_blocks: vec![crate::wire::AckBlock { gap: 1, length: 4 }],
            observed_times: vec![],
            received_history: vec![],
        };
        let (_rtts, candidates) = spm.on_ack(&ack, now, 0);
        for seq in candidates {
            spm.confirm_loss(seq);
        }
        let retransmit = spm.next_retransmit(now).expect("confirmed loss should be queued");
        assert_eq!(retransmit.seq, 1);
    }

    #[test]
    fn steady_state_in_order_ack_retires_packets_with_no_ack_blocks() {
        // A receiver fully caught up with no gaps reports an empty
        // `ack_blocks` list (nothing out-of-order left to describe) — the
        // sender must still retire everything below `next_expected` via
        // cumulative ack semantics, not wait for it to show up explicitly.
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..3 {
            spm.on_send(1, Reliability::reliable_arq(), Bytes::from_static(b"x"), now);
        }
        let ack = AckHeader {
            next_expected: 4,
            largest_observed: 3,
            observed_timestamp: 0,
            ack_blocks: vec![],
            observed_times: vec![],
            received_history: vec![],
        };
        let (rtts, candidates) = spm.on_ack(&ack, now + Duration::from_millis(5), 0);
        assert_eq!(rtts.len(), 3);
        assert!(candidates.is_empty());
        assert_eq!(spm.snd_una(), 4);
        assert_eq!(spm.flight().pif, 0);
    }

    #[test]
    fn fec_group_closes_and_produces_repair() {
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.95, 2, 4);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..4 {
            spm.on_send(1, reliability, Bytes::from_static(b"payload1"), now);
        }
        let repair = spm.close_fec_group(now);
        assert!(repair.is_some());
        let symbols = repair.unwrap();
        assert!(!symbols.is_empty());
        for (i, (block, _payload)) in symbols.iter().enumerate() {
            assert_eq!(block.num_src, 4);
            assert_eq!(block.round, 1);
            assert_eq!(block.group_index as usize, 4 + i);
        }
    }

    #[test]
    fn next_fec_repair_refills_from_closed_group() {
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.95, 2, 4);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..4 {
            spm.on_send(1, reliability, Bytes::from_static(b"payload1"), now);
        }
        let (_seq, first, _payload) = spm
            .next_fec_repair(1, now, Duration::from_millis(50))
            .expect("group is ready, should produce a repair");
        assert_eq!(first.num_src, 4);
        assert_eq!(first.group_index, 4);
    }

    #[test]
    fn filled_group_auto_closes_when_burst_starts_the_next_one() {
        // target_size = group_size = 4. Sending 8 payloads back-to-back
        // (as a burst-send loop does, with no repair poll in between)
        // must not lose the first group's repairs when the 5th send
        // starts a second group before anyone calls close_fec_group.
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.95, 2, 4);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..8 {
            spm.on_send(1, reliability, Bytes::from_static(b"payload1"), now);
        }
        let (first_seq, first_block, _) = spm
            .next_fec_repair(1, now, Duration::from_millis(50))
            .expect("first group's repair should not be lost");
        assert_eq!(first_seq, 0);
        assert_eq!(first_block.num_src, 4);
        assert_eq!(first_block.group_id, 1);

        let second = spm.close_fec_group(now).expect("second group is also full and ready");
        for (block, _) in &second {
            assert_eq!(block.group_id, 2);
            assert_eq!(block.num_src, 4);
        }
    }

    #[test]
    fn repair_packets_get_their_own_sequence_space() {
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.95, 2, 4);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        // Two full groups back to back, each producing one round-1 repair.
        for _ in 0..8 {
            spm.on_send(1, reliability, Bytes::from_static(b"payload1"), now);
        }
        let (seq_a, block_a, _) = spm
            .next_fec_repair(1, now, Duration::from_millis(50))
            .expect("first group's repair");
        let (seq_b, block_b, _) = spm
            .next_fec_repair(1, now, Duration::from_millis(50))
            .expect("second group's repair");
        assert_eq!(block_a.group_id, 1);
        assert_eq!(block_b.group_id, 2);
        // Repair sequence numbers come from their own monotonic counter,
        // independent of the source packets' `snd_nxt` space.
        assert_eq!(seq_a, 0);
        assert_eq!(seq_b, 1);
    }

    #[test]
    fn round_advances_after_rtt_elapses_and_reuses_fresh_cauchy_indices() {
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.8, 3, 4);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        for _ in 0..4 {
            spm.on_send(1, reliability, Bytes::from_static(b"payload1"), now);
        }
        let (_, round1, _) = spm
            .next_fec_repair(1, now, Duration::from_millis(50))
            .expect("round 1 repair");
        assert_eq!(round1.round, 1);

        let later = now + Duration::from_millis(100);
        let (_, round2, _) = spm
            .next_fec_repair(1, later, Duration::from_millis(50))
            .expect("round 2 should produce a fresh repair once the RTT elapses");
        assert_eq!(round2.round, 2);
        // Continues the Cauchy sequence: round 2's first symbol must not
        // reuse round 1's group-index.
        assert_ne!(round2.group_index, round1.group_index);
    }

    #[test]
    fn force_close_emits_repairs_for_a_partial_group() {
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.95, 2, 4);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        // Only 2 of the target 4 source packets before the app flushes.
        spm.on_send(1, reliability, Bytes::from_static(b"payload1"), now);
        spm.on_send(1, reliability, Bytes::from_static(b"payload2"), now);
        spm.force_close_fec_group(now);
        let (_, block, _) = spm
            .next_fec_repair(1, now, Duration::from_millis(50))
            .expect("force-closed group should still produce a repair");
        assert_eq!(block.num_src, 2);
    }

    #[test]
    fn retransmit_limit_enforced_for_semi_reliable() {
        let reliability = Reliability::semi_reliable_arq(1);
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        spm.on_send(1, reliability, Bytes::from_static(b"x"), now);
        assert!(spm.on_retransmit(1, now).unwrap());
        assert!(!spm.on_retransmit(1, now).unwrap());
    }

    #[test]
    fn rto_expiration_feeds_next_retransmit() {
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        spm.on_send(7, Reliability::reliable_arq(), Bytes::from_static(b"payload"), now);
        let later = now + Duration::from_millis(500);
        let expired = spm.expire_rto(later, Duration::from_millis(200));
        assert_eq!(expired, vec![1]);

        let retransmit = spm.next_retransmit(later).unwrap();
        assert_eq!(retransmit.seq, 1);
        assert_eq!(retransmit.stream_id, 7);
        assert_eq!(retransmit.payload, Bytes::from_static(b"payload"));
        assert_eq!(retransmit.retransmit_count, 1);
        assert!(spm.next_retransmit(later).is_none());
    }

    #[test]
    fn exhausted_retransmit_limit_gives_up_and_advances_window() {
        let mut spm = SentPacketManager::new(64, 1);
        let now = Instant::now();
        spm.on_send(2, Reliability::semi_reliable_arq(1), Bytes::from_static(b"x"), now);

        let expired = spm.expire_rto(now + Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(expired, vec![1]);
        let first = spm.next_retransmit(now + Duration::from_millis(50)).unwrap();
        assert_eq!(first.retransmit_count, 1);

        let expired = spm.expire_rto(now + Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(expired, vec![1]);
        assert!(spm.next_retransmit(now + Duration::from_millis(100)).is_none());
        assert_eq!(spm.snd_una(), 2);
        assert_eq!(spm.take_move_forward(), Some(2));
        assert_eq!(spm.flight().pif, 0);
    }
}
