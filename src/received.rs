//! Received Packet Manager (C6).
//!
//! Tracks the receive window (`rcv_min <= rcv_nxt <= rcv_max + 1`,
//! `rcv_min - 1 <= rcv_max <= rcv_min + window - 1`), reassembles FEC
//! groups, applies the delivery policy, and synthesizes ACK headers for
//! the sent side to consume. One instance is owned per stream, like
//! [`crate::sent::SentPacketManager`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use bytes::Bytes;

use crate::error::{Result, SliqError};
use crate::stats::ReceiverStats;
use crate::types::{DeliveryMode, PktSeqNumber};
use crate::vdm_fec::FecGroupDecoder;
use crate::wire::{AckBlock, AckHeader, DataHeader, FecBlock, FecPktType, ObservedTime};

/// Packets ahead of `rcv_max` by more than this are rejected outright as
/// out-of-window rather than buffered, bounding memory use per stream.
const MAX_WINDOW_SLACK: u32 = 4096;

struct FecGroupState {
    decoder: FecGroupDecoder,
    /// Sequence number of the group's first source member, learned from
    /// any source-tagged packet of the group that has actually been
    /// observed (`seq_num - group_index`). `None` until then: repair
    /// packets carry no sequence number of their own, so a group whose
    /// every source member was lost and only repairs have arrived so far
    /// has nowhere to place a decode yet.
    base_seq: Option<PktSeqNumber>,
}

/// Per-stream receive-side state.
pub struct ReceivedPacketManager {
    window: u32,
    initialized: bool,
    rcv_min: PktSeqNumber,
    rcv_nxt: PktSeqNumber,
    rcv_max: PktSeqNumber,
    /// Every sequence number known to have arrived (directly or via FEC
    /// recovery), whether or not it has been delivered to the app yet.
    received_set: BTreeSet<PktSeqNumber>,
    /// Buffered payloads awaiting in-order delivery (ordered streams) or
    /// immediate delivery (unordered streams, drained every call).
    buffered: BTreeMap<PktSeqNumber, Bytes>,
    fec_groups: HashMap<u32, FecGroupState>,
    observed_times: VecDeque<ObservedTime>,
    recent_history: VecDeque<PktSeqNumber>,
    ack_immediate: bool,
    stats: ReceiverStats,
}

impl ReceivedPacketManager {
    pub fn new(window: u32) -> Self {
        ReceivedPacketManager {
            window: window.max(1),
            initialized: false,
            rcv_min: 0,
            rcv_nxt: 0,
            rcv_max: 0,
            received_set: BTreeSet::new(),
            buffered: BTreeMap::new(),
            fec_groups: HashMap::new(),
            observed_times: VecDeque::new(),
            recent_history: VecDeque::new(),
            ack_immediate: false,
            stats: ReceiverStats::new(),
        }
    }

    /// Aggregate receiver-side counters accumulated since construction.
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    fn init(&mut self, first_seq: PktSeqNumber) {
        self.rcv_min = first_seq;
        self.rcv_nxt = first_seq;
        self.rcv_max = first_seq.wrapping_sub(1);
        self.initialized = true;
    }

    pub fn rcv_nxt(&self) -> PktSeqNumber {
        self.rcv_nxt
    }

    pub fn rcv_max(&self) -> PktSeqNumber {
        self.rcv_max
    }

    fn in_window(&self, seq: PktSeqNumber) -> bool {
        seq >= self.rcv_min && seq.wrapping_sub(self.rcv_min) < self.window + MAX_WINDOW_SLACK
    }

    /// Ingest one DATA frame. Returns the payloads now ready for delivery
    /// to the application, in delivery order.
    ///
    /// A FEC-encoded (repair) packet carries no application payload of its
    /// own — its bytes are a Vandermonde combination of the group's
    /// sources, not something that can ever be handed to the app — so it
    /// is routed straight to the FEC decoder and never touches the receive
    /// window or sequence-number bookkeeping below.
    pub fn on_data(
        &mut self,
        header: &DataHeader,
        payload: Bytes,
        now_us: u32,
        delivery_mode: DeliveryMode,
    ) -> Result<Vec<(PktSeqNumber, Bytes)>> {
        if let Some(fec) = &header.fec {
            if matches!(fec.pkt_type, FecPktType::Encoded) {
                self.stats.packets_received += 1;
                self.stats.bytes_received += payload.len() as u64;
                let recovered = self.ingest_fec(fec, payload, None)?;
                for (seq, data) in recovered {
                    self.store_source(seq, data);
                }
                return Ok(self.drain_deliverable(delivery_mode));
            }
        }

        if !self.initialized {
            self.init(header.seq_num);
        }
        if !self.in_window(header.seq_num) {
            return Err(SliqError::OutOfWindow {
                seq: header.seq_num,
                rcv_min: self.rcv_min,
                rcv_max: self.rcv_max,
            });
        }

        // (a) a duplicate was seen: either retired below rcv_min, or still
        // within the window but already recorded as received.
        let is_late_duplicate = header.seq_num < self.rcv_min;
        let is_window_duplicate = !is_late_duplicate && self.received_set.contains(&header.seq_num);
        if is_late_duplicate || is_window_duplicate {
            self.ack_immediate = true;
            self.stats.packets_received += 1;
            self.stats.duplicates += 1;
            return Ok(Vec::new());
        }
        self.stats.packets_received += 1;
        self.stats.bytes_received += payload.len() as u64;

        // (b) a missing sequence was filled, or (c) a new out-of-order
        // packet advanced rcv_max: decide before rcv_max/received_set move.
        let fills_gap = seq_le(header.seq_num, self.rcv_max);
        let advances_out_of_order =
            seq_gt_or_eq(header.seq_num, self.rcv_max.wrapping_add(1)) && header.seq_num != self.rcv_max.wrapping_add(1);
        if fills_gap || advances_out_of_order {
            self.ack_immediate = true;
        }

        self.record_observed(header, now_us);

        if let Some(fwd) = header.move_forward_seq {
            self.advance_rcv_min(fwd);
        }

        self.store_source(header.seq_num, payload.clone());

        if let Some(fec) = &header.fec {
            let recovered = self.ingest_fec(fec, payload, Some(header.seq_num))?;
            for (seq, data) in recovered {
                self.store_source(seq, data);
            }
        }

        if seq_gt_or_eq(header.seq_num, self.rcv_max.wrapping_add(1)) {
            self.rcv_max = header.seq_num;
        }

        Ok(self.drain_deliverable(delivery_mode))
    }

    fn store_source(&mut self, seq: PktSeqNumber, payload: Bytes) {
        if self.received_set.insert(seq) {
            self.buffered.insert(seq, payload);
        }
    }

    /// Feed one FEC-tagged packet (source or repair) into its group's
    /// decoder. `src_seq_hint` is this packet's own sequence number when
    /// it's a source-tagged member (`None` for a repair packet, which
    /// carries none); the group's `base_seq` is learned from whichever
    /// source member arrives first, as `seq_num - group_index`.
    ///
    /// Returns any source payloads the group's Vandermonde decode just
    /// regenerated, tagged with the sequence they belong at. If the group
    /// completes its decode before any source member was ever observed —
    /// every source packet lost, only repairs arrived — there is no
    /// sequence number to place the recovered data at; that case is logged
    /// and the recovered payloads are dropped.
    fn ingest_fec(
        &mut self,
        fec: &FecBlock,
        payload: Bytes,
        src_seq_hint: Option<PktSeqNumber>,
    ) -> Result<Vec<(PktSeqNumber, Bytes)>> {
        let state = self.fec_groups.entry(fec.group_id).or_insert_with(|| FecGroupState {
            decoder: FecGroupDecoder::new(fec.num_src as usize, fec.encoded_length as usize),
            base_seq: None,
        });
        if let Some(seq) = src_seq_hint {
            state.base_seq = Some(seq.wrapping_sub(fec.group_index as u32));
        }
        state.decoder.insert(fec.group_index as usize, payload.to_vec());

        let mut out = Vec::new();
        if let Some(recovered) = state.decoder.try_decode()? {
            match state.base_seq {
                Some(base_seq) => {
                    for (idx, data) in recovered.into_iter().enumerate() {
                        let src_seq = base_seq.wrapping_add(idx as u32);
                        if !self.received_set.contains(&src_seq) {
                            self.stats.fec_recoveries += 1;
                        }
                        out.push((src_seq, Bytes::from(data)));
                    }
                }
                None => {
                    tracing::warn!(
                        group_id = fec.group_id,
                        "fec group decoded with no observed source packet to anchor it; dropping recovery"
                    );
                }
            }
            self.fec_groups.remove(&fec.group_id);
        }
        Ok(out)
    }

    fn advance_rcv_min(&mut self, new_min: PktSeqNumber) {
        if !seq_gt_or_eq(new_min, self.rcv_min) {
            return;
        }
        self.rcv_min = new_min;
        self.buffered.retain(|&seq, _| seq_gt_or_eq(seq, new_min));
        self.received_set.retain(|&seq| seq_gt_or_eq(seq, new_min));
        if !seq_gt_or_eq(self.rcv_nxt, new_min) {
            self.rcv_nxt = new_min;
        }
    }

    fn drain_deliverable(&mut self, delivery_mode: DeliveryMode) -> Vec<(PktSeqNumber, Bytes)> {
        let mut out = Vec::new();
        match delivery_mode {
            DeliveryMode::Ordered => {
                while let Some(payload) = self.buffered.remove(&self.rcv_nxt) {
                    out.push((self.rcv_nxt, payload));
                    self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                }
            }
            DeliveryMode::Unordered => {
                for (seq, payload) in std::mem::take(&mut self.buffered) {
                    out.push((seq, payload));
                }
                if let Some(&max_seq) = self.received_set.iter().next_back() {
                    if seq_gt_or_eq(max_seq.wrapping_add(1), self.rcv_nxt) {
                        self.rcv_nxt = max_seq.wrapping_add(1);
                    }
                }
            }
        }
        for (seq, _) in &out {
            self.recent_history.push_back(*seq);
            if self.recent_history.len() > AckHeader::ACK_HISTORY_SIZE {
                self.recent_history.pop_front();
            }
            self.stats.packets_delivered += 1;
            self.stats.highest_delivered_seq = self.stats.highest_delivered_seq.max(*seq as u64);
        }
        out
    }

    fn record_observed(&mut self, header: &DataHeader, now_us: u32) {
        self.observed_times.push_back(ObservedTime {
            seq_num: header.seq_num,
            timestamp: now_us,
        });
        if self.observed_times.len() > AckHeader::MAX_OBSERVED_TIMES {
            self.observed_times.pop_front();
        }
    }

    pub fn take_ack_immediate(&mut self) -> bool {
        std::mem::take(&mut self.ack_immediate)
    }

    /// Build the next ACK header to send, describing everything received
    /// since `rcv_nxt` up to `rcv_max`.
    pub fn build_ack(&self, observed_timestamp: u32) -> AckHeader {
        let mut ack_blocks = Vec::new();
        let mut seq = self.rcv_nxt;
        let mut gap: u16 = 0;
        let mut run_len: u16 = 0;
        let mut in_run = false;

        while seq_le(seq, self.rcv_max) && ack_blocks.len() < AckHeader::MAX_ACK_BLOCKS {
            let present = self.received_set.contains(&seq);
            if present {
                if !in_run {
                    in_run = true;
                    run_len = 0;
                }
                run_len += 1;
            } else if in_run {
                ack_blocks.push(AckBlock { gap, length: run_len });
                in_run = false;
                gap = 1;
            } else {
                gap = gap.saturating_add(1);
            }
            seq = seq.wrapping_add(1);
        }
        if in_run {
            ack_blocks.push(AckBlock { gap, length: run_len });
        }

        AckHeader {
            next_expected: self.rcv_nxt,
            largest_observed: self.rcv_max,
            observed_timestamp,
            ack_blocks,
            observed_times: self.observed_times.iter().copied().collect(),
            received_history: self.recent_history.iter().copied().collect(),
        }
    }
}

fn seq_gt_or_eq(a: PktSeqNumber, b: PktSeqNumber) -> bool {
    a.wrapping_sub(b) < (1 << 31)
}

fn seq_le(a: PktSeqNumber, b: PktSeqNumber) -> bool {
    seq_gt_or_eq(b, a)
}
