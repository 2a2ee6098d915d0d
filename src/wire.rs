//! # Wire Framer
//!
//! Pure codec over a byte buffer: encode/decode for every SLIQ frame variant.
//! Every frame begins with a single-byte type discriminator; integer fields
//! are network byte order. The DATA and ACK layouts are bit-exact per the
//! external-interfaces section of the design; other control frames carry
//! only the fields the design calls for (handshake timestamps and algorithm
//! lists, stream ids, CC sync blobs).
//!
//! `VarInt` (62-bit, QUIC `RFC 9000 §16`-style) is retained for internal
//! variable-width fields; the DATA/ACK fields the design pins to fixed
//! widths are encoded at those exact widths, not as VarInts.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::SliqError;
use crate::types::{
    CcId, DeliveryMode, PktSeqNumber, PktTimestamp, Reliability, ReliabilityMode, StreamId,
};

// ─── VarInt ──────────────────────────────────────────────────────────────────

/// A QUIC-style variable-length integer (62 usable bits, RFC 9000 §16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: u64 = (1 << 62) - 1;

    pub fn new(v: u64) -> Option<Self> {
        if v <= Self::MAX {
            Some(VarInt(v))
        } else {
            None
        }
    }

    pub fn from_u64(v: u64) -> Self {
        VarInt(v & Self::MAX)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn encoded_len(self) -> usize {
        match self.0 {
            v if v < (1 << 6) => 1,
            v if v < (1 << 14) => 2,
            v if v < (1 << 30) => 4,
            _ => 8,
        }
    }

    pub fn encode(self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        match len {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(self.0 as u16 | 0x4000),
            4 => buf.put_u32(self.0 as u32 | 0x8000_0000),
            8 => buf.put_u64(self.0 | 0xC000_0000_0000_0000),
            _ => unreachable!(),
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if !buf.has_remaining() {
            return Err(SliqError::MalformedHeader("varint: empty buffer"));
        }
        let first = buf.chunk()[0];
        let tag = first >> 6;
        let len = 1usize << tag;
        if buf.remaining() < len {
            return Err(SliqError::MalformedHeader("varint: truncated"));
        }
        let value = match len {
            1 => (buf.get_u8() & 0x3F) as u64,
            2 => (buf.get_u16() & 0x3FFF) as u64,
            4 => (buf.get_u32() & 0x3FFF_FFFF) as u64,
            8 => buf.get_u64() & 0x3FFF_FFFF_FFFF_FFFF,
            _ => unreachable!(),
        };
        Ok(VarInt(value))
    }
}

impl From<u8> for VarInt {
    fn from(v: u8) -> Self {
        VarInt(v as u64)
    }
}
impl From<u16> for VarInt {
    fn from(v: u16) -> Self {
        VarInt(v as u64)
    }
}
impl From<u32> for VarInt {
    fn from(v: u32) -> Self {
        VarInt(v as u64)
    }
}

// ─── Minimal hand-rolled bitflags ───────────────────────────────────────────
//
// Five single-bit DATA flags don't justify pulling in the `bitflags` crate.

macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self { $name(0) }
            pub const fn bits(self) -> $ty { self.0 }
            pub const fn contains(self, other: Self) -> bool { (self.0 & other.0) == other.0 }
            pub fn insert(&mut self, other: Self) { self.0 |= other.0; }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self { $name(self.0 | rhs.0) }
        }
    };
}

bitflags_lite! {
    /// DATA frame flags, one bit each.
    pub struct DataFlags: u8 {
        const FIN       = 0b0000_0001;
        const MOVE_FWD  = 0b0000_0010;
        const HAS_FEC   = 0b0000_0100;
        const HAS_TTG   = 0b0000_1000;
        const PERSIST   = 0b0001_0000;
    }
}

// ─── Frame type discriminator ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    ConnHello = 0,
    ConnHelloAck = 1,
    ResetConn = 2,
    CloseConn = 3,
    CreateStream = 4,
    ResetStream = 5,
    Data = 6,
    Ack = 7,
    CcSync = 8,
    RcvdPktCnt = 9,
    CcPktTrain = 10,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Result<Self, SliqError> {
        Ok(match b {
            0 => FrameType::ConnHello,
            1 => FrameType::ConnHelloAck,
            2 => FrameType::ResetConn,
            3 => FrameType::CloseConn,
            4 => FrameType::CreateStream,
            5 => FrameType::ResetStream,
            6 => FrameType::Data,
            7 => FrameType::Ack,
            8 => FrameType::CcSync,
            9 => FrameType::RcvdPktCnt,
            10 => FrameType::CcPktTrain,
            _ => return Err(SliqError::MalformedHeader("unknown frame type")),
        })
    }
}

/// The FEC packet type carried in the DATA FEC block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecPktType {
    Source,
    Encoded,
}

/// The FEC block appended to a DATA header when `HAS_FEC` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecBlock {
    pub group_id: u32,
    pub encoded_length: u16,
    pub group_index: u8,
    pub num_src: u8,
    pub round: u8,
    pub pkt_type: FecPktType,
}

impl FecBlock {
    pub const ENCODED_LEN: usize = 4 + 2 + 1 + 1 + 1 + 1;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.group_id);
        buf.put_u16(self.encoded_length);
        buf.put_u8(self.group_index);
        buf.put_u8(self.num_src);
        buf.put_u8(self.round);
        buf.put_u8(match self.pkt_type {
            FecPktType::Source => 0,
            FecPktType::Encoded => 1,
        });
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < Self::ENCODED_LEN {
            return Err(SliqError::MalformedHeader("fec block: truncated"));
        }
        Ok(FecBlock {
            group_id: buf.get_u32(),
            encoded_length: buf.get_u16(),
            group_index: buf.get_u8(),
            num_src: buf.get_u8(),
            round: buf.get_u8(),
            pkt_type: match buf.get_u8() {
                0 => FecPktType::Source,
                _ => FecPktType::Encoded,
            },
        })
    }
}

/// Time-to-go vector entry: half-precision seconds (stored as raw fp16 bits;
/// conversion to/from `f32` is left to callers that need float deadlines).
pub type TtgHalf = u16;

// ─── DATA header ─────────────────────────────────────────────────────────────

/// Bit-exact DATA header (see the external-interfaces section of the
/// design).
#[derive(Debug, Clone, PartialEq)]
pub struct DataHeader {
    pub flags: DataFlags,
    pub cc_id: CcId,
    pub stream_id: StreamId,
    pub retransmit_count: u8,
    pub payload_length: u16,
    pub seq_num: PktSeqNumber,
    pub timestamp: PktTimestamp,
    pub timestamp_delta: u32,
    pub move_forward_seq: Option<PktSeqNumber>,
    pub fec: Option<FecBlock>,
    pub ttg: Vec<TtgHalf>,
}

impl DataHeader {
    pub const BASE_LEN: usize = 1 + 1 + 1 + 1 + 1 + 1 + 2 + 4 + 4 + 4;

    pub fn encoded_len(&self) -> usize {
        let mut len = Self::BASE_LEN;
        if self.flags.contains(DataFlags::MOVE_FWD) {
            len += 4;
        }
        if self.flags.contains(DataFlags::HAS_FEC) {
            len += FecBlock::ENCODED_LEN;
        }
        if self.flags.contains(DataFlags::HAS_TTG) {
            len += 1 + 2 * self.ttg.len();
        }
        len
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::Data as u8);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.cc_id);
        buf.put_u8(self.stream_id);
        buf.put_u8(self.retransmit_count);
        buf.put_u8(0); // reserved
        buf.put_u16(self.payload_length);
        buf.put_u32(self.seq_num);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.timestamp_delta);
        if let Some(mf) = self.move_forward_seq {
            buf.put_u32(mf);
        }
        if let Some(fec) = &self.fec {
            fec.encode(buf);
        }
        if self.flags.contains(DataFlags::HAS_TTG) {
            buf.put_u8(self.ttg.len() as u8);
            for t in &self.ttg {
                buf.put_u16(*t);
            }
        }
    }

    /// Decode the header (the type byte must already have been consumed by
    /// the caller).
    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < Self::BASE_LEN - 1 {
            return Err(SliqError::MalformedHeader("data: truncated base header"));
        }
        let flags = DataFlags(buf.get_u8());
        let cc_id = buf.get_u8();
        let stream_id = buf.get_u8();
        if stream_id == 0 {
            return Err(SliqError::MalformedHeader("data: stream id 0 invalid"));
        }
        let retransmit_count = buf.get_u8();
        let _reserved = buf.get_u8();
        let payload_length = buf.get_u16();
        let seq_num = buf.get_u32();
        let timestamp = buf.get_u32();
        let timestamp_delta = buf.get_u32();

        let move_forward_seq = if flags.contains(DataFlags::MOVE_FWD) {
            if buf.remaining() < 4 {
                return Err(SliqError::MalformedHeader("data: truncated move-forward"));
            }
            Some(buf.get_u32())
        } else {
            None
        };

        let fec = if flags.contains(DataFlags::HAS_FEC) {
            Some(FecBlock::decode(buf)?)
        } else {
            None
        };

        let ttg = if flags.contains(DataFlags::HAS_TTG) {
            if !buf.has_remaining() {
                return Err(SliqError::MalformedHeader("data: truncated ttg count"));
            }
            let count = buf.get_u8() as usize;
            if buf.remaining() < 2 * count {
                return Err(SliqError::MalformedHeader("data: truncated ttg vector"));
            }
            (0..count).map(|_| buf.get_u16()).collect()
        } else {
            Vec::new()
        };

        Ok(DataHeader {
            flags,
            cc_id,
            stream_id,
            retransmit_count,
            payload_length,
            seq_num,
            timestamp,
            timestamp_delta,
            move_forward_seq,
            fec,
            ttg,
        })
    }
}

// ─── ACK header ──────────────────────────────────────────────────────────────

/// A run of contiguous received sequence numbers, encoded as a gap (missing
/// packets before this block) plus a run length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckBlock {
    pub gap: u16,
    pub length: u16,
}

/// One observed-time sample: a received sequence number and the receiver's
/// timestamp for it, used by the sender for RTT sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedTime {
    pub seq_num: PktSeqNumber,
    pub timestamp: PktTimestamp,
}

/// Bit-exact ACK header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHeader {
    pub next_expected: PktSeqNumber,
    pub largest_observed: PktSeqNumber,
    pub observed_timestamp: PktTimestamp,
    pub ack_blocks: Vec<AckBlock>,
    pub observed_times: Vec<ObservedTime>,
    pub received_history: Vec<PktSeqNumber>,
}

impl AckHeader {
    pub const MAX_ACK_BLOCKS: usize = 32;
    pub const MAX_OBSERVED_TIMES: usize = 16;
    pub const ACK_HISTORY_SIZE: usize = 16;

    pub fn encoded_len(&self) -> usize {
        1 + 4
            + 4
            + 4
            + 1
            + self.ack_blocks.len() * 4
            + 1
            + self.observed_times.len() * 8
            + 1
            + self.received_history.len() * 4
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::Ack as u8);
        buf.put_u32(self.next_expected);
        buf.put_u32(self.largest_observed);
        buf.put_u32(self.observed_timestamp);
        buf.put_u8(self.ack_blocks.len().min(Self::MAX_ACK_BLOCKS) as u8);
        for block in self.ack_blocks.iter().take(Self::MAX_ACK_BLOCKS) {
            buf.put_u16(block.gap);
            buf.put_u16(block.length);
        }
        buf.put_u8(self.observed_times.len().min(Self::MAX_OBSERVED_TIMES) as u8);
        for ot in self.observed_times.iter().take(Self::MAX_OBSERVED_TIMES) {
            buf.put_u32(ot.seq_num);
            buf.put_u32(ot.timestamp);
        }
        buf.put_u8(self.received_history.len().min(Self::ACK_HISTORY_SIZE) as u8);
        for seq in self.received_history.iter().take(Self::ACK_HISTORY_SIZE) {
            buf.put_u32(*seq);
        }
    }

    /// Decode the header (the type byte must already have been consumed by
    /// the caller).
    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 4 + 4 + 4 + 1 {
            return Err(SliqError::MalformedHeader("ack: truncated base"));
        }
        let next_expected = buf.get_u32();
        let largest_observed = buf.get_u32();
        let observed_timestamp = buf.get_u32();

        let block_count = buf.get_u8() as usize;
        if buf.remaining() < block_count * 4 + 1 {
            return Err(SliqError::MalformedHeader("ack: truncated blocks"));
        }
        let ack_blocks = (0..block_count)
            .map(|_| AckBlock {
                gap: buf.get_u16(),
                length: buf.get_u16(),
            })
            .collect();

        let obs_count = buf.get_u8() as usize;
        if buf.remaining() < obs_count * 8 + 1 {
            return Err(SliqError::MalformedHeader("ack: truncated observed times"));
        }
        let observed_times = (0..obs_count)
            .map(|_| ObservedTime {
                seq_num: buf.get_u32(),
                timestamp: buf.get_u32(),
            })
            .collect();

        let hist_count = buf.get_u8() as usize;
        if buf.remaining() < hist_count * 4 {
            return Err(SliqError::MalformedHeader("ack: truncated history"));
        }
        let received_history = (0..hist_count).map(|_| buf.get_u32()).collect();

        Ok(AckHeader {
            next_expected,
            largest_observed,
            observed_timestamp,
            ack_blocks,
            observed_times,
            received_history,
        })
    }

    /// Expand the ack-block run-length encoding into the set of received
    /// sequence numbers it describes, starting the scan at `next_expected`.
    pub fn received_sequences(&self) -> Vec<PktSeqNumber> {
        let mut out = Vec::new();
        let mut cursor = self.next_expected;
        for block in &self.ack_blocks {
            cursor = cursor.wrapping_add(block.gap as u32);
            for i in 0..block.length {
                out.push(cursor.wrapping_add(i as u32));
            }
            cursor = cursor.wrapping_add(block.length as u32);
        }
        out
    }
}

// ─── Handshake & control frames ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnHello {
    pub send_timestamp: PktTimestamp,
    pub cc_algorithms: Vec<u8>,
}

impl ConnHello {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::ConnHello as u8);
        buf.put_u32(self.send_timestamp);
        buf.put_u8(self.cc_algorithms.len() as u8);
        buf.extend_from_slice(&self.cc_algorithms);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 5 {
            return Err(SliqError::MalformedHeader("conn_hello: truncated"));
        }
        let send_timestamp = buf.get_u32();
        let n = buf.get_u8() as usize;
        if buf.remaining() < n {
            return Err(SliqError::MalformedHeader("conn_hello: truncated cc list"));
        }
        let mut cc_algorithms = vec![0u8; n];
        buf.copy_to_slice(&mut cc_algorithms);
        Ok(ConnHello {
            send_timestamp,
            cc_algorithms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnHelloAck {
    pub echo_timestamp: PktTimestamp,
    pub chosen_cc_algorithms: Vec<u8>,
}

impl ConnHelloAck {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::ConnHelloAck as u8);
        buf.put_u32(self.echo_timestamp);
        buf.put_u8(self.chosen_cc_algorithms.len() as u8);
        buf.extend_from_slice(&self.chosen_cc_algorithms);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 5 {
            return Err(SliqError::MalformedHeader("conn_hello_ack: truncated"));
        }
        let echo_timestamp = buf.get_u32();
        let n = buf.get_u8() as usize;
        if buf.remaining() < n {
            return Err(SliqError::MalformedHeader(
                "conn_hello_ack: truncated cc list",
            ));
        }
        let mut chosen_cc_algorithms = vec![0u8; n];
        buf.copy_to_slice(&mut chosen_cc_algorithms);
        Ok(ConnHelloAck {
            echo_timestamp,
            chosen_cc_algorithms,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateStream {
    pub stream_id: StreamId,
    pub priority: u8,
    pub reliability: Reliability,
    pub delivery_mode: DeliveryMode,
    pub cc_id: CcId,
}

/// `CreateStream`'s on-wire reliability encoding, shared with nothing else:
/// mode tag + every field any mode might use, so the peer creating its side
/// of the stream applies the same ARQ/FEC policy the sender configured
/// rather than defaulting to `RELIABLE_ARQ`.
const RELIABILITY_ENCODED_LEN: usize = 1 + 1 + 8 + 1 + 1 + 8 + 1;

fn encode_reliability(r: &Reliability, buf: &mut BytesMut) {
    buf.put_u8(match r.mode {
        ReliabilityMode::BestEffort => 0,
        ReliabilityMode::SemiReliableArq => 1,
        ReliabilityMode::SemiReliableArqFec => 2,
        ReliabilityMode::ReliableArq => 3,
    });
    buf.put_u8(r.rexmit_limit);
    buf.put_f64(r.fec_target_pkt_recv_prob);
    buf.put_u8(r.fec_del_time_flag as u8);
    buf.put_u8(r.fec_target_pkt_del_rounds);
    buf.put_f64(r.fec_target_pkt_del_time_sec);
    buf.put_u8(r.fec_group_size);
}

fn decode_reliability(buf: &mut impl Buf) -> Result<Reliability, SliqError> {
    if buf.remaining() < RELIABILITY_ENCODED_LEN {
        return Err(SliqError::MalformedHeader("reliability: truncated"));
    }
    let mode = match buf.get_u8() {
        0 => ReliabilityMode::BestEffort,
        1 => ReliabilityMode::SemiReliableArq,
        2 => ReliabilityMode::SemiReliableArqFec,
        _ => ReliabilityMode::ReliableArq,
    };
    let rexmit_limit = buf.get_u8();
    let fec_target_pkt_recv_prob = buf.get_f64();
    let fec_del_time_flag = buf.get_u8() != 0;
    let fec_target_pkt_del_rounds = buf.get_u8();
    let fec_target_pkt_del_time_sec = buf.get_f64();
    let fec_group_size = buf.get_u8();
    Ok(Reliability {
        mode,
        rexmit_limit,
        fec_target_pkt_recv_prob,
        fec_del_time_flag,
        fec_target_pkt_del_rounds,
        fec_target_pkt_del_time_sec,
        fec_group_size,
    })
}

impl CreateStream {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::CreateStream as u8);
        buf.put_u8(self.stream_id);
        buf.put_u8(self.priority);
        encode_reliability(&self.reliability, buf);
        buf.put_u8(match self.delivery_mode {
            DeliveryMode::Unordered => 0,
            DeliveryMode::Ordered => 1,
        });
        buf.put_u8(self.cc_id);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 2 + RELIABILITY_ENCODED_LEN + 2 {
            return Err(SliqError::MalformedHeader("create_stream: truncated"));
        }
        let stream_id = buf.get_u8();
        let priority = buf.get_u8();
        let reliability = decode_reliability(buf)?;
        let delivery_mode = match buf.get_u8() {
            1 => DeliveryMode::Ordered,
            _ => DeliveryMode::Unordered,
        };
        let cc_id = buf.get_u8();
        Ok(CreateStream {
            stream_id,
            priority,
            reliability,
            delivery_mode,
            cc_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStream {
    pub stream_id: StreamId,
}

impl ResetStream {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::ResetStream as u8);
        buf.put_u8(self.stream_id);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if !buf.has_remaining() {
            return Err(SliqError::MalformedHeader("reset_stream: truncated"));
        }
        Ok(ResetStream {
            stream_id: buf.get_u8(),
        })
    }
}

/// `CC_SYNC`: a 16-bit wrap-aware sequence number protecting a 32-bit,
/// algorithm-specific payload. Unknown payloads are ignored (see
/// DESIGN.md's resolution of the corresponding open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcSync {
    pub cc_id: CcId,
    pub seq_num: u16,
    pub cc_params: u32,
}

impl CcSync {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::CcSync as u8);
        buf.put_u8(self.cc_id);
        buf.put_u16(self.seq_num);
        buf.put_u32(self.cc_params);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 7 {
            return Err(SliqError::MalformedHeader("cc_sync: truncated"));
        }
        Ok(CcSync {
            cc_id: buf.get_u8(),
            seq_num: buf.get_u16(),
            cc_params: buf.get_u32(),
        })
    }

    /// Wrap-aware "is newer than" comparison per the 16-bit sequence space.
    pub fn is_newer(new: u16, old: u16) -> bool {
        new.wrapping_sub(old) < 0x8000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcvdPktCnt {
    pub stream_id: StreamId,
    pub count: u32,
}

impl RcvdPktCnt {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::RcvdPktCnt as u8);
        buf.put_u8(self.stream_id);
        buf.put_u32(self.count);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 5 {
            return Err(SliqError::MalformedHeader("rcvd_pkt_cnt: truncated"));
        }
        Ok(RcvdPktCnt {
            stream_id: buf.get_u8(),
            count: buf.get_u32(),
        })
    }
}

/// Packet-pair/train header used by packet-train-based CC variants (Copa2/3)
/// for bottleneck bandwidth estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcPktTrainHeader {
    pub cc_id: CcId,
    pub train_seq: u16,
    pub packet_index: u8,
    pub packet_count: u8,
    pub send_timestamp: PktTimestamp,
}

impl CcPktTrainHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::CcPktTrain as u8);
        buf.put_u8(self.cc_id);
        buf.put_u16(self.train_seq);
        buf.put_u8(self.packet_index);
        buf.put_u8(self.packet_count);
        buf.put_u32(self.send_timestamp);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, SliqError> {
        if buf.remaining() < 9 {
            return Err(SliqError::MalformedHeader("cc_pkt_train: truncated"));
        }
        Ok(CcPktTrainHeader {
            cc_id: buf.get_u8(),
            train_seq: buf.get_u16(),
            packet_index: buf.get_u8(),
            packet_count: buf.get_u8(),
            send_timestamp: buf.get_u32(),
        })
    }
}

impl ResetConn {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::ResetConn as u8);
    }
    pub fn decode(_buf: &mut impl Buf) -> Result<Self, SliqError> {
        Ok(ResetConn)
    }
}

impl CloseConn {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(FrameType::CloseConn as u8);
    }
    pub fn decode(_buf: &mut impl Buf) -> Result<Self, SliqError> {
        Ok(CloseConn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetConn;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseConn;

/// Any decoded SLIQ frame, tagged by type.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    ConnHello(ConnHello),
    ConnHelloAck(ConnHelloAck),
    ResetConn,
    CloseConn,
    CreateStream(CreateStream),
    ResetStream(ResetStream),
    Data(DataHeader, Bytes),
    Ack(AckHeader),
    CcSync(CcSync),
    RcvdPktCnt(RcvdPktCnt),
    CcPktTrain(CcPktTrainHeader),
}

impl Frame {
    /// Encode this frame into a single UDP datagram payload, ready for
    /// [`crate::socket::SocketManager::write_packet`].
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Frame::ConnHello(h) => h.encode(&mut buf),
            Frame::ConnHelloAck(h) => h.encode(&mut buf),
            Frame::ResetConn => ResetConn.encode(&mut buf),
            Frame::CloseConn => CloseConn.encode(&mut buf),
            Frame::CreateStream(h) => h.encode(&mut buf),
            Frame::ResetStream(h) => h.encode(&mut buf),
            Frame::Data(header, body) => {
                header.encode(&mut buf);
                buf.extend_from_slice(body);
            }
            Frame::Ack(h) => h.encode(&mut buf),
            Frame::CcSync(h) => h.encode(&mut buf),
            Frame::RcvdPktCnt(h) => h.encode(&mut buf),
            Frame::CcPktTrain(h) => h.encode(&mut buf),
        }
        buf.freeze()
    }

    /// Decode a single frame from a full UDP datagram payload.
    pub fn decode(payload: Bytes) -> Result<Self, SliqError> {
        if payload.is_empty() {
            return Err(SliqError::MalformedHeader("empty datagram"));
        }
        let frame_type = FrameType::from_byte(payload[0])?;
        Ok(match frame_type {
            FrameType::ConnHello => {
                let mut cursor = payload.slice(1..);
                Frame::ConnHello(ConnHello::decode(&mut cursor)?)
            }
            FrameType::ConnHelloAck => {
                let mut cursor = payload.slice(1..);
                Frame::ConnHelloAck(ConnHelloAck::decode(&mut cursor)?)
            }
            FrameType::ResetConn => {
                let mut cursor = payload.slice(1..);
                ResetConn::decode(&mut cursor)?;
                Frame::ResetConn
            }
            FrameType::CloseConn => {
                let mut cursor = payload.slice(1..);
                CloseConn::decode(&mut cursor)?;
                Frame::CloseConn
            }
            FrameType::CreateStream => {
                let mut cursor = payload.slice(1..);
                Frame::CreateStream(CreateStream::decode(&mut cursor)?)
            }
            FrameType::ResetStream => {
                let mut cursor = payload.slice(1..);
                Frame::ResetStream(ResetStream::decode(&mut cursor)?)
            }
            FrameType::Data => {
                let mut cursor = payload.slice(1..);
                let header = DataHeader::decode(&mut cursor)?;
                let pld_len = header.payload_length as usize;
                if cursor.remaining() < pld_len {
                    return Err(SliqError::MalformedHeader("data: truncated payload"));
                }
                let body = cursor.copy_to_bytes(pld_len);
                Frame::Data(header, body)
            }
            FrameType::Ack => {
                let mut cursor = payload.slice(1..);
                Frame::Ack(AckHeader::decode(&mut cursor)?)
            }
            FrameType::CcSync => {
                let mut cursor = payload.slice(1..);
                Frame::CcSync(CcSync::decode(&mut cursor)?)
            }
            FrameType::RcvdPktCnt => {
                let mut cursor = payload.slice(1..);
                Frame::RcvdPktCnt(RcvdPktCnt::decode(&mut cursor)?)
            }
            FrameType::CcPktTrain => {
                let mut cursor = payload.slice(1..);
                Frame::CcPktTrain(CcPktTrainHeader::decode(&mut cursor)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_roundtrip_boundaries() {
        for v in [0u64, 63, 64, 16383, 16384, (1 << 30) - 1, 1 << 30, VarInt::MAX] {
            let vi = VarInt::new(v).unwrap();
            let mut buf = BytesMut::new();
            vi.encode(&mut buf);
            assert_eq!(buf.len(), vi.encoded_len());
            let mut bytes = buf.freeze();
            let decoded = VarInt::decode(&mut bytes).unwrap();
            assert_eq!(decoded.value(), v);
        }
    }

    #[test]
    fn data_header_roundtrip_minimal() {
        let hdr = DataHeader {
            flags: DataFlags::empty(),
            cc_id: 0,
            stream_id: 1,
            retransmit_count: 0,
            payload_length: 4,
            seq_num: 42,
            timestamp: 1000,
            timestamp_delta: 5,
            move_forward_seq: None,
            fec: None,
            ttg: vec![],
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), hdr.encoded_len());
        let mut frozen = buf.freeze();
        let type_byte = frozen.get_u8();
        assert_eq!(type_byte, FrameType::Data as u8);
        let decoded = DataHeader::decode(&mut frozen).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn data_header_roundtrip_full() {
        let hdr = DataHeader {
            flags: DataFlags::MOVE_FWD | DataFlags::HAS_FEC | DataFlags::HAS_TTG,
            cc_id: 1,
            stream_id: 7,
            retransmit_count: 2,
            payload_length: 100,
            seq_num: 1000,
            timestamp: 555,
            timestamp_delta: 10,
            move_forward_seq: Some(1005),
            fec: Some(FecBlock {
                group_id: 9,
                encoded_length: 120,
                group_index: 2,
                num_src: 4,
                round: 1,
                pkt_type: FecPktType::Encoded,
            }),
            ttg: vec![100, 200, 300],
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), hdr.encoded_len());
        let mut frozen = buf.freeze();
        frozen.get_u8();
        let decoded = DataHeader::decode(&mut frozen).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn ack_header_roundtrip() {
        let hdr = AckHeader {
            next_expected: 10,
            largest_observed: 20,
            observed_timestamp: 999,
            ack_blocks: vec![
                AckBlock { gap: 0, length: 3 },
                AckBlock { gap: 1, length: 2 },
            ],
            observed_times: vec![ObservedTime {
                seq_num: 12,
                timestamp: 1000,
            }],
            received_history: vec![8, 9, 10],
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), hdr.encoded_len());
        let mut frozen = buf.freeze();
        frozen.get_u8();
        let decoded = AckHeader::decode(&mut frozen).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn ack_block_expansion() {
        let hdr = AckHeader {
            next_expected: 10,
            largest_observed: 15,
            observed_timestamp: 0,
            ack_blocks: vec![AckBlock { gap: 0, length: 2 }, AckBlock { gap: 1, length: 1 }],
            observed_times: vec![],
            received_history: vec![],
        };
        // block1: [10,11]; gap of 1 (skip 12); block2: [13]
        assert_eq!(hdr.received_sequences(), vec![10, 11, 13]);
    }

    #[test]
    fn cc_sync_wrap_aware_newer() {
        assert!(CcSync::is_newer(5, 3));
        assert!(!CcSync::is_newer(3, 5));
        assert!(CcSync::is_newer(1, 65530)); // wraps
        assert!(!CcSync::is_newer(65530, 1));
    }

    #[test]
    fn frame_type_roundtrip_all_variants() {
        for b in 0u8..=10 {
            let ft = FrameType::from_byte(b).unwrap();
            assert_eq!(ft as u8, b);
        }
        assert!(FrameType::from_byte(200).is_err());
    }

    #[test]
    fn frame_encode_decode_roundtrip_data() {
        let frame = Frame::Data(
            DataHeader {
                flags: DataFlags::empty(),
                cc_id: 0,
                stream_id: 1,
                retransmit_count: 0,
                payload_length: 5,
                seq_num: 7,
                timestamp: 100,
                timestamp_delta: 0,
                move_forward_seq: None,
                fec: None,
                ttg: vec![],
            },
            Bytes::from_static(b"hello"),
        );
        let encoded = frame.encode();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_encode_decode_roundtrip_ack_and_handshake() {
        let ack = Frame::Ack(AckHeader {
            next_expected: 1,
            largest_observed: 4,
            observed_timestamp: 10,
            ack_blocks: vec![AckBlock { gap: 0, length: 3 }],
            observed_times: vec![],
            received_history: vec![1, 2, 3],
        });
        assert_eq!(Frame::decode(ack.encode()).unwrap(), ack);

        let hello = Frame::ConnHello(ConnHello {
            send_timestamp: 42,
            cc_algorithms: vec![1, 3],
        });
        assert_eq!(Frame::decode(hello.encode()).unwrap(), hello);

        assert_eq!(Frame::decode(Frame::ResetConn.encode()).unwrap(), Frame::ResetConn);
        assert_eq!(Frame::decode(Frame::CloseConn.encode()).unwrap(), Frame::CloseConn);
    }

    proptest! {
        #[test]
        fn prop_data_header_roundtrip(
            stream_id in 1u8..=32,
            cc_id in 0u8..2,
            retransmit_count in 0u8..255,
            payload_length in 0u16..2000,
            seq_num in any::<u32>(),
            timestamp in any::<u32>(),
            timestamp_delta in any::<u32>(),
        ) {
            let hdr = DataHeader {
                flags: DataFlags::empty(),
                cc_id,
                stream_id,
                retransmit_count,
                payload_length,
                seq_num,
                timestamp,
                timestamp_delta,
                move_forward_seq: None,
                fec: None,
                ttg: vec![],
            };
            let mut buf = BytesMut::new();
            hdr.encode(&mut buf);
            let mut frozen = buf.freeze();
            frozen.get_u8();
            let decoded = DataHeader::decode(&mut frozen).unwrap();
            prop_assert_eq!(decoded, hdr);
        }
    }
}
