//! Core SLIQ data types.
//!
//! Ported from the original `sliq_types.h` tag values and parameter structs
//! (`CongCtrl`, `Reliability`) so wire-compatible constants match the source
//! this crate's design was distilled from.

/// Capacity, in bits per second.
pub type Capacity = u64;
/// Process-unique endpoint identifier.
pub type EndptId = i32;
/// Stream priority, 0 (highest) ..= 7.
pub type Priority = u8;
/// Stream identifier, 1..=32.
pub type StreamId = u8;
/// Packet retransmit limit.
pub type RexmitLimit = u8;
/// Packet retransmit rounds.
pub type RexmitRounds = u8;
/// Packet timestamp, microseconds, sender clock, wraps at u32::MAX.
pub type PktTimestamp = u32;
/// Packet sequence number (per-stream).
pub type PktSeqNumber = u32;
/// Congestion-control instance identifier (0 or 1: up to two per connection).
pub type CcId = u8;

/// Endpoint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndptType {
    #[default]
    Unknown,
    ServerListen,
    ServerData,
    ClientData,
}

/// The SLIQ congestion control algorithms. Up to 256 may be defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CongCtrlAlg {
    NoCc = 0,
    TcpCubicBytesCc = 1,
    TcpRenoBytesCc = 2,
    TcpCubicCc = 3,
    Copa1ConstDeltaCc = 4,
    Copa1MCc = 5,
    Copa2Cc = 6,
    CopaCc = 7,
    FixedRateTestCc = 15,
    DefaultCc = 256,
}

impl Default for CongCtrlAlg {
    fn default() -> Self {
        CongCtrlAlg::DefaultCc
    }
}

/// The SLIQ congestion control specification.
///
/// - `cubic_reno_pacing` only applies to `TcpCubicBytesCc`/`TcpRenoBytesCc`.
/// - `deterministic_copa` only applies to `Copa1ConstDeltaCc`/`Copa1MCc`.
/// - `copa_delta` only applies to `Copa1ConstDeltaCc`, and must be in
///   `[0.004, 1.0]`.
/// - `copa_anti_jitter` only applies to `CopaCc` (seconds, `[0.0, 1.0]`).
/// - `fixed_send_rate` only applies to `FixedRateTestCc` and must be > 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongCtrl {
    pub algorithm: CongCtrlAlg,
    pub cubic_reno_pacing: bool,
    pub deterministic_copa: bool,
    pub copa_delta: f64,
    pub copa_anti_jitter: f64,
    pub fixed_send_rate: Capacity,
}

impl Default for CongCtrl {
    fn default() -> Self {
        CongCtrl {
            algorithm: CongCtrlAlg::DefaultCc,
            cubic_reno_pacing: false,
            deterministic_copa: false,
            copa_delta: 0.0,
            copa_anti_jitter: 0.0,
            fixed_send_rate: 0,
        }
    }
}

impl CongCtrl {
    pub fn tcp_cubic(send_pacing: bool) -> Self {
        CongCtrl {
            algorithm: CongCtrlAlg::TcpCubicBytesCc,
            cubic_reno_pacing: send_pacing,
            ..Default::default()
        }
    }

    pub fn copa_beta1(delta: f64, deterministic: bool) -> Self {
        CongCtrl {
            algorithm: CongCtrlAlg::Copa1ConstDeltaCc,
            deterministic_copa: deterministic,
            copa_delta: delta,
            ..Default::default()
        }
    }

    pub fn copa2() -> Self {
        CongCtrl {
            algorithm: CongCtrlAlg::Copa2Cc,
            ..Default::default()
        }
    }

    pub fn copa(anti_jitter_sec: f64) -> Self {
        CongCtrl {
            algorithm: CongCtrlAlg::CopaCc,
            copa_anti_jitter: anti_jitter_sec,
            ..Default::default()
        }
    }

    pub fn fixed_rate(send_rate_bps: Capacity) -> Self {
        CongCtrl {
            algorithm: CongCtrlAlg::FixedRateTestCc,
            fixed_send_rate: send_rate_bps,
            ..Default::default()
        }
    }

    /// Validate parameters for the selected algorithm, per the ranges in the
    /// field docs above.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.algorithm {
            CongCtrlAlg::Copa1ConstDeltaCc => {
                if !(0.004..=1.0).contains(&self.copa_delta) {
                    return Err("copa_delta out of range [0.004, 1.0]");
                }
            }
            CongCtrlAlg::CopaCc => {
                if !(0.0..=1.0).contains(&self.copa_anti_jitter) {
                    return Err("copa_anti_jitter out of range [0.0, 1.0]");
                }
            }
            CongCtrlAlg::FixedRateTestCc => {
                if self.fixed_send_rate == 0 {
                    return Err("fixed_send_rate must be > 0");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// The SLIQ reliability modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityMode {
    /// Single transmission, no ARQ or FEC.
    BestEffort,
    /// Semi-reliable using ARQ.
    SemiReliableArq,
    /// Semi-reliable using FEC and ARQ.
    SemiReliableArqFec,
    /// Fully reliable using ARQ.
    ReliableArq,
}

/// The SLIQ reliability specification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reliability {
    pub mode: ReliabilityMode,
    pub rexmit_limit: RexmitLimit,
    pub fec_target_pkt_recv_prob: f64,
    pub fec_del_time_flag: bool,
    pub fec_target_pkt_del_rounds: RexmitRounds,
    pub fec_target_pkt_del_time_sec: f64,
    /// FEC source-group size, "k" (spec §3: "a contiguous run of up to k
    /// source packets (k ∈ [1,10])"). Orthogonal to `fec_target_pkt_del_rounds`
    /// (the number of retransmission *rounds* the group gets): this field is
    /// the number of source packets collected into one group before it
    /// closes. Unused outside `SEMI_RELIABLE_ARQ_FEC`.
    pub fec_group_size: u8,
}

impl Default for Reliability {
    fn default() -> Self {
        Self::reliable_arq()
    }
}

impl Reliability {
    pub fn best_effort() -> Self {
        Reliability {
            mode: ReliabilityMode::BestEffort,
            rexmit_limit: 0,
            fec_target_pkt_recv_prob: 0.0,
            fec_del_time_flag: false,
            fec_target_pkt_del_rounds: 0,
            fec_target_pkt_del_time_sec: 0.0,
            fec_group_size: 1,
        }
    }

    pub fn semi_reliable_arq(rexmit_limit: RexmitLimit) -> Self {
        Reliability {
            mode: ReliabilityMode::SemiReliableArq,
            rexmit_limit,
            ..Self::best_effort()
        }
    }

    pub fn semi_reliable_arq_fec_rounds(
        rexmit_limit: RexmitLimit,
        recv_prob: f64,
        target_rounds: RexmitRounds,
        group_size: u8,
    ) -> Self {
        Reliability {
            mode: ReliabilityMode::SemiReliableArqFec,
            rexmit_limit,
            fec_target_pkt_recv_prob: recv_prob,
            fec_del_time_flag: false,
            fec_target_pkt_del_rounds: target_rounds,
            fec_target_pkt_del_time_sec: 0.0,
            fec_group_size: group_size,
        }
    }

    pub fn semi_reliable_arq_fec_time(
        rexmit_limit: RexmitLimit,
        recv_prob: f64,
        target_time_sec: f64,
        group_size: u8,
    ) -> Self {
        Reliability {
            mode: ReliabilityMode::SemiReliableArqFec,
            rexmit_limit,
            fec_target_pkt_recv_prob: recv_prob,
            fec_del_time_flag: true,
            fec_target_pkt_del_rounds: 0,
            fec_target_pkt_del_time_sec: target_time_sec,
            fec_group_size: group_size,
        }
    }

    pub fn reliable_arq() -> Self {
        Reliability {
            mode: ReliabilityMode::ReliableArq,
            rexmit_limit: 0,
            fec_target_pkt_recv_prob: 0.0,
            fec_del_time_flag: false,
            fec_target_pkt_del_rounds: 0,
            fec_target_pkt_del_time_sec: 0.0,
            fec_group_size: 1,
        }
    }

    /// Validate field ranges for the selected mode (spec §3/§5).
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.mode {
            ReliabilityMode::SemiReliableArq => {
                if !(1..=255).contains(&self.rexmit_limit) {
                    return Err("rexmit_limit must be in [1, 255] for SEMI_RELIABLE_ARQ");
                }
            }
            ReliabilityMode::SemiReliableArqFec => {
                if !(0.95..=0.999).contains(&self.fec_target_pkt_recv_prob) {
                    return Err("fec_target_pkt_recv_prob must be in [0.95, 0.999]");
                }
                if !self.fec_del_time_flag
                    && !(1..=self.rexmit_limit.saturating_add(1))
                        .contains(&self.fec_target_pkt_del_rounds)
                {
                    return Err("fec_target_pkt_del_rounds must be in [1, rexmit_limit+1]");
                }
                if !(1..=10).contains(&self.fec_group_size) {
                    return Err("fec_group_size must be in [1, 10]");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Only `ReliableArq` may select ordered delivery (spec §3).
    pub fn allows_ordered(&self) -> bool {
        matches!(self.mode, ReliabilityMode::ReliableArq)
    }
}

/// The SLIQ delivery modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Unordered,
    Ordered,
}

/// Dequeue rule for the per-stream transmit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DequeueRule {
    #[default]
    Fifo,
    Lifo,
}

/// Drop rule for the per-stream transmit queue when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropRule {
    #[default]
    NoDrop,
    HeadDrop,
    TailDrop,
}

/// RTT and packet delivery delay sample, reported to the application.
#[derive(Debug, Clone, Copy, Default)]
pub struct RttPdd {
    pub stream_id: StreamId,
    pub rtt_usec: u32,
    pub pdd_usec: u32,
}

/// Lowest valid client-initiated stream id (odd ids).
pub const MIN_CLIENT_STREAM_ID: StreamId = 1;
/// Highest valid client-initiated stream id (odd ids).
pub const MAX_CLIENT_STREAM_ID: StreamId = 31;
/// Lowest valid server-initiated stream id (even ids).
pub const MIN_SERVER_STREAM_ID: StreamId = 2;
/// Highest valid server-initiated stream id (even ids).
pub const MAX_SERVER_STREAM_ID: StreamId = 32;
/// Maximum concurrent streams per connection.
pub const MAX_STREAMS_PER_CONN: usize = 32;

/// Whether `id` is a valid, still-in-range stream id for `is_client`.
pub fn is_valid_stream_id(id: StreamId, is_client: bool) -> bool {
    if id == 0 {
        return false;
    }
    if is_client {
        id % 2 == 1 && id <= MAX_CLIENT_STREAM_ID
    } else {
        id % 2 == 0 && id >= MIN_SERVER_STREAM_ID && id <= MAX_SERVER_STREAM_ID
    }
}
