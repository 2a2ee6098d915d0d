//! Copa2 congestion control (Arun & Balakrishnan, NSDI'18 submission),
//! packet-pair fast startup plus closed-loop velocity-based window updates.
//!
//! Deviations from the paper, matching the reference implementation this is
//! ported from: initial window is 3 packets, not 10; the window is tracked
//! in packets but scaled to/from bytes using a nominal 1000-byte packet so
//! mixed packet sizes don't distort the velocity math; window growth is
//! skipped once `cwnd` exceeds twice the estimated packets in flight, to
//! stop it inflating when the sender isn't keeping the pipe full; and a
//! selective damper holds the window steady for one RTT after an unusually
//! large queuing delay spike, then stays quiet for a further RTT, to kill
//! the slow oscillations Copa2 would otherwise settle into.

use quanta::Instant;
use std::time::Duration;

use super::{CongestionController, FlightCounts};
use crate::types::{CcId, CongCtrl, CongCtrlAlg, PktSeqNumber, StreamId};

const NOMINAL_PKT_BYTES: f64 = 1000.0;
const DEFAULT_DELTA: f64 = 0.5;
const NUM_FS_PAIRS: u32 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    NotConnected,
    FastStartup,
    ClosedLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VelDir {
    Neither,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DamperState {
    MonitorHigh,
    MonitorLow,
    Hold,
    Wait,
}

pub struct Copa2Controller {
    cc_id: CcId,
    state: OpState,
    delta: f64,
    /// Set by `set_tcp_friendliness`: when `Some(n)`, `delta` is scaled down
    /// by `n` competing TCP flows instead of held at its configured value,
    /// biasing Copa2 toward TCP's throughput-over-latency tradeoff.
    tcp_friendly_flows: Option<u32>,

    fs_pairs_sent: u32,
    fs_rate_estimate_pps: f64,

    damper_state: DamperState,
    damper_hold_cnt: u32,

    min_rtt_us: f64,
    rtt_standing_us: f64,
    cwnd_pkts: f64,
    velocity: u32,
    prev_direction: VelDir,
    same_direction_cnt: u32,

    pif: i32,
    bif: i64,
}

impl Copa2Controller {
    pub fn new(cc_id: CcId) -> Self {
        Copa2Controller {
            cc_id,
            state: OpState::NotConnected,
            delta: DEFAULT_DELTA,
            tcp_friendly_flows: None,
            fs_pairs_sent: 0,
            fs_rate_estimate_pps: 0.0,
            damper_state: DamperState::MonitorHigh,
            damper_hold_cnt: 0,
            min_rtt_us: f64::MAX,
            rtt_standing_us: 0.0,
            cwnd_pkts: 3.0,
            velocity: 1,
            prev_direction: VelDir::Neither,
            same_direction_cnt: 0,
            pif: 0,
            bif: 0,
        }
    }

    fn queuing_delay_us(&self) -> f64 {
        (self.rtt_standing_us - self.min_rtt_us).max(0.0)
    }

    fn nominal_pif(&self) -> f64 {
        (self.bif as f64 / NOMINAL_PKT_BYTES).max(1.0)
    }

    /// `delta` as actually used by the window update: `self.delta` unless
    /// TCP-friendliness mode is on, in which case it shrinks with the
    /// number of competing flows so Copa2 claims a TCP-comparable share of
    /// the bottleneck instead of holding queuing delay near zero.
    fn effective_delta(&self) -> f64 {
        match self.tcp_friendly_flows {
            Some(n) => (self.delta / n.max(1) as f64).max(0.05),
            None => self.delta,
        }
    }

    fn update_window(&mut self) {
        let delta = self.effective_delta();
        let qdelay_us = self.queuing_delay_us();
        let qdelay_pkts_equiv = if qdelay_us > 0.0 {
            1.0 / (delta * (qdelay_us / 1_000_000.0).max(1e-9))
        } else {
            f64::MAX
        };

        // Large queuing delay spike: arm the damper instead of shrinking
        // immediately, so a single transient doesn't whipsaw the window.
        if qdelay_pkts_equiv < 2.0 && self.damper_state == DamperState::MonitorHigh {
            self.damper_state = DamperState::Hold;
            self.damper_hold_cnt = 0;
            return;
        }
        if self.damper_state == DamperState::Hold {
            self.damper_hold_cnt += 1;
            if self.damper_hold_cnt >= 1 {
                self.damper_state = DamperState::Wait;
                self.damper_hold_cnt = 0;
            }
            return;
        }
        if self.damper_state == DamperState::Wait {
            self.damper_state = DamperState::MonitorHigh;
            return;
        }

        let current_rate = if self.rtt_standing_us > 0.0 {
            self.cwnd_pkts / (self.rtt_standing_us / 1_000_000.0)
        } else {
            0.0
        };
        let target_rate = if qdelay_us > 0.0 {
            1.0 / (delta * (qdelay_us / 1_000_000.0))
        } else {
            f64::MAX
        };

        let step = self.velocity as f64 / self.cwnd_pkts.max(1.0);
        if current_rate < target_rate {
            if self.cwnd_pkts <= 2.0 * self.nominal_pif() {
                self.cwnd_pkts += step;
            }
            if self.prev_direction == VelDir::Up {
                self.same_direction_cnt += 1;
            } else {
                self.same_direction_cnt = 0;
                self.velocity = 1;
            }
            self.prev_direction = VelDir::Up;
        } else {
            self.cwnd_pkts = (self.cwnd_pkts - step).max(1.0);
            if self.prev_direction == VelDir::Down {
                self.same_direction_cnt += 1;
            } else {
                self.same_direction_cnt = 0;
                self.velocity = 1;
            }
            self.prev_direction = VelDir::Down;
        }

        if self.same_direction_cnt >= 3 {
            self.velocity = (self.velocity * 2).min(64);
        }
    }
}

impl CongestionController for Copa2Controller {
    fn set_tcp_friendliness(&mut self, num_flows: u32) -> bool {
        self.tcp_friendly_flows = Some(num_flows.max(1));
        true
    }

    fn configure(&mut self, params: &CongCtrl) -> bool {
        params.validate().is_ok()
    }

    fn connected(&mut self, _now: Instant, rtt: Duration) {
        let rtt_us = rtt.as_micros() as f64;
        self.min_rtt_us = rtt_us;
        self.rtt_standing_us = rtt_us;
        // Real fast startup runs 11 CC_PKT_TRAIN packet pairs to estimate
        // the bottleneck rate before entering closed loop; that exchange is
        // driven by `process_cc_pkt_train`, so startup here just marks the
        // state and lets the first RTT samples seed the window.
        self.state = OpState::FastStartup;
        self.fs_pairs_sent = 0;
    }

    fn use_rexmit_pacing(&self) -> bool {
        true
    }

    fn use_cwnd_for_cap_est(&self) -> bool {
        true
    }

    fn activate_stream(&mut self, _stream_id: StreamId, _init_seq: PktSeqNumber) -> bool {
        true
    }

    fn deactivate_stream(&mut self, _stream_id: StreamId) -> bool {
        true
    }

    fn on_ack_pkt_processing_start(&mut self, _ack_time: Instant) {}

    fn on_rtt_update(&mut self, _stream_id: StreamId, _ack_time: Instant, rtt: Duration) {
        let rtt_us = rtt.as_micros() as f64;
        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }
        self.rtt_standing_us = 0.9 * self.rtt_standing_us + 0.1 * rtt_us;

        if self.state == OpState::FastStartup {
            self.fs_pairs_sent += 1;
            if self.fs_pairs_sent >= NUM_FS_PAIRS {
                self.state = OpState::ClosedLoop;
            }
            return;
        }
        self.update_window();
    }

    fn on_packet_lost(&mut self, _stream_id: StreamId, _ack_time: Instant, _seq: PktSeqNumber, _bytes: u32) -> bool {
        false
    }

    fn on_packet_acked(
        &mut self,
        _stream_id: StreamId,
        _ack_time: Instant,
        _seq: PktSeqNumber,
        _bytes: u32,
        counts: FlightCounts,
    ) {
        self.pif = counts.pif;
        self.bif = counts.bif;
    }

    fn on_ack_pkt_processing_done(&mut self, _ack_time: Instant) {}

    fn on_packet_sent(&mut self, _stream_id: StreamId, _send_time: Instant, _seq: PktSeqNumber, bytes: u32) {
        self.pif += 1;
        self.bif += bytes as i64;
    }

    fn on_packet_resent(&mut self, _stream_id: StreamId, _send_time: Instant, _seq: PktSeqNumber, bytes: u32) {
        self.bif += bytes as i64;
    }

    fn on_rto(&mut self, _pkt_rexmit: bool) {
        self.cwnd_pkts = 3.0;
        self.velocity = 1;
        self.same_direction_cnt = 0;
        self.damper_state = DamperState::MonitorHigh;
    }

    fn on_outage_end(&mut self) {
        self.cwnd_pkts = 3.0;
        self.velocity = 1;
        self.state = OpState::FastStartup;
        self.fs_pairs_sent = 0;
    }

    fn update_counts(&mut self, pif_adj: i32, bif_adj: i64) {
        self.pif = (self.pif + pif_adj).max(0);
        self.bif = (self.bif + bif_adj).max(0);
    }

    fn can_send(&mut self, _now: Instant, bytes: u32) -> bool {
        if self.state == OpState::FastStartup {
            return false;
        }
        (self.bif + bytes as i64) as f64 <= self.cwnd_pkts * NOMINAL_PKT_BYTES
    }

    fn can_resend(&mut self, now: Instant, bytes: u32, is_tail_loss_probe: bool) -> bool {
        is_tail_loss_probe || self.can_send(now, bytes)
    }

    fn time_until_send(&mut self, _now: Instant) -> Duration {
        Duration::ZERO
    }

    fn send_pacing_rate(&mut self) -> u64 {
        if self.rtt_standing_us <= 0.0 {
            return u64::MAX;
        }
        ((self.cwnd_pkts * NOMINAL_PKT_BYTES) / (self.rtt_standing_us / 1_000_000.0)) as u64
    }

    fn send_rate(&mut self) -> u64 {
        self.send_pacing_rate()
    }

    fn in_slow_start(&self) -> bool {
        self.state == OpState::FastStartup
    }

    fn in_recovery(&self) -> bool {
        false
    }

    fn congestion_window(&self) -> u32 {
        (self.cwnd_pkts * NOMINAL_PKT_BYTES) as u32
    }

    fn slow_start_threshold(&self) -> u32 {
        u32::MAX
    }

    fn congestion_control_type(&self) -> CongCtrlAlg {
        CongCtrlAlg::Copa2Cc
    }
}
