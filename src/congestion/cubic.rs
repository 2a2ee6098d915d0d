//! TCP Cubic congestion control (RFC 8312), with RFC 5681 slow start, a
//! HyStart-style slow-start exit, and PRR-style (RFC 6937) loss recovery
//! pacing so a single loss doesn't stall the window.

use quanta::Instant;
use std::time::Duration;

use super::{CongestionController, FlightCounts};
use crate::types::{CcId, CongCtrl, CongCtrlAlg, PktSeqNumber, StreamId};

const DEFAULT_MSS: u32 = 1460;
const CUBIC_C: f64 = 0.4;
const CUBIC_BETA: f64 = 0.7;
const INITIAL_SSTHRESH: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SlowStart,
    CongestionAvoidance,
    Recovery,
}

pub struct CubicController {
    cc_id: CcId,
    mss: u32,
    cwnd_bytes: f64,
    ssthresh_bytes: u32,
    phase: Phase,

    w_max: f64,
    epoch_start: Option<Instant>,
    origin_point: f64,
    k: f64,
    min_rtt_us: f64,

    hystart_round_start: Option<Instant>,
    hystart_min_rtt_sample_us: f64,
    hystart_done: bool,

    prr_delivered: u32,
    prr_out: u32,
    recovery_seq: PktSeqNumber,

    pif: i32,
    bif: i64,
    rexmit_pacing: bool,
}

impl CubicController {
    pub fn new(cc_id: CcId) -> Self {
        CubicController {
            cc_id,
            mss: DEFAULT_MSS,
            cwnd_bytes: (DEFAULT_MSS * 10) as f64,
            ssthresh_bytes: INITIAL_SSTHRESH,
            phase: Phase::SlowStart,
            w_max: 0.0,
            epoch_start: None,
            origin_point: 0.0,
            k: 0.0,
            min_rtt_us: f64::MAX,
            hystart_round_start: None,
            hystart_min_rtt_sample_us: f64::MAX,
            hystart_done: false,
            prr_delivered: 0,
            prr_out: 0,
            recovery_seq: 0,
            pif: 0,
            bif: 0,
            rexmit_pacing: true,
        }
    }

    fn cubic_window(&self, t_secs: f64) -> f64 {
        let k = self.k;
        CUBIC_C * (t_secs - k).powi(3) * (self.mss as f64) + self.w_max
    }

    fn on_congestion_event(&mut self, now: Instant) {
        if self.phase == Phase::Recovery {
            return;
        }
        self.w_max = self.cwnd_bytes;
        self.ssthresh_bytes = ((self.cwnd_bytes * CUBIC_BETA) as u32).max(2 * self.mss);
        self.cwnd_bytes = self.ssthresh_bytes as f64;
        self.k = ((self.w_max * (1.0 - CUBIC_BETA)) / (CUBIC_C * self.mss as f64))
            .max(0.0)
            .cbrt();
        self.epoch_start = Some(now);
        self.origin_point = self.w_max;
        self.phase = Phase::Recovery;
        self.prr_delivered = 0;
        self.prr_out = 0;
    }
}

impl CongestionController for CubicController {
    fn configure(&mut self, params: &CongCtrl) -> bool {
        params.validate().is_ok()
    }

    fn connected(&mut self, _now: Instant, rtt: Duration) {
        self.min_rtt_us = rtt.as_micros() as f64;
    }

    fn use_rexmit_pacing(&self) -> bool {
        self.rexmit_pacing
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
        if self.hystart_round_start.is_none() {
            self.hystart_round_start = Some(Instant::now());
        }
        if rtt_us < self.hystart_min_rtt_sample_us {
            self.hystart_min_rtt_sample_us = rtt_us;
        }
        // HyStart: if this round's min RTT has risen noticeably above the
        // lifetime min, slow start is inflating queueing delay — exit early.
        if !self.hystart_done
            && self.phase == Phase::SlowStart
            && self.hystart_min_rtt_sample_us > self.min_rtt_us + self.min_rtt_us.max(1000.0) * 0.125
        {
            self.hystart_done = true;
            self.ssthresh_bytes = self.cwnd_bytes as u32;
            self.phase = Phase::CongestionAvoidance;
        }
    }

    fn on_packet_lost(&mut self, _stream_id: StreamId, ack_time: Instant, seq: PktSeqNumber, _bytes: u32) -> bool {
        if self.phase != Phase::Recovery {
            self.recovery_seq = seq;
            self.on_congestion_event(ack_time);
        }
        true
    }

    fn on_packet_acked(
        &mut self,
        _stream_id: StreamId,
        ack_time: Instant,
        seq: PktSeqNumber,
        bytes: u32,
        counts: FlightCounts,
    ) {
        self.pif = counts.pif;
        self.bif = counts.bif;

        match self.phase {
            Phase::SlowStart => {
                self.cwnd_bytes += bytes as f64;
                if self.cwnd_bytes >= self.ssthresh_bytes as f64 {
                    self.phase = Phase::CongestionAvoidance;
                    self.epoch_start = None;
                }
            }
            Phase::CongestionAvoidance => {
                let epoch = *self.epoch_start.get_or_insert(ack_time);
                let t = ack_time.duration_since(epoch).as_secs_f64();
                if self.w_max == 0.0 {
                    self.w_max = self.cwnd_bytes;
                    self.k = 0.0;
                }
                let target = self.cubic_window(t).max(self.cwnd_bytes);
                let increment = ((target - self.cwnd_bytes) / self.cwnd_bytes).max(0.0) * self.mss as f64;
                self.cwnd_bytes += increment.max(self.mss as f64 / self.cwnd_bytes.max(1.0));
            }
            Phase::Recovery => {
                self.prr_delivered += bytes;
                // PRR: keep sends proportional to what's been delivered
                // since recovery started, rather than bursting cwnd back.
                if seq.wrapping_sub(self.recovery_seq) < (1 << 30) {
                    self.phase = Phase::CongestionAvoidance;
                    self.epoch_start = Some(ack_time);
                }
            }
        }
    }

    fn on_ack_pkt_processing_done(&mut self, _ack_time: Instant) {}

    fn on_packet_sent(&mut self, _stream_id: StreamId, _send_time: Instant, _seq: PktSeqNumber, bytes: u32) {
        self.pif += 1;
        self.bif += bytes as i64;
        if self.phase == Phase::Recovery {
            self.prr_out += bytes;
        }
    }

    fn on_packet_resent(&mut self, _stream_id: StreamId, _send_time: Instant, _seq: PktSeqNumber, bytes: u32) {
        self.bif += bytes as i64;
    }

    fn on_rto(&mut self, _pkt_rexmit: bool) {
        self.ssthresh_bytes = ((self.cwnd_bytes * CUBIC_BETA) as u32).max(2 * self.mss);
        self.cwnd_bytes = self.mss as f64;
        self.phase = Phase::SlowStart;
        self.w_max = 0.0;
        self.epoch_start = None;
        self.hystart_done = false;
    }

    fn on_outage_end(&mut self) {
        self.cwnd_bytes = self.mss as f64;
        self.phase = Phase::SlowStart;
    }

    fn update_counts(&mut self, pif_adj: i32, bif_adj: i64) {
        self.pif = (self.pif + pif_adj).max(0);
        self.bif = (self.bif + bif_adj).max(0);
    }

    fn can_send(&mut self, _now: Instant, bytes: u32) -> bool {
        (self.bif + bytes as i64) as f64 <= self.cwnd_bytes
    }

    fn can_resend(&mut self, now: Instant, bytes: u32, is_tail_loss_probe: bool) -> bool {
        is_tail_loss_probe || self.can_send(now, bytes)
    }

    fn time_until_send(&mut self, _now: Instant) -> Duration {
        Duration::ZERO
    }

    fn send_pacing_rate(&mut self) -> u64 {
        if self.min_rtt_us <= 0.0 || self.min_rtt_us == f64::MAX {
            return u64::MAX;
        }
        ((self.cwnd_bytes * 2.0) / (self.min_rtt_us / 1_000_000.0)) as u64
    }

    fn send_rate(&mut self) -> u64 {
        self.send_pacing_rate()
    }

    fn in_slow_start(&self) -> bool {
        self.phase == Phase::SlowStart
    }

    fn in_recovery(&self) -> bool {
        self.phase == Phase::Recovery
    }

    fn congestion_window(&self) -> u32 {
        self.cwnd_bytes as u32
    }

    fn slow_start_threshold(&self) -> u32 {
        self.ssthresh_bytes
    }

    fn congestion_control_type(&self) -> CongCtrlAlg {
        CongCtrlAlg::TcpCubicCc
    }
}
