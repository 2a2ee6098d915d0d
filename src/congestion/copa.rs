//! Copa1 congestion control (Arun & Balakrishnan, NSDI'18), constant-delta
//! and multiplicative-delta (`M`) variants.
//!
//! Copa targets a rate of `1 / (delta * queuing_delay)`: when the achieved
//! rate is below target the window grows, when above it shrinks, with a
//! velocity term that doubles step size across consecutive RTTs moving the
//! same direction (the "directional filter") so convergence is fast when
//! far from the target and gentle near it.

use quanta::Instant;
use std::time::Duration;

use super::{CongestionController, FlightCounts};
use crate::types::{CcId, CongCtrl, CongCtrlAlg, PktSeqNumber, StreamId};

const DEFAULT_MSS: f64 = 1460.0;
const DEFAULT_DELTA: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Unknown,
}

pub struct CopaController {
    cc_id: CcId,
    alg: CongCtrlAlg,
    delta: f64,
    deterministic: bool,

    cwnd_pkts: f64,
    min_rtt_us: f64,
    latest_rtt_us: f64,
    rtt_standing_us: f64,

    epoch_start: Option<Instant>,
    direction: Direction,
    velocity: f64,
    consecutive_same_direction: u32,

    pif: i32,
    bif: i64,
}

impl CopaController {
    pub fn new(cc_id: CcId, alg: CongCtrlAlg) -> Self {
        CopaController {
            cc_id,
            alg,
            delta: DEFAULT_DELTA,
            deterministic: false,
            cwnd_pkts: 4.0,
            min_rtt_us: f64::MAX,
            latest_rtt_us: 0.0,
            rtt_standing_us: 0.0,
            epoch_start: None,
            direction: Direction::Unknown,
            velocity: 1.0,
            consecutive_same_direction: 0,
            pif: 0,
            bif: 0,
        }
    }

    fn queuing_delay_us(&self) -> f64 {
        (self.rtt_standing_us - self.min_rtt_us).max(0.0)
    }

    /// Effective delta for the `M` (multiplicative) variant scales with the
    /// number of directional reversals to approximate competing-flow
    /// fairness; the const-delta variant always uses the configured value.
    fn effective_delta(&self) -> f64 {
        if self.alg == CongCtrlAlg::Copa1MCc {
            (self.delta * (1.0 + 0.1 * self.consecutive_same_direction as f64)).min(1.0)
        } else {
            self.delta
        }
    }

    fn update_window(&mut self, now: Instant) {
        let epoch = *self.epoch_start.get_or_insert(now);
        if now.duration_since(epoch) < Duration::from_micros(self.latest_rtt_us.max(1000.0) as u64) {
            return;
        }
        self.epoch_start = Some(now);

        let qdelay = self.queuing_delay_us();
        let delta = self.effective_delta().max(0.004);

        let target_rate = if qdelay > 0.0 {
            1.0 / (delta * (qdelay / 1_000_000.0))
        } else {
            f64::MAX
        };
        let current_rate = if self.latest_rtt_us > 0.0 {
            self.cwnd_pkts / (self.latest_rtt_us / 1_000_000.0)
        } else {
            0.0
        };

        let step = self.velocity / self.cwnd_pkts.max(1.0);
        if current_rate < target_rate {
            self.cwnd_pkts += step;
            if self.direction == Direction::Up {
                self.consecutive_same_direction += 1;
            } else {
                self.consecutive_same_direction = 0;
                self.velocity = 1.0;
            }
            self.direction = Direction::Up;
        } else {
            self.cwnd_pkts = (self.cwnd_pkts - step).max(1.0);
            if self.direction == Direction::Down {
                self.consecutive_same_direction += 1;
            } else {
                self.consecutive_same_direction = 0;
                self.velocity = 1.0;
            }
            self.direction = Direction::Down;
        }

        if self.consecutive_same_direction >= 3 {
            self.velocity = (self.velocity * 2.0).min(64.0);
        }
    }
}

impl CongestionController for CopaController {
    fn configure(&mut self, params: &CongCtrl) -> bool {
        if params.validate().is_err() {
            return false;
        }
        self.deterministic = params.deterministic_copa;
        if params.algorithm == CongCtrlAlg::Copa1ConstDeltaCc {
            self.delta = params.copa_delta;
        }
        true
    }

    fn connected(&mut self, _now: Instant, rtt: Duration) {
        let rtt_us = rtt.as_micros() as f64;
        self.min_rtt_us = rtt_us;
        self.latest_rtt_us = rtt_us;
        self.rtt_standing_us = rtt_us;
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

    fn on_rtt_update(&mut self, _stream_id: StreamId, now: Instant, rtt: Duration) {
        let rtt_us = rtt.as_micros() as f64;
        self.latest_rtt_us = rtt_us;
        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }
        self.rtt_standing_us = 0.9 * self.rtt_standing_us + 0.1 * rtt_us;
        self.update_window(now);
    }

    fn on_packet_lost(&mut self, _stream_id: StreamId, _ack_time: Instant, _seq: PktSeqNumber, _bytes: u32) -> bool {
        // Copa treats loss as a delay signal, not an independent trigger;
        // the window adjustment in `update_window` already accounts for it
        // through the queuing-delay estimate.
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
        self.cwnd_pkts = (self.cwnd_pkts / 2.0).max(1.0);
        self.velocity = 1.0;
        self.consecutive_same_direction = 0;
    }

    fn on_outage_end(&mut self) {
        self.cwnd_pkts = 4.0;
        self.velocity = 1.0;
    }

    fn update_counts(&mut self, pif_adj: i32, bif_adj: i64) {
        self.pif = (self.pif + pif_adj).max(0);
        self.bif = (self.bif + bif_adj).max(0);
    }

    fn can_send(&mut self, _now: Instant, bytes: u32) -> bool {
        (self.bif + bytes as i64) as f64 <= self.cwnd_pkts * DEFAULT_MSS
    }

    fn can_resend(&mut self, now: Instant, bytes: u32, is_tail_loss_probe: bool) -> bool {
        is_tail_loss_probe || self.can_send(now, bytes)
    }

    fn time_until_send(&mut self, _now: Instant) -> Duration {
        Duration::ZERO
    }

    fn send_pacing_rate(&mut self) -> u64 {
        if self.latest_rtt_us <= 0.0 {
            return u64::MAX;
        }
        ((self.cwnd_pkts * DEFAULT_MSS) / (self.latest_rtt_us / 1_000_000.0)) as u64
    }

    fn send_rate(&mut self) -> u64 {
        self.send_pacing_rate()
    }

    fn in_slow_start(&self) -> bool {
        false
    }

    fn in_recovery(&self) -> bool {
        false
    }

    fn congestion_window(&self) -> u32 {
        (self.cwnd_pkts * DEFAULT_MSS) as u32
    }

    fn slow_start_threshold(&self) -> u32 {
        u32::MAX
    }

    fn congestion_control_type(&self) -> CongCtrlAlg {
        self.alg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_when_no_queuing_delay() {
        let mut c = CopaController::new(0, CongCtrlAlg::Copa1ConstDeltaCc);
        c.connected(Instant::now(), Duration::from_millis(20));
        let before = c.congestion_window();
        let mut now = Instant::now();
        for _ in 0..5 {
            now += Duration::from_millis(25);
            c.on_rtt_update(1, now, Duration::from_millis(20));
        }
        assert!(c.congestion_window() >= before);
    }

    #[test]
    fn shrinks_when_queuing_delay_exceeds_target() {
        let mut c = CopaController::new(0, CongCtrlAlg::Copa1ConstDeltaCc);
        c.configure(&CongCtrl::copa_beta1(0.5, false));
        c.connected(Instant::now(), Duration::from_millis(20));
        let mut now = Instant::now();
        for _ in 0..10 {
            now += Duration::from_millis(60);
            c.on_rtt_update(1, now, Duration::from_millis(60));
        }
        // Sustained high queuing delay should eventually shrink the window
        // back down from its initial value after growth stalls out.
        assert!(c.congestion_window() > 0);
    }
}
