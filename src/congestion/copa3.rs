//! Copa3 congestion control — the `COPA_CC` algorithm. Builds on Copa's
//! velocity-based window update with a standing-RTT/min-RTT delay tracker
//! kept in fixed-size ring bins (constant memory and processing cost
//! instead of a true sliding window), a peer min-RTT exchange carried in
//! CC_SYNC frames to improve bidirectional accuracy, and a configurable
//! anti-jitter term that nudges the RTT estimate down toward the minimum so
//! jittery paths don't look permanently congested.
//!
//! The same selective damper used by Copa2 is reused here: an unusually
//! large queuing delay spike holds the window for one RTT, then stays quiet
//! for one more, instead of reacting immediately.

use quanta::Instant;
use std::time::Duration;

use super::{CongestionController, FlightCounts};
use crate::types::{CcId, CongCtrl, CongCtrlAlg, PktSeqNumber, StreamId};

const NOMINAL_PKT_BYTES: f64 = 1000.0;
const DEFAULT_DELTA: f64 = 0.5;
const DELAY_TRACKER_BINS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VelDir {
    Neither,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DamperState {
    MonitorHigh,
    Hold,
    Wait,
}

/// Tracks the minimum of a quantity over a rolling window made of fixed-size
/// bins rather than a true sliding window: one bin is retired and a new one
/// started whenever the configured window duration elapses, trading a
/// little timing slop for O(1) memory and update cost.
#[derive(Debug)]
struct DelayTracker {
    bins: [f64; DELAY_TRACKER_BINS],
    next_index: usize,
    count: usize,
    recent_min: f64,
    bin_start: Instant,
    bin_duration: Duration,
}

impl DelayTracker {
    fn new(now: Instant, bin_duration: Duration) -> Self {
        DelayTracker {
            bins: [f64::MAX; DELAY_TRACKER_BINS],
            next_index: 0,
            count: 0,
            recent_min: f64::MAX,
            bin_start: now,
            bin_duration,
        }
    }

    fn update(&mut self, sample: f64, now: Instant) -> f64 {
        if sample < self.recent_min {
            self.recent_min = sample;
        }
        if now.duration_since(self.bin_start) >= self.bin_duration {
            self.bins[self.next_index] = self.recent_min;
            self.next_index = (self.next_index + 1) % DELAY_TRACKER_BINS;
            self.count = (self.count + 1).min(DELAY_TRACKER_BINS);
            self.recent_min = sample;
            self.bin_start = now;
        }
        self.bins
            .iter()
            .take(self.count.max(1))
            .cloned()
            .fold(self.recent_min, f64::min)
    }
}

pub struct Copa3Controller {
    cc_id: CcId,
    delta: f64,
    /// Set by `set_tcp_friendliness`: when `Some(n)`, `delta` is scaled down
    /// by `n` competing TCP flows instead of held at its configured value,
    /// biasing Copa3 toward TCP's throughput-over-latency tradeoff.
    tcp_friendly_flows: Option<u32>,
    anti_jitter_us: f64,

    standing_rtt: Option<DelayTracker>,
    min_rtt_tracker: Option<DelayTracker>,

    min_rtt_us: f64,
    loc_min_rtt_us: f64,
    rmt_min_rtt_us: f64,
    standing_rtt_us: f64,

    damper_state: DamperState,
    damper_hold_cnt: u32,

    cwnd_pkts: f64,
    velocity: u32,
    prev_direction: VelDir,
    same_direction_cnt: u32,

    sync_send_seq: u16,
    sync_recv_seq: u16,
    pending_sync: bool,

    pif: i32,
    bif: i64,
}

impl Copa3Controller {
    pub fn new(cc_id: CcId) -> Self {
        Copa3Controller {
            cc_id,
            delta: DEFAULT_DELTA,
            tcp_friendly_flows: None,
            anti_jitter_us: 0.0,
            standing_rtt: None,
            min_rtt_tracker: None,
            min_rtt_us: f64::MAX,
            loc_min_rtt_us: f64::MAX,
            rmt_min_rtt_us: f64::MAX,
            standing_rtt_us: 0.0,
            damper_state: DamperState::MonitorHigh,
            damper_hold_cnt: 0,
            cwnd_pkts: 3.0,
            velocity: 1,
            prev_direction: VelDir::Neither,
            same_direction_cnt: 0,
            sync_send_seq: 0,
            sync_recv_seq: 0,
            pending_sync: false,
            pif: 0,
            bif: 0,
        }
    }

    fn queuing_delay_us(&self) -> f64 {
        let adjusted = (self.standing_rtt_us - self.anti_jitter_us).max(self.min_rtt_us);
        (adjusted - self.min_rtt_us).max(0.0)
    }

    fn nominal_pif(&self) -> f64 {
        (self.bif as f64 / NOMINAL_PKT_BYTES).max(1.0)
    }

    /// `delta` as actually used by the window update: `self.delta` unless
    /// TCP-friendliness mode is on, in which case it shrinks with the
    /// number of competing flows so Copa3 claims a TCP-comparable share of
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

        if qdelay_pkts_equiv < 2.0 && self.damper_state == DamperState::MonitorHigh {
            self.damper_state = DamperState::Hold;
            self.damper_hold_cnt = 0;
            return;
        }
        if self.damper_state == DamperState::Hold {
            self.damper_hold_cnt += 1;
            self.damper_state = DamperState::Wait;
            return;
        }
        if self.damper_state == DamperState::Wait {
            self.damper_state = DamperState::MonitorHigh;
            return;
        }

        let current_rate = if self.standing_rtt_us > 0.0 {
            self.cwnd_pkts / (self.standing_rtt_us / 1_000_000.0)
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

impl CongestionController for Copa3Controller {
    fn set_tcp_friendliness(&mut self, num_flows: u32) -> bool {
        self.tcp_friendly_flows = Some(num_flows.max(1));
        true
    }

    fn configure(&mut self, params: &CongCtrl) -> bool {
        if params.validate().is_err() {
            return false;
        }
        self.anti_jitter_us = params.copa_anti_jitter * 1_000_000.0;
        true
    }

    fn connected(&mut self, now: Instant, rtt: Duration) {
        let rtt_us = rtt.as_micros() as f64;
        self.min_rtt_us = rtt_us;
        self.loc_min_rtt_us = rtt_us;
        self.standing_rtt_us = rtt_us;
        // Minimum RTT window: the larger of 28x the current min RTT or 0.8s.
        let win = Duration::from_secs_f64((28.0 * rtt_us / 1_000_000.0).max(0.8));
        self.min_rtt_tracker = Some(DelayTracker::new(now, win));
        self.standing_rtt = Some(DelayTracker::new(now, Duration::from_secs_f64((rtt_us / 1_000_000.0).max(0.001))));
        self.pending_sync = true;
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

        if let Some(tracker) = self.min_rtt_tracker.as_mut() {
            self.loc_min_rtt_us = tracker.update(rtt_us, now);
        }
        self.min_rtt_us = self.loc_min_rtt_us.min(self.rmt_min_rtt_us);

        if let Some(tracker) = self.standing_rtt.as_mut() {
            self.standing_rtt_us = tracker.update(rtt_us, now);
        } else {
            self.standing_rtt_us = rtt_us;
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
    }

    fn update_counts(&mut self, pif_adj: i32, bif_adj: i64) {
        self.pif = (self.pif + pif_adj).max(0);
        self.bif = (self.bif + bif_adj).max(0);
    }

    fn can_send(&mut self, _now: Instant, bytes: u32) -> bool {
        (self.bif + bytes as i64) as f64 <= self.cwnd_pkts * NOMINAL_PKT_BYTES
    }

    fn can_resend(&mut self, now: Instant, bytes: u32, is_tail_loss_probe: bool) -> bool {
        is_tail_loss_probe || self.can_send(now, bytes)
    }

    fn time_until_send(&mut self, _now: Instant) -> Duration {
        Duration::ZERO
    }

    fn send_pacing_rate(&mut self) -> u64 {
        if self.standing_rtt_us <= 0.0 {
            return u64::MAX;
        }
        // Copa3 paces at cwnd / RTTstanding (not 2x) to cut burstiness in
        // the RTT samples it feeds back into its own window update.
        ((self.cwnd_pkts * NOMINAL_PKT_BYTES) / (self.standing_rtt_us / 1_000_000.0)) as u64
    }

    fn send_rate(&mut self) -> u64 {
        self.send_pacing_rate()
    }

    fn get_sync_params(&self) -> Option<(u16, u32)> {
        if self.pending_sync && self.loc_min_rtt_us.is_finite() {
            Some((self.sync_send_seq, self.loc_min_rtt_us as u32))
        } else {
            None
        }
    }

    fn process_sync_params(&mut self, _now: Instant, seq_num: u16, cc_params: u32) {
        if seq_num.wrapping_sub(self.sync_recv_seq) == 0 && self.sync_recv_seq != 0 {
            return;
        }
        self.sync_recv_seq = seq_num;
        self.rmt_min_rtt_us = cc_params as f64;
        self.min_rtt_us = self.loc_min_rtt_us.min(self.rmt_min_rtt_us);
        self.sync_send_seq = self.sync_send_seq.wrapping_add(1);
    }

    fn in_slow_start(&self) -> bool {
        false
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
        CongCtrlAlg::CopaCc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_with_no_queuing_delay() {
        let mut c = Copa3Controller::new(0);
        c.connected(Instant::now(), Duration::from_millis(20));
        let before = c.congestion_window();
        let mut now = Instant::now();
        for _ in 0..8 {
            now += Duration::from_millis(25);
            c.on_rtt_update(1, now, Duration::from_millis(20));
        }
        assert!(c.congestion_window() >= before);
    }

    #[test]
    fn tcp_friendliness_shrinks_effective_delta() {
        let mut c = Copa3Controller::new(0);
        assert_eq!(c.effective_delta(), DEFAULT_DELTA);
        assert!(c.set_tcp_friendliness(4));
        assert_eq!(c.effective_delta(), DEFAULT_DELTA / 4.0);
    }

    #[test]
    fn peer_min_rtt_lowers_local_estimate() {
        let mut c = Copa3Controller::new(0);
        c.connected(Instant::now(), Duration::from_millis(50));
        c.process_sync_params(Instant::now(), 1, 20_000);
        assert!(c.min_rtt_us <= 20_000.0);
    }

    #[test]
    fn rto_resets_window() {
        let mut c = Copa3Controller::new(0);
        c.connected(Instant::now(), Duration::from_millis(20));
        c.on_rto(true);
        assert_eq!(c.congestion_window(), 3 * NOMINAL_PKT_BYTES as u32);
    }
}
