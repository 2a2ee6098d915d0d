//! Fixed-rate pacer, used only to hold congestion control constant while
//! testing other parts of the transport (loss recovery, FEC, stream
//! scheduling). Not a real congestion control algorithm: it never reacts to
//! loss or delay, just paces at whatever rate was configured at connect
//! time.

use quanta::Instant;
use std::time::Duration;

use super::{CongestionController, FlightCounts};
use crate::types::{CcId, CongCtrl, CongCtrlAlg, PktSeqNumber, StreamId};

pub struct FixedRateController {
    cc_id: CcId,
    send_rate_bps: u64,
    next_send_time: Option<Instant>,
    pif: i32,
    bif: i64,
}

impl FixedRateController {
    pub fn new(cc_id: CcId) -> Self {
        FixedRateController {
            cc_id,
            send_rate_bps: 0,
            next_send_time: None,
            pif: 0,
            bif: 0,
        }
    }

    fn update_next_send_time(&mut self, now: Instant, bytes: u32) {
        if self.send_rate_bps == 0 {
            self.next_send_time = Some(now);
            return;
        }
        let secs = (bytes as f64 * 8.0) / self.send_rate_bps as f64;
        let base = self.next_send_time.unwrap_or(now).max(now);
        self.next_send_time = Some(base + Duration::from_secs_f64(secs));
    }
}

impl CongestionController for FixedRateController {
    fn configure(&mut self, params: &CongCtrl) -> bool {
        if params.validate().is_err() {
            return false;
        }
        self.send_rate_bps = params.fixed_send_rate;
        true
    }

    fn connected(&mut self, now: Instant, _rtt: Duration) {
        self.next_send_time = Some(now);
    }

    fn use_rexmit_pacing(&self) -> bool {
        true
    }

    fn use_cwnd_for_cap_est(&self) -> bool {
        false
    }

    fn activate_stream(&mut self, _stream_id: StreamId, _init_seq: PktSeqNumber) -> bool {
        true
    }

    fn deactivate_stream(&mut self, _stream_id: StreamId) -> bool {
        true
    }

    fn on_ack_pkt_processing_start(&mut self, _ack_time: Instant) {}

    fn on_rtt_update(&mut self, _stream_id: StreamId, _ack_time: Instant, _rtt: Duration) {}

    fn on_packet_lost(&mut self, _stream_id: StreamId, _ack_time: Instant, _seq: PktSeqNumber, _bytes: u32) -> bool {
        true
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

    fn on_packet_sent(&mut self, _stream_id: StreamId, now: Instant, _seq: PktSeqNumber, bytes: u32) {
        self.pif += 1;
        self.bif += bytes as i64;
        self.update_next_send_time(now, bytes);
    }

    fn on_packet_resent(&mut self, _stream_id: StreamId, now: Instant, _seq: PktSeqNumber, bytes: u32) {
        self.bif += bytes as i64;
        self.update_next_send_time(now, bytes);
    }

    fn on_rto(&mut self, _pkt_rexmit: bool) {}

    fn on_outage_end(&mut self) {}

    fn update_counts(&mut self, pif_adj: i32, bif_adj: i64) {
        self.pif = (self.pif + pif_adj).max(0);
        self.bif = (self.bif + bif_adj).max(0);
    }

    fn can_send(&mut self, _now: Instant, _bytes: u32) -> bool {
        true
    }

    fn can_resend(&mut self, _now: Instant, _bytes: u32, _is_tail_loss_probe: bool) -> bool {
        true
    }

    fn time_until_send(&mut self, now: Instant) -> Duration {
        match self.next_send_time {
            Some(t) if t > now => t.duration_since(now),
            _ => Duration::ZERO,
        }
    }

    fn send_pacing_rate(&mut self) -> u64 {
        self.send_rate_bps
    }

    fn send_rate(&mut self) -> u64 {
        self.send_rate_bps
    }

    fn in_slow_start(&self) -> bool {
        false
    }

    fn in_recovery(&self) -> bool {
        false
    }

    fn congestion_window(&self) -> u32 {
        0
    }

    fn slow_start_threshold(&self) -> u32 {
        0
    }

    fn congestion_control_type(&self) -> CongCtrlAlg {
        CongCtrlAlg::FixedRateTestCc
    }
}
