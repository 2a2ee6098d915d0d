//! Capacity Estimator (C4).
//!
//! Tracks two numbers over a one-second tumbling window: the *channel*
//! capacity (everything put on the wire, including retransmissions and FEC
//! repair) and the *transport* capacity (useful, in-order application
//! bytes). Congestion controllers that keep their own cwnd-based capacity
//! signal (`use_cwnd_for_cap_est`) are sampled from their reported
//! cwnd/RTT instead of the byte counters, per [`crate::congestion`].
//!
//! Grounded in the windowed-rate shape of the transport's rate counter and
//! EWMA helpers, but tumbling (reset every window) rather than sliding, and
//! gated by report-suppression so a caller doesn't get a capacity callback
//! on every tick when nothing has materially changed.

use std::time::Duration;

use quanta::Instant;

use crate::stats::Ewma;

/// Relative change (as a fraction of the last reported value) required
/// before a new capacity sample is surfaced.
const DEFAULT_REPORT_THRESHOLD: f64 = 0.10;

/// A capacity estimate pair, in bytes/sec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityEstimate {
    pub channel_bps: f64,
    pub transport_bps: f64,
}

/// One-second tumbling-window capacity estimator.
pub struct CapacityEstimator {
    window: Duration,
    window_start: Instant,
    channel_bytes: u64,
    transport_bytes: u64,
    channel_ewma: Ewma,
    transport_ewma: Ewma,
    last_reported: Option<CapacityEstimate>,
    report_threshold: f64,
}

impl CapacityEstimator {
    pub fn new() -> Self {
        CapacityEstimator {
            window: Duration::from_secs(1),
            window_start: Instant::now(),
            channel_bytes: 0,
            transport_bytes: 0,
            channel_ewma: Ewma::new(0.2),
            transport_ewma: Ewma::new(0.2),
            last_reported: None,
            report_threshold: DEFAULT_REPORT_THRESHOLD,
        }
    }

    pub fn with_report_threshold(mut self, threshold: f64) -> Self {
        self.report_threshold = threshold;
        self
    }

    /// Account bytes placed on the wire (original data, retransmissions,
    /// and FEC repair all count toward the channel figure).
    pub fn on_channel_bytes(&mut self, bytes: u64) {
        self.channel_bytes += bytes;
    }

    /// Account useful application-payload bytes (no retransmissions, no
    /// FEC repair, no duplicates).
    pub fn on_transport_bytes(&mut self, bytes: u64) {
        self.transport_bytes += bytes;
    }

    /// Drive the estimator forward. When the window has elapsed, folds the
    /// window's byte counts into the EWMAs and returns a new estimate if it
    /// has moved enough to be worth reporting.
    ///
    /// When `cwnd_estimate` is `Some((cwnd_bytes, rtt_us))` — i.e. the
    /// active congestion controller's `use_cwnd_for_cap_est()` is true —
    /// the channel figure is computed from `cwnd / rtt` instead of the
    /// byte counters for this window, matching how such controllers define
    /// their own notion of capacity.
    pub fn tick(&mut self, now: Instant, cwnd_estimate: Option<(u64, f64)>) -> Option<CapacityEstimate> {
        if now.duration_since(self.window_start) < self.window {
            return None;
        }

        let elapsed = now.duration_since(self.window_start).as_secs_f64().max(1e-6);

        let channel_bps = if let Some((cwnd_bytes, rtt_us)) = cwnd_estimate {
            if rtt_us > 0.0 {
                (cwnd_bytes as f64) / (rtt_us / 1_000_000.0)
            } else {
                self.channel_bytes as f64 / elapsed
            }
        } else {
            self.channel_bytes as f64 / elapsed
        };
        let transport_bps = self.transport_bytes as f64 / elapsed;

        self.channel_ewma.update(channel_bps);
        self.transport_ewma.update(transport_bps);

        self.channel_bytes = 0;
        self.transport_bytes = 0;
        self.window_start = now;

        let candidate = CapacityEstimate {
            channel_bps: self.channel_ewma.value(),
            transport_bps: self.transport_ewma.value(),
        };

        if self.should_report(&candidate) {
            self.last_reported = Some(candidate);
            Some(candidate)
        } else {
            None
        }
    }

    fn should_report(&self, candidate: &CapacityEstimate) -> bool {
        match self.last_reported {
            None => true,
            Some(prev) => {
                relative_delta(prev.channel_bps, candidate.channel_bps) > self.report_threshold
                    || relative_delta(prev.transport_bps, candidate.transport_bps)
                        > self.report_threshold
            }
        }
    }
}

impl Default for CapacityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn relative_delta(prev: f64, cur: f64) -> f64 {
    if prev.abs() < f64::EPSILON {
        if cur.abs() < f64::EPSILON {
            0.0
        } else {
            1.0
        }
    } else {
        ((cur - prev) / prev).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_report_before_window_elapses() {
        let mut est = CapacityEstimator::new();
        est.on_channel_bytes(1000);
        let now = Instant::now();
        assert!(est.tick(now, None).is_none());
    }

    #[test]
    fn first_window_always_reports() {
        let mut est = CapacityEstimator::new();
        est.on_channel_bytes(125_000);
        est.on_transport_bytes(100_000);
        let later = Instant::now() + Duration::from_millis(1100);
        let sample = est.tick(later, None);
        assert!(sample.is_some());
    }

    #[test]
    fn suppresses_report_on_small_change() {
        let mut est = CapacityEstimator::new().with_report_threshold(0.5);
        est.on_channel_bytes(125_000);
        est.on_transport_bytes(100_000);
        let t1 = Instant::now() + Duration::from_millis(1100);
        let first = est.tick(t1, None);
        assert!(first.is_some());

        est.on_channel_bytes(126_000);
        est.on_transport_bytes(101_000);
        let t2 = t1 + Duration::from_millis(1100);
        let second = est.tick(t2, None);
        assert!(second.is_none());
    }

    #[test]
    fn cwnd_gated_estimate_uses_cwnd_over_rtt() {
        let mut est = CapacityEstimator::new();
        let t1 = Instant::now() + Duration::from_millis(1100);
        let sample = est.tick(t1, Some((100_000, 50_000.0))).unwrap();
        // 100_000 bytes / 50ms = 2_000_000 bytes/sec
        assert!((sample.channel_bps - 2_000_000.0).abs() < 1.0);
    }
}
