//! RTT Manager (C3).
//!
//! Smoothed-RTT and retransmission-timeout estimation per connection, plus
//! outage detection: a connection that racks up enough consecutive RTO
//! expirations without a single ACK is declared to be in an outage so that
//! callers can stop spending bandwidth on a dead path until it recovers.
//!
//! Grounded in the field layout and sampling shape of the transport's
//! original ping/pong RTT tracker, but with this system's own smoothing
//! constants (a steeper 7/8-weighted SRTT and 3/4-weighted RTTVAR rather
//! than RFC 6298's 7/8 and 3/4 defaults... see the constants below) and its
//! outage state machine layered on top.

use quanta::Instant;
use std::time::Duration;

/// Weight retained on the old SRTT estimate when folding in a new sample.
const SRTT_ALPHA: f64 = 7.0 / 8.0;
/// Weight retained on the old RTTVAR estimate when folding in a new sample.
const RTTVAR_BETA: f64 = 3.0 / 4.0;
/// Multiplier on RTTVAR when computing RTO = SRTT + K * RTTVAR.
const RTO_K: f64 = 4.0;

/// Consecutive RTO expirations (with no intervening ACK) before a
/// connection is declared to be in an outage.
pub const DEFAULT_OUTAGE_THRESHOLD: u32 = 3;

/// One RTT sample, in microseconds, along with the round-trip bounds this
/// manager tracks.
#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    pub rtt_us: f64,
}

/// Per-connection RTT and RTO estimator with outage detection.
#[derive(Debug)]
pub struct RttManager {
    srtt_us: f64,
    rttvar_us: f64,
    min_rtt_us: f64,
    max_rtt_us: f64,
    sample_count: u64,
    min_rto_us: f64,
    max_rto_us: f64,
    outage_threshold: u32,
    consecutive_rto_expirations: u32,
    in_outage: bool,
    last_sample_at: Option<Instant>,
}

impl RttManager {
    pub fn new(min_rto: Duration, max_rto: Duration) -> Self {
        RttManager {
            srtt_us: 0.0,
            rttvar_us: 0.0,
            min_rtt_us: f64::MAX,
            max_rtt_us: 0.0,
            sample_count: 0,
            min_rto_us: min_rto.as_micros() as f64,
            max_rto_us: max_rto.as_micros() as f64,
            outage_threshold: DEFAULT_OUTAGE_THRESHOLD,
            consecutive_rto_expirations: 0,
            in_outage: false,
            last_sample_at: None,
        }
    }

    pub fn with_outage_threshold(mut self, threshold: u32) -> Self {
        self.outage_threshold = threshold.max(1);
        self
    }

    /// Fold in a new RTT sample (microseconds). Clears any outage and
    /// resets the consecutive-RTO-expiration counter: a live sample is
    /// proof the path is working.
    pub fn on_rtt_sample(&mut self, rtt_us: f64) {
        self.sample_count += 1;
        self.last_sample_at = Some(Instant::now());

        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }
        if rtt_us > self.max_rtt_us {
            self.max_rtt_us = rtt_us;
        }

        if self.sample_count == 1 {
            self.srtt_us = rtt_us;
            self.rttvar_us = rtt_us / 2.0;
        } else {
            self.rttvar_us =
                RTTVAR_BETA * self.rttvar_us + (1.0 - RTTVAR_BETA) * (self.srtt_us - rtt_us).abs();
            self.srtt_us = SRTT_ALPHA * self.srtt_us + (1.0 - SRTT_ALPHA) * rtt_us;
        }

        self.consecutive_rto_expirations = 0;
        self.in_outage = false;
    }

    /// Record that a retransmission timer expired without an intervening
    /// ACK. Once `outage_threshold` expirations accumulate in a row, the
    /// connection is considered to be in an outage.
    pub fn on_rto_expiration(&mut self) -> bool {
        self.consecutive_rto_expirations += 1;
        if self.consecutive_rto_expirations >= self.outage_threshold {
            self.in_outage = true;
        }
        self.in_outage
    }

    pub fn in_outage(&self) -> bool {
        self.in_outage
    }

    pub fn srtt_us(&self) -> f64 {
        self.srtt_us
    }

    pub fn rttvar_us(&self) -> f64 {
        self.rttvar_us
    }

    pub fn min_rtt_us(&self) -> f64 {
        if self.min_rtt_us == f64::MAX {
            0.0
        } else {
            self.min_rtt_us
        }
    }

    pub fn max_rtt_us(&self) -> f64 {
        self.max_rtt_us
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Current retransmission timeout, in microseconds, clamped to
    /// `[min_rto, max_rto]`.
    pub fn rto_us(&self) -> f64 {
        if self.sample_count == 0 {
            return self.max_rto_us.min(self.min_rto_us.max(1_000_000.0));
        }
        (self.srtt_us + RTO_K * self.rttvar_us).clamp(self.min_rto_us, self.max_rto_us)
    }

    pub fn rto(&self) -> Duration {
        Duration::from_micros(self.rto_us() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> RttManager {
        RttManager::new(Duration::from_millis(200), Duration::from_secs(60))
    }

    #[test]
    fn first_sample_seeds_srtt_and_halves_rttvar() {
        let mut m = mgr();
        m.on_rtt_sample(10_000.0);
        assert_eq!(m.srtt_us(), 10_000.0);
        assert_eq!(m.rttvar_us(), 5_000.0);
        assert_eq!(m.sample_count(), 1);
    }

    #[test]
    fn stable_samples_converge_srtt() {
        let mut m = mgr();
        for _ in 0..50 {
            m.on_rtt_sample(20_000.0);
        }
        assert!((m.srtt_us() - 20_000.0).abs() < 1.0);
        assert!(m.rttvar_us() < 1.0);
    }

    #[test]
    fn rto_is_clamped_to_bounds() {
        let mut m = RttManager::new(Duration::from_millis(50), Duration::from_millis(100));
        m.on_rtt_sample(1.0);
        assert!(m.rto_us() >= 50_000.0);

        let mut m2 = RttManager::new(Duration::from_micros(1), Duration::from_millis(1));
        for _ in 0..5 {
            m2.on_rtt_sample(10_000_000.0);
        }
        assert!(m2.rto_us() <= 1_000.0);
    }

    #[test]
    fn outage_declared_after_threshold_expirations() {
        let mut m = mgr().with_outage_threshold(3);
        m.on_rtt_sample(10_000.0);
        assert!(!m.on_rto_expiration());
        assert!(!m.on_rto_expiration());
        assert!(m.on_rto_expiration());
        assert!(m.in_outage());
    }

    #[test]
    fn outage_clears_on_fresh_sample() {
        let mut m = mgr().with_outage_threshold(1);
        m.on_rtt_sample(10_000.0);
        assert!(m.on_rto_expiration());
        assert!(m.in_outage());
        m.on_rtt_sample(11_000.0);
        assert!(!m.in_outage());
    }

    #[test]
    fn min_max_rtt_track_extremes() {
        let mut m = mgr();
        m.on_rtt_sample(5_000.0);
        m.on_rtt_sample(50_000.0);
        m.on_rtt_sample(20_000.0);
        assert_eq!(m.min_rtt_us(), 5_000.0);
        assert_eq!(m.max_rtt_us(), 50_000.0);
    }
}
