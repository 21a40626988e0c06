//! Per-subflow retransmission timeout tracking (RFC 6298).
//!
//! The subflow's own transport owns its RTT estimate; the connection keeps
//! this estimator to time connection-level retransmissions on that subflow
//! and to back the timeout off when they fire.

use std::time::Duration;

use crate::core::constants::{INITIAL_RTO, MAX_RTO, MIN_RTO};

/// Clock granularity term of the RTO formula.
const GRANULARITY: Duration = Duration::from_millis(100);

/// RFC 6298 estimator with exponential backoff capped at [`MAX_RTO`].
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    srtt: Duration,
    rttvar: Duration,
    rto: Duration,
    initial_rto: Duration,
    initialized: bool,
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new(INITIAL_RTO)
    }
}

impl RtoEstimator {
    /// Create an estimator with no samples and the given starting RTO.
    pub fn new(initial_rto: Duration) -> Self {
        let initial_rto = initial_rto.min(MAX_RTO);
        Self {
            srtt: Duration::ZERO,
            rttvar: Duration::ZERO,
            rto: initial_rto,
            initial_rto,
            initialized: false,
        }
    }

    /// Feed an RTT sample.
    ///
    /// - First sample: SRTT = R, RTTVAR = R / 2
    /// - Then: RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - R|, SRTT = 7/8 SRTT + 1/8 R
    pub fn update(&mut self, sample: Duration) {
        if !self.initialized {
            self.srtt = sample;
            self.rttvar = sample / 2;
            self.initialized = true;
        } else {
            self.rttvar = self.rttvar * 3 / 4 + self.srtt.abs_diff(sample) / 4;
            self.srtt = self.srtt * 7 / 8 + sample / 8;
        }
        self.rto = self.computed_rto();
    }

    /// Smoothed RTT, zero before the first sample.
    pub fn srtt(&self) -> Duration {
        self.srtt
    }

    /// RTT variance.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Whether at least one sample has been seen.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Double the RTO, capped at [`MAX_RTO`]. Returns the new value.
    pub fn backoff(&mut self) -> Duration {
        self.rto = self.rto.saturating_mul(2).min(MAX_RTO);
        self.rto
    }

    /// Undo any backoff.
    pub fn reset_backoff(&mut self) {
        self.rto = if self.initialized {
            self.computed_rto()
        } else {
            self.initial_rto
        };
    }

    fn computed_rto(&self) -> Duration {
        (self.srtt + GRANULARITY.max(self.rttvar * 4)).clamp(MIN_RTO, MAX_RTO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_rto() {
        let est = RtoEstimator::default();
        assert!(!est.is_initialized());
        assert_eq!(est.rto(), INITIAL_RTO);
    }

    #[test]
    fn test_first_sample() {
        let mut est = RtoEstimator::default();
        est.update(Duration::from_millis(100));

        assert_eq!(est.srtt(), Duration::from_millis(100));
        assert_eq!(est.rttvar(), Duration::from_millis(50));
        // 100 + max(100, 200)
        assert_eq!(est.rto(), Duration::from_millis(300));
    }

    #[test]
    fn test_smoothing_moves_toward_sample() {
        let mut est = RtoEstimator::default();
        est.update(Duration::from_millis(100));
        est.update(Duration::from_millis(180));

        assert_eq!(est.srtt(), Duration::from_millis(110));
        assert_eq!(est.rttvar(), Duration::from_millis(57) + Duration::from_micros(500));
    }

    #[test]
    fn test_backoff_doubles() {
        let mut est = RtoEstimator::new(Duration::from_secs(1));
        assert_eq!(est.backoff(), Duration::from_secs(2));
        assert_eq!(est.backoff(), Duration::from_secs(4));
        assert_eq!(est.backoff(), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let mut est = RtoEstimator::new(Duration::from_secs(40));
        assert_eq!(est.backoff(), Duration::from_secs(60));
        assert_eq!(est.backoff(), MAX_RTO);
    }

    #[test]
    fn test_min_rto() {
        let mut est = RtoEstimator::default();
        est.update(Duration::from_micros(100));
        assert!(est.rto() >= MIN_RTO);
    }

    #[test]
    fn test_reset_backoff() {
        let mut est = RtoEstimator::default();
        est.backoff();
        est.reset_backoff();
        assert_eq!(est.rto(), INITIAL_RTO);

        est.update(Duration::from_millis(100));
        est.backoff();
        est.reset_backoff();
        assert_eq!(est.rto(), Duration::from_millis(300));
    }
}
