//! Connection-level congestion window.

use tracing::trace;

/// How per-subflow windows combine into the connection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum AggregationPolicy {
    /// Plain sum of every subflow window, whatever its classification.
    ///
    /// A deliberate simplification: it ignores slow-start thresholds and
    /// coupled increase, so the connection may be more aggressive than a
    /// single TCP flow on a shared bottleneck.
    #[default]
    FlatSum,
}

/// Maintains the connection window from subflow windows.
#[derive(Debug, Clone, Default)]
pub struct CongestionAggregator {
    policy: AggregationPolicy,
    total: u32,
}

impl CongestionAggregator {
    /// Create an aggregator using `policy`.
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy, total: 0 }
    }

    /// Policy in use.
    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Recompute from the windows of every registered subflow.
    ///
    /// Call on every subflow window change and state transition.
    pub fn recompute(&mut self, windows: impl IntoIterator<Item = u32>) -> u32 {
        self.total = match self.policy {
            AggregationPolicy::FlatSum => windows.into_iter().fold(0u32, u32::saturating_add),
        };
        trace!(total = self.total, "connection window recomputed");
        self.total
    }

    /// Last computed connection window.
    pub fn total_window(&self) -> u32 {
        self.total
    }

    /// Window left after `unacked` bytes in flight, never negative.
    pub fn available_window(&self, unacked: u64) -> u32 {
        u64::from(self.total).saturating_sub(unacked) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_sum() {
        let mut agg = CongestionAggregator::default();
        assert_eq!(agg.recompute([1000, 2000, 500]), 3500);
        assert_eq!(agg.total_window(), 3500);
    }

    #[test]
    fn test_recompute_replaces_previous_total() {
        let mut agg = CongestionAggregator::default();
        agg.recompute([1000, 2000]);
        assert_eq!(agg.recompute([1000]), 1000);
        assert_eq!(agg.recompute(std::iter::empty()), 0);
    }

    #[test]
    fn test_available_window_saturates() {
        let mut agg = CongestionAggregator::default();
        agg.recompute([1000]);
        assert_eq!(agg.available_window(400), 600);
        assert_eq!(agg.available_window(5000), 0);
    }

    #[test]
    fn test_sum_saturates() {
        let mut agg = CongestionAggregator::new(AggregationPolicy::FlatSum);
        assert_eq!(agg.recompute([u32::MAX, 10]), u32::MAX);
    }
}
