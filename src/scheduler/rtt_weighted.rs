//! Round robin over subflows weighted by inverse RTT.

use std::time::Duration;

use tracing::trace;

use super::{MetaBinding, MetaView, Schedule, ScheduledMapping};
use crate::core::constants::{WEIGHT_FLOOR, WEIGHT_REFRESH_INTERVAL};
use crate::core::{ConfigError, ConnectionToken, SchedulerError, SubflowId};
use crate::mapping::SequenceMapper;

/// Smallest RTT used when computing weights, so a zero estimate cannot divide by zero.
const MIN_WEIGHT_RTT: Duration = Duration::from_micros(1);

/// Parameters of [`RttWeighted`].
#[derive(Debug, Clone, PartialEq)]
pub struct RttWeightedConfig {
    /// Minimum time between weight recomputations.
    pub refresh_interval: Duration,
    /// Subflows with a lower normalized weight carry no data.
    pub weight_floor: f64,
}

impl Default for RttWeightedConfig {
    fn default() -> Self {
        Self {
            refresh_interval: WEIGHT_REFRESH_INTERVAL,
            weight_floor: WEIGHT_FLOOR,
        }
    }
}

impl RttWeightedConfig {
    /// Check the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Zero("weight refresh interval"));
        }
        if !(0.0..1.0).contains(&self.weight_floor) {
            return Err(ConfigError::WeightFloor(self.weight_floor));
        }
        Ok(())
    }
}

/// Rotates through active subflows, skipping those whose RTT makes them
/// much slower than the best path.
///
/// Each subflow's weight is `min_rtt / rtt`, normalized so the weights sum
/// to one.
#[derive(Debug, Clone)]
pub struct RttWeighted {
    config: RttWeightedConfig,
    weights: Vec<f64>,
    last_refresh: Option<Duration>,
    cursor: Option<usize>,
    binding: MetaBinding,
}

impl RttWeighted {
    /// Create a scheduler.
    pub fn new(config: RttWeightedConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            last_refresh: None,
            cursor: None,
            binding: MetaBinding::default(),
        }
    }

    /// Current normalized weights, by active position.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Recompute weights if the refresh interval elapsed or the set of
    /// active subflows changed size.
    pub fn refresh_weights(&mut self, view: &dyn MetaView) {
        let n = view.active_count();
        let now = view.now();
        let due = match self.last_refresh {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.config.refresh_interval,
        };
        if !due && self.weights.len() == n {
            return;
        }

        let rtts: Vec<f64> = (0..n)
            .filter_map(|i| view.active(i))
            .map(|p| p.rtt.max(MIN_WEIGHT_RTT).as_secs_f64())
            .collect();
        let min_rtt = rtts.iter().copied().fold(f64::INFINITY, f64::min);
        let raw: Vec<f64> = rtts.iter().map(|rtt| min_rtt / rtt).collect();
        let total: f64 = raw.iter().sum();

        self.weights = raw.into_iter().map(|w| w / total).collect();
        self.last_refresh = Some(now);
        trace!(weights = ?self.weights, "refreshed rtt weights");
    }
}

impl Schedule for RttWeighted {
    fn set_meta(&mut self, token: ConnectionToken) -> Result<(), SchedulerError> {
        self.binding.bind(token)
    }

    fn generate_mapping(&mut self, view: &dyn MetaView) -> Option<ScheduledMapping> {
        if !self.binding.serves(view) {
            return None;
        }
        let n = view.active_count();
        if n == 0 {
            return None;
        }
        self.refresh_weights(view);

        for _ in 0..n {
            let index = self.cursor.map_or(0, |c| (c + 1) % n);
            self.cursor = Some(index);

            if self.weights.get(index).copied().unwrap_or(0.0) < self.config.weight_floor {
                continue;
            }
            let Some(path) = view.active(index) else {
                continue;
            };
            if let Some((dsn, length)) = SequenceMapper::generate_mapping(view, &path) {
                trace!(subflow = %path.id, dsn, length, "rtt weighted");
                return Some(ScheduledMapping {
                    subflow: path.id,
                    dsn,
                    length,
                });
            }
        }
        None
    }

    fn subflow_for_control_packet(&mut self, view: &dyn MetaView) -> Option<SubflowId> {
        let mut best: Option<(Duration, SubflowId)> = None;
        for path in (0..view.active_count()).filter_map(|i| view.active(i)) {
            if best.is_none_or(|(rtt, _)| path.rtt < rtt) {
                best = Some((path.rtt, path.id));
            }
        }
        best.map(|(_, id)| id)
    }
}
