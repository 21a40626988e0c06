//! Ratio round robin between a fast and a slow subflow.

use tracing::{debug, trace};

use super::{MetaBinding, MetaView, Schedule, ScheduledMapping};
use crate::core::constants::{RATIO_FAST_SLOTS, RATIO_PERIOD, RATIO_RACE_AHEAD_LIMIT};
use crate::core::{ConfigError, ConnectionToken, SchedulerError, SubflowId};
use crate::mapping::SequenceMapper;

/// Parameters of [`RatioRoundRobin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioConfig {
    /// Slots in one period.
    pub period: u32,
    /// Leading slots of each period that go to the fast subflow.
    pub fast_slots: u32,
    /// Unacknowledged bytes allowed while the slow path lags. `None` disables
    /// the gate.
    pub race_ahead_limit: Option<u64>,
}

impl Default for RatioConfig {
    fn default() -> Self {
        Self {
            period: RATIO_PERIOD,
            fast_slots: RATIO_FAST_SLOTS,
            race_ahead_limit: Some(RATIO_RACE_AHEAD_LIMIT),
        }
    }
}

impl RatioConfig {
    /// Check the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period == 0 {
            return Err(ConfigError::Zero("ratio period"));
        }
        if self.fast_slots > self.period {
            return Err(ConfigError::RatioOutOfRange {
                fast: self.fast_slots,
                period: self.period,
            });
        }
        Ok(())
    }
}

/// Sends `fast_slots` of every `period` mappings on the fast subflow and the
/// rest on the slow one.
///
/// By default the fast subflow is the first active subflow and the slow one
/// the second; [`RatioRoundRobin::designate`] overrides that. With a single
/// active subflow every slot goes to it.
///
/// Once more than `race_ahead_limit` bytes are unacknowledged while the slow
/// subflow still holds an unacknowledged mapping, generation stops until the
/// slow path catches up.
#[derive(Debug, Clone)]
pub struct RatioRoundRobin {
    config: RatioConfig,
    cycle: u32,
    binding: MetaBinding,
    designated: Option<(SubflowId, SubflowId)>,
    slow_outstanding_until: Option<u64>,
}

impl RatioRoundRobin {
    /// Create a scheduler with the given ratio.
    pub fn new(config: RatioConfig) -> Self {
        Self {
            config,
            cycle: 0,
            binding: MetaBinding::default(),
            designated: None,
            slow_outstanding_until: None,
        }
    }

    /// Pin the fast and slow roles to specific subflows.
    pub fn designate(&mut self, fast: SubflowId, slow: SubflowId) {
        self.designated = Some((fast, slow));
    }

    /// Position in the current period.
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Whether generation is held back waiting for the slow path.
    pub fn is_waiting_for_slow_path(&mut self, view: &dyn MetaView) -> bool {
        let acked = view.data_acked();
        if self.slow_outstanding_until.is_some_and(|end| acked >= end) {
            self.slow_outstanding_until = None;
        }

        let Some(limit) = self.config.race_ahead_limit else {
            return false;
        };
        let unacked = view.next_tx_dsn().saturating_sub(acked);
        unacked > limit && self.slow_outstanding_until.is_some()
    }

    /// Active positions of the fast and slow subflows.
    fn roles(&self, view: &dyn MetaView) -> (usize, usize) {
        let n = view.active_count();
        let position = |id: SubflowId| (0..n).find(|&i| view.active(i).is_some_and(|p| p.id == id));

        if let Some((fast, slow)) = self.designated
            && let (Some(f), Some(s)) = (position(fast), position(slow))
        {
            return (f, s);
        }
        (0, if n > 1 { 1 } else { 0 })
    }
}

impl Schedule for RatioRoundRobin {
    fn set_meta(&mut self, token: ConnectionToken) -> Result<(), SchedulerError> {
        self.binding.bind(token)
    }

    fn generate_mapping(&mut self, view: &dyn MetaView) -> Option<ScheduledMapping> {
        if !self.binding.serves(view) || view.active_count() == 0 || view.pending_bytes() == 0 {
            return None;
        }

        if self.is_waiting_for_slow_path(view) {
            debug!(next_dsn = view.next_tx_dsn(), acked = view.data_acked(), "waiting for slow path");
            return None;
        }

        let slot = self.cycle;
        self.cycle = (self.cycle + 1) % self.config.period;

        let (fast, slow) = self.roles(view);
        let to_fast = slot < self.config.fast_slots;
        let index = if to_fast { fast } else { slow };
        let path = view.active(index)?;

        let (dsn, length) = SequenceMapper::generate_mapping(view, &path)?;
        if !to_fast && fast != slow {
            self.slow_outstanding_until = Some(dsn + u64::from(length));
        }

        trace!(slot, subflow = %path.id, dsn, length, "ratio round robin");
        Some(ScheduledMapping {
            subflow: path.id,
            dsn,
            length,
        })
    }

    fn subflow_for_control_packet(&mut self, view: &dyn MetaView) -> Option<SubflowId> {
        view.active(0).map(|p| p.id)
    }
}
