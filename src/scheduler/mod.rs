//! Packet schedulers.
//!
//! A scheduler decides which active subflow carries the next chunk of the
//! connection's send buffer. It is advisory only: it reads the connection
//! through a [`MetaView`] and returns a [`ScheduledMapping`]; the connection
//! commits it.
//!
//! The set of policies is closed. [`Scheduler`] holds one of them and is
//! chosen from [`SchedulerConfig`] when the connection is built.

mod round_robin;
mod rtt_weighted;

pub use round_robin::*;
pub use rtt_weighted::*;

use std::time::Duration;

use crate::core::{ConfigError, ConnectionToken, SchedulerError, SubflowId};

/// Snapshot of one active subflow as seen by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathMetrics {
    /// Subflow id.
    pub id: SubflowId,
    /// Bytes the path can accept now.
    pub available_window: u32,
    /// Congestion window.
    pub window: u32,
    /// Smoothed RTT.
    pub rtt: Duration,
    /// Maximum segment size.
    pub segment_size: u32,
    /// Whether this is the master subflow.
    pub is_master: bool,
}

/// Read-only view of the connection handed to schedulers.
///
/// Active subflows are addressed by position, in registration order.
pub trait MetaView {
    /// Connection this view belongs to.
    fn token(&self) -> ConnectionToken;

    /// Number of established subflows.
    fn active_count(&self) -> usize;

    /// Metrics of the active subflow at `index`.
    fn active(&self, index: usize) -> Option<PathMetrics>;

    /// Next data sequence number to send.
    fn next_tx_dsn(&self) -> u64;

    /// Bytes queued but not yet mapped.
    fn pending_bytes(&self) -> u64;

    /// Connection-level window left after unacknowledged data.
    fn available_window(&self) -> u32;

    /// Highest cumulative connection-level acknowledgement.
    fn data_acked(&self) -> u64;

    /// Current time on the connection's clock.
    fn now(&self) -> Duration;
}

/// A scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledMapping {
    /// Subflow to carry the bytes.
    pub subflow: SubflowId,
    /// First data sequence number.
    pub dsn: u64,
    /// Number of bytes.
    pub length: u32,
}

/// Interface every scheduling policy implements.
pub trait Schedule {
    /// Bind the scheduler to its connection. Allowed exactly once.
    fn set_meta(&mut self, token: ConnectionToken) -> Result<(), SchedulerError>;

    /// Pick the next subflow and byte range, or `None` if nothing can be sent.
    fn generate_mapping(&mut self, view: &dyn MetaView) -> Option<ScheduledMapping>;

    /// Subflow that should carry an empty control packet.
    fn subflow_for_control_packet(&mut self, view: &dyn MetaView) -> Option<SubflowId>;
}

/// Scheduler policy selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerConfig {
    /// Fixed fast/slow ratio.
    RatioRoundRobin(RatioConfig),
    /// Weights proportional to inverse RTT.
    RttWeighted(RttWeightedConfig),
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::RttWeighted(RttWeightedConfig::default())
    }
}

impl SchedulerConfig {
    /// Check the policy parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            SchedulerConfig::RatioRoundRobin(c) => c.validate(),
            SchedulerConfig::RttWeighted(c) => c.validate(),
        }
    }
}

/// One of the available scheduling policies.
#[derive(Debug, Clone)]
pub enum Scheduler {
    /// Ratio round robin.
    RoundRobin(RatioRoundRobin),
    /// RTT-weighted round robin.
    RttWeighted(RttWeighted),
}

impl Scheduler {
    /// Build the policy named by `config`.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        match config {
            SchedulerConfig::RatioRoundRobin(c) => Scheduler::RoundRobin(RatioRoundRobin::new(c.clone())),
            SchedulerConfig::RttWeighted(c) => Scheduler::RttWeighted(RttWeighted::new(c.clone())),
        }
    }

    /// Short policy name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Scheduler::RoundRobin(_) => "ratio-round-robin",
            Scheduler::RttWeighted(_) => "rtt-weighted",
        }
    }
}

impl Schedule for Scheduler {
    fn set_meta(&mut self, token: ConnectionToken) -> Result<(), SchedulerError> {
        match self {
            Scheduler::RoundRobin(s) => s.set_meta(token),
            Scheduler::RttWeighted(s) => s.set_meta(token),
        }
    }

    fn generate_mapping(&mut self, view: &dyn MetaView) -> Option<ScheduledMapping> {
        match self {
            Scheduler::RoundRobin(s) => s.generate_mapping(view),
            Scheduler::RttWeighted(s) => s.generate_mapping(view),
        }
    }

    fn subflow_for_control_packet(&mut self, view: &dyn MetaView) -> Option<SubflowId> {
        match self {
            Scheduler::RoundRobin(s) => s.subflow_for_control_packet(view),
            Scheduler::RttWeighted(s) => s.subflow_for_control_packet(view),
        }
    }
}

/// Records which connection a scheduler serves.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MetaBinding(Option<ConnectionToken>);

impl MetaBinding {
    pub(crate) fn bind(&mut self, token: ConnectionToken) -> Result<(), SchedulerError> {
        match self.0 {
            Some(current) => Err(SchedulerError::AlreadyBound(current)),
            None => {
                self.0 = Some(token);
                Ok(())
            }
        }
    }

    pub(crate) fn serves(&self, view: &dyn MetaView) -> bool {
        let serves = self.0 == Some(view.token());
        if !serves {
            tracing::warn!(view = %view.token(), "scheduler asked for a connection it is not bound to");
        }
        serves
    }
}
