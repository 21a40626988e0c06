//! Connection configuration.

use std::time::Duration;

use crate::control::AggregationPolicy;
use crate::core::ConfigError;
use crate::core::constants::{
    DEFAULT_INITIAL_DSN, DEFAULT_MSL, DEFAULT_RECV_BUFFER_SIZE, DEFAULT_SEND_BUFFER_SIZE,
    INITIAL_RTO,
};
use crate::scheduler::SchedulerConfig;

/// Validated settings for a [`Connection`](super::Connection).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    send_buffer_size: usize,
    recv_buffer_size: usize,
    msl: Duration,
    initial_rto: Duration,
    initial_dsn: u64,
    peer_initial_dsn: u64,
    scheduler: SchedulerConfig,
    aggregation: AggregationPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            msl: DEFAULT_MSL,
            initial_rto: INITIAL_RTO,
            initial_dsn: DEFAULT_INITIAL_DSN,
            peer_initial_dsn: DEFAULT_INITIAL_DSN,
            scheduler: SchedulerConfig::default(),
            aggregation: AggregationPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Send buffer size in bytes.
    pub fn send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    /// Receive buffer size in bytes.
    pub fn recv_buffer_size(&self) -> usize {
        self.recv_buffer_size
    }

    /// Maximum segment lifetime.
    pub fn msl(&self) -> Duration {
        self.msl
    }

    /// How long TIME_WAIT lasts.
    pub fn time_wait(&self) -> Duration {
        self.msl.saturating_mul(2)
    }

    /// RTO of a subflow before any RTT sample.
    pub fn initial_rto(&self) -> Duration {
        self.initial_rto
    }

    /// First data sequence number this side sends.
    pub fn initial_dsn(&self) -> u64 {
        self.initial_dsn
    }

    /// First data sequence number expected from the peer.
    pub fn peer_initial_dsn(&self) -> u64 {
        self.peer_initial_dsn
    }

    /// Scheduler selection.
    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// Window aggregation policy.
    pub fn aggregation(&self) -> AggregationPolicy {
        self.aggregation
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.send_buffer_size == 0 {
            return Err(ConfigError::Zero("send buffer size"));
        }
        if self.recv_buffer_size == 0 {
            return Err(ConfigError::Zero("receive buffer size"));
        }
        if self.msl.is_zero() {
            return Err(ConfigError::Zero("maximum segment lifetime"));
        }
        if self.initial_rto.is_zero() {
            return Err(ConfigError::Zero("initial rto"));
        }
        self.scheduler.validate()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the send buffer size.
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.config.send_buffer_size = size;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the maximum segment lifetime.
    pub fn msl(mut self, msl: Duration) -> Self {
        self.config.msl = msl;
        self
    }

    /// Set the RTO used before any RTT sample.
    pub fn initial_rto(mut self, rto: Duration) -> Self {
        self.config.initial_rto = rto;
        self
    }

    /// Set the first data sequence number sent.
    pub fn initial_dsn(mut self, dsn: u64) -> Self {
        self.config.initial_dsn = dsn;
        self
    }

    /// Set the first data sequence number expected from the peer.
    pub fn peer_initial_dsn(mut self, dsn: u64) -> Self {
        self.config.peer_initial_dsn = dsn;
        self
    }

    /// Choose the scheduler.
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    /// Choose the window aggregation policy.
    pub fn aggregation(mut self, policy: AggregationPolicy) -> Self {
        self.config.aggregation = policy;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RatioConfig;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConnectionConfig::builder().build().unwrap();
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(config.time_wait(), DEFAULT_MSL * 2);
    }

    #[test]
    fn test_builder_options() {
        let config = ConnectionConfig::builder()
            .send_buffer_size(4096)
            .recv_buffer_size(8192)
            .msl(Duration::from_secs(1))
            .peer_initial_dsn(100)
            .scheduler(SchedulerConfig::RatioRoundRobin(RatioConfig::default()))
            .build()
            .unwrap();

        assert_eq!(config.send_buffer_size(), 4096);
        assert_eq!(config.recv_buffer_size(), 8192);
        assert_eq!(config.time_wait(), Duration::from_secs(2));
        assert_eq!(config.peer_initial_dsn(), 100);
        assert!(matches!(config.scheduler(), SchedulerConfig::RatioRoundRobin(_)));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let err = ConnectionConfig::builder().recv_buffer_size(0).build().unwrap_err();
        assert_eq!(err, ConfigError::Zero("receive buffer size"));

        let err = ConnectionConfig::builder().msl(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::Zero("maximum segment lifetime"));
    }

    #[test]
    fn test_rejects_bad_scheduler() {
        let err = ConnectionConfig::builder()
            .scheduler(SchedulerConfig::RatioRoundRobin(RatioConfig {
                period: 0,
                fast_slots: 0,
                race_ahead_limit: None,
            }))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("ratio period"));
    }
}
