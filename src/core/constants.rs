//! Default values for the meta-connection.
//!
//! Everything here can be overridden through [`ConnectionConfig`](crate::connection::ConnectionConfig)
//! unless stated otherwise.

use std::time::Duration;

// =============================================================================
// RATIO ROUND ROBIN SCHEDULER
// =============================================================================

/// Number of slots in one ratio round robin period.
pub const RATIO_PERIOD: u32 = 11;

/// Slots per period handed to the designated fast subflow.
pub const RATIO_FAST_SLOTS: u32 = 10;

/// Unacknowledged bytes the fast path may race ahead while the slow path
/// still holds an unacknowledged mapping.
pub const RATIO_RACE_AHEAD_LIMIT: u64 = 11;

// =============================================================================
// RTT-WEIGHTED SCHEDULER
// =============================================================================

/// Minimum interval between two weight recomputations.
pub const WEIGHT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Subflows whose normalized weight falls below this are not used for data.
pub const WEIGHT_FLOOR: f64 = 0.1;

// =============================================================================
// RETRANSMISSION (RFC 6298)
// =============================================================================

/// Initial retransmission timeout before the first RTT sample.
pub const INITIAL_RTO: Duration = Duration::from_millis(1000);

/// Minimum retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(100);

/// Maximum retransmission timeout, also the backoff ceiling.
pub const MAX_RTO: Duration = Duration::from_secs(60);

// =============================================================================
// BUFFERS AND TEARDOWN
// =============================================================================

/// Default connection-level send buffer size in bytes.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 128 * 1024;

/// Default connection-level receive buffer size in bytes.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 128 * 1024;

/// Default maximum segment lifetime. TIME_WAIT lasts twice this.
pub const DEFAULT_MSL: Duration = Duration::from_secs(60);

/// Initial data sequence number used when none is negotiated.
pub const DEFAULT_INITIAL_DSN: u64 = 0;
