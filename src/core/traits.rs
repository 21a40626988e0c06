//! Seams to the collaborators the meta-connection drives but does not own:
//! the per-path transport and the timer substrate.

use std::time::Duration;

use bytes::Bytes;

use super::error::PathError;
use super::ids::TimerId;
use crate::mapping::Mapping;

/// Connection-level control signal carried in an otherwise empty packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    /// Connection-level close marker at `dsn`.
    DataFin {
        /// Sequence number the marker occupies.
        dsn: u64,
    },
    /// Cumulative connection-level acknowledgement.
    DataAck {
        /// Next data sequence number expected.
        dack: u64,
    },
}

/// Reliable single-path transport underneath one subflow.
///
/// Implementations handle their own handshake, congestion control and
/// segment-level retransmission. State and window changes are reported back
/// as [`ConnectionEvent`](crate::connection::ConnectionEvent)s.
pub trait PathTransport: Send {
    /// Bytes the path can accept right now.
    fn available_window(&self) -> u32;

    /// Current congestion window in bytes.
    fn window(&self) -> u32;

    /// Current smoothed RTT estimate.
    fn rtt(&self) -> Duration;

    /// Maximum segment size.
    fn segment_size(&self) -> u32;

    /// Hand `payload` to the path, tagged with `mapping`.
    ///
    /// Once this returns `Ok` the mapping is committed and cannot be recalled.
    fn send(&mut self, mapping: &Mapping, payload: Bytes) -> Result<(), PathError>;

    /// Send an empty packet carrying `flag`.
    fn send_control(&mut self, flag: ControlFlag) -> Result<(), PathError>;

    /// Start closing the path.
    fn close(&mut self) -> Result<(), PathError>;
}

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Connection-level retransmission timeout.
    Retransmit,
    /// TIME_WAIT expiry (twice the MSL).
    TimeWait,
}

/// Cancelable one-shot timers plus a monotonic clock.
///
/// Expirations are fed back to the connection as
/// [`ConnectionEvent::TimerFired`](crate::connection::ConnectionEvent::TimerFired).
pub trait TimerService {
    /// Time elapsed since the service started.
    fn now(&self) -> Duration;

    /// Schedule a timer firing `delay` from now.
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId;

    /// Cancel a pending timer. Unknown or expired ids are ignored.
    fn cancel(&mut self, id: TimerId);
}
