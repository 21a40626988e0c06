//! Events into the connection and notifications out of it.

use std::time::Duration;

use bytes::Bytes;

use crate::core::{SubflowId, TcpState, TimerId};
use crate::mapping::Mapping;

/// Why a subflow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubflowFailure {
    /// The peer refused the path's handshake.
    Refused,
    /// The path was reset.
    Reset,
}

/// Something that happened to the connection.
///
/// Events are handled one at a time by
/// [`Connection::handle_event`](super::Connection::handle_event).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A subflow's state machine moved.
    SubflowStateChanged {
        /// Subflow.
        subflow: SubflowId,
        /// State before.
        old: TcpState,
        /// State after.
        new: TcpState,
    },
    /// A subflow's congestion window changed.
    SubflowWindowChanged {
        /// Subflow.
        subflow: SubflowId,
        /// Window before.
        old: u32,
        /// Window after.
        new: u32,
    },
    /// A subflow delivered data in order on its own sequence space.
    SubflowData {
        /// Subflow.
        subflow: SubflowId,
        /// Mapping the data arrived under.
        mapping: Mapping,
        /// The bytes.
        payload: Bytes,
    },
    /// Cumulative connection-level acknowledgement from the peer.
    DataAck {
        /// Subflow it arrived on.
        subflow: SubflowId,
        /// Next data sequence number the peer expects.
        dack: u64,
    },
    /// The peer's connection-level close marker.
    DataFin {
        /// Subflow it arrived on.
        subflow: SubflowId,
        /// Sequence number the marker occupies.
        dsn: u64,
    },
    /// A subflow measured a round trip.
    RttSample {
        /// Subflow.
        subflow: SubflowId,
        /// The sample.
        rtt: Duration,
    },
    /// A subflow failed.
    SubflowFailed {
        /// Subflow.
        subflow: SubflowId,
        /// Failure kind.
        failure: SubflowFailure,
    },
    /// A timer scheduled by the connection expired.
    TimerFired(TimerId),
}

/// Notification for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppNotification {
    /// An active open completed.
    Connected,
    /// A passive open completed.
    Accepted,
    /// New in-order data is readable.
    DataReceived,
    /// The peer closed its direction.
    PeerClosed,
    /// The connection is fully closed.
    Closed,
    /// The connection could not be opened.
    ConnectionFailed,
}
