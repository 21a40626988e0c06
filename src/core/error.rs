//! Error types for the meta-connection.
//!
//! Errors are split by how the connection must react: fatal errors are
//! consistency violations that poison the connection, everything else is
//! logged and retried on a later event.

use thiserror::Error;

use super::ids::{ConnectionToken, SubflowId};
use super::state::TcpState;

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A size or interval that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Fast slots exceed the ratio period.
    #[error("fast slots ({fast}) must not exceed the ratio period ({period})")]
    RatioOutOfRange {
        /// Configured fast slots.
        fast: u32,
        /// Configured period.
        period: u32,
    },

    /// Weight floor outside `[0, 1)`.
    #[error("weight floor {0} must lie in [0, 1)")]
    WeightFloor(f64),

    /// The global log subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Errors in mapping bookkeeping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// Mappings must cover at least one byte.
    #[error("zero-length mapping")]
    ZeroLength,

    /// Payload size disagrees with the mapping it arrived with.
    #[error("payload of {actual} bytes does not match mapping length {expected}")]
    LengthMismatch {
        /// Mapping length.
        expected: u32,
        /// Payload length.
        actual: usize,
    },

    /// Mapping overlaps one already recorded on the same subflow.
    #[error("subflow sequence range {ssn}+{length} overlaps an existing mapping")]
    SsnOverlap {
        /// Head subflow sequence number.
        ssn: u32,
        /// Mapping length.
        length: u32,
    },
}

/// Failures reported by a per-path transport.
///
/// All of these are recoverable: the attempt is dropped and retried on the
/// next event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// No room in the path's send buffer.
    #[error("path send buffer full")]
    WouldBlock,

    /// The path is closed or closing.
    #[error("path closed")]
    Closed,

    /// Anything else the path wants to report.
    #[error("path error: {0}")]
    Other(String),
}

/// Errors raised by schedulers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// `set_meta` was called on a scheduler already bound to a connection.
    #[error("scheduler already bound to {0}")]
    AlreadyBound(ConnectionToken),
}

/// Connection-level errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Operation requires an established connection.
    #[error("connection not connected (state {0})")]
    NotConnected(TcpState),

    /// No subflow with this id is registered.
    #[error("unknown subflow {0}")]
    UnknownSubflow(SubflowId),

    /// A second master subflow was registered.
    #[error("connection already has a master subflow")]
    DuplicateMaster,

    /// No subflow is available to carry a control packet.
    #[error("no active subflow")]
    NoActiveSubflow,

    /// A subflow reported a transition the state machine forbids.
    #[error("subflow {subflow} made illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Offending subflow.
        subflow: SubflowId,
        /// Previous state.
        from: TcpState,
        /// Reported new state.
        to: TcpState,
    },

    /// A subflow's reported previous state disagrees with the recorded one.
    #[error("subflow {subflow} reported {reported} but was recorded as {recorded}")]
    StateMismatch {
        /// Offending subflow.
        subflow: SubflowId,
        /// State the registry holds.
        recorded: TcpState,
        /// State the notification claims.
        reported: TcpState,
    },

    /// The connection was in a state where this step cannot happen.
    #[error("unexpected connection state {state} while {context}")]
    UnexpectedState {
        /// Connection state at the time.
        state: TcpState,
        /// What was being done.
        context: &'static str,
    },

    /// Bytes were extracted from a subflow but could not be stored.
    #[error("data might have been lost: {len} bytes at dsn {dsn}")]
    DataLoss {
        /// Head data sequence number of the lost bytes.
        dsn: u64,
        /// Number of bytes.
        len: usize,
    },

    /// The scheduler produced a mapping that does not start at the next DSN.
    #[error("scheduler mapped dsn {got}, next to send is {expected}")]
    SchedulerDesync {
        /// Next DSN to send.
        expected: u64,
        /// DSN the scheduler returned.
        got: u64,
    },

    /// The task driving the connection is gone.
    #[error("connection driver stopped")]
    DriverStopped,

    /// An earlier fatal error left the connection unusable.
    #[error("connection poisoned by an earlier fatal error")]
    Poisoned,

    /// Mapping bookkeeping error.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Per-path transport error.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ConnectionError {
    /// Check if this error is a consistency violation.
    ///
    /// Fatal errors poison the connection: every later event fails with
    /// [`ConnectionError::Poisoned`].
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::IllegalTransition { .. }
                | ConnectionError::StateMismatch { .. }
                | ConnectionError::UnexpectedState { .. }
                | ConnectionError::DataLoss { .. }
                | ConnectionError::SchedulerDesync { .. }
                | ConnectionError::Poisoned
        )
    }

    /// Check if the failed step can simply be retried later.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
