//! # mptcp-meta
//!
//! Connection-level core of a multipath transport.
//!
//! One logical byte stream is carried over several independent reliable
//! paths (subflows). This crate is the layer above the paths: it decides
//! which path carries which bytes, tags every chunk with a mapping between
//! the connection sequence space and the path's own, puts data arriving on
//! any path back in order, and runs the connection-level open and close
//! handshakes. It provides:
//!
//! - **Scheduling**: ratio round robin or RTT-weighted path selection
//! - **Sequence mapping**: 64-bit data sequence numbers over 32-bit subflow ones
//! - **Reassembly**: cross-path reordering with gap recovery
//! - **Teardown**: DATA_FIN, TIME_WAIT and subflow draining
//!
//! Per-path transports and timers are supplied by the caller through
//! [`PathTransport`](crate::core::PathTransport) and
//! [`TimerService`](crate::core::TimerService).
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio timer service and connection driver
//! - `logging` (default): `tracing-subscriber` setup helpers
//!
//! ## Modules
//!
//! - [`core`]: identifiers, states, errors, constants and the driving traits
//! - [`mapping`]: mappings and the connection sequence mapper
//! - [`scheduler`]: packet schedulers
//! - [`subflow`]: subflows and their registry
//! - [`reassembly`]: receive-side reordering
//! - [`control`]: window aggregation, RTO and retransmission
//! - [`connection`]: the connection controller
//! - [`runtime`]: tokio integration (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use mptcp_meta::prelude::*;
//!
//! // A path that accepts everything.
//! struct Loopback;
//!
//! impl PathTransport for Loopback {
//!     fn available_window(&self) -> u32 {
//!         64 * 1024
//!     }
//!     fn window(&self) -> u32 {
//!         64 * 1024
//!     }
//!     fn rtt(&self) -> Duration {
//!         Duration::from_millis(20)
//!     }
//!     fn segment_size(&self) -> u32 {
//!         1400
//!     }
//!     fn send(&mut self, _mapping: &Mapping, _payload: Bytes) -> Result<(), PathError> {
//!         Ok(())
//!     }
//!     fn send_control(&mut self, _flag: ControlFlag) -> Result<(), PathError> {
//!         Ok(())
//!     }
//!     fn close(&mut self) -> Result<(), PathError> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), ConnectionError> {
//! let mut conn = Connection::new(ConnectionConfig::default(), ManualTimers::new())?;
//! let master = conn.add_subflow(Box::new(Loopback), SubflowOptions::master(TcpState::SynSent))?;
//! conn.handle_event(ConnectionEvent::SubflowStateChanged {
//!     subflow: master,
//!     old: TcpState::SynSent,
//!     new: TcpState::Established,
//! })?;
//! assert_eq!(conn.poll_notification(), Some(AppNotification::Connected));
//!
//! conn.send(b"hello")?;
//! assert_eq!(conn.next_tx_dsn(), 5);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod connection;
pub mod control;
pub mod core;
pub mod mapping;
pub mod reassembly;
pub mod scheduler;
pub mod subflow;

// Tokio driver (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

// Subscriber setup (feature-gated)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::connection::{
        AppNotification, Connection, ConnectionConfig, ConnectionConfigBuilder, ConnectionEvent,
        SubflowFailure,
    };
    pub use crate::mapping::Mapping;
    pub use crate::scheduler::{RatioConfig, RttWeightedConfig, SchedulerConfig};
    pub use crate::subflow::{SubflowClass, SubflowOptions};

    #[cfg(feature = "runtime")]
    pub use crate::runtime::{ConnectionDriver, DriverHandle, TokioTimers};
}

// Re-export commonly used items at crate root
pub use connection::{AppNotification, Connection, ConnectionConfig, ConnectionEvent};
pub use crate::core::{ConnectionError, ConnectionResult, PathTransport, TcpState, TimerService};
