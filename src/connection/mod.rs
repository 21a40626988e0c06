//! The connection controller.
//!
//! [`Connection`] ties the other layers together: it owns the subflows and
//! the scheduler, maps application bytes onto paths, reassembles what the
//! paths deliver and runs the connection-level close handshake. It is driven
//! by [`ConnectionEvent`]s and reports to the application through
//! [`AppNotification`]s.

mod buffer;
mod config;
mod event;
mod meta;
mod receive;
mod teardown;

#[cfg(test)]
mod tests;

pub use buffer::*;
pub use config::*;
pub use event::*;
pub use meta::*;
