//! Tokio integration.
//!
//! [`ConnectionDriver`] runs a [`Connection`](crate::connection::Connection)
//! inside one task: path events, timer expirations and application commands
//! are queued on channels and handled one at a time, so the connection itself
//! never needs a lock.

mod driver;
mod timers;

pub use driver::*;
pub use timers::*;
