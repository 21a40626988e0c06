//! Receive-side ordering across subflows.

mod queue;

pub use queue::*;
