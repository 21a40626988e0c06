//! Identifier newtypes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a subflow within one connection.
///
/// Assigned by the registry in registration order, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubflowId(pub u32);

impl fmt::Display for SubflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sf#{}", self.0)
    }
}

/// Non-owning handle naming a meta-connection.
///
/// Subflows and schedulers hold this instead of a reference to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl ConnectionToken {
    /// Allocate a token unique within this process.
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);
