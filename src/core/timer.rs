//! Manually advanced timer service.

use std::collections::BTreeMap;
use std::time::Duration;

use super::ids::TimerId;
use super::traits::{TimerKind, TimerService};

/// [`TimerService`] driven by an explicit virtual clock.
///
/// Nothing fires on its own: call [`ManualTimers::advance`] and feed the
/// returned expirations back into the connection. Useful for simulation and
/// deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<TimerId, (Duration, TimerKind)>,
}

impl ManualTimers {
    /// Create a timer service with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by` and return every timer that expired,
    /// earliest deadline first.
    pub fn advance(&mut self, by: Duration) -> Vec<(TimerId, TimerKind)> {
        self.now += by;
        let now = self.now;

        let mut expired: Vec<(Duration, TimerId, TimerKind)> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, (deadline, kind))| (*deadline, *id, *kind))
            .collect();
        expired.sort_by_key(|(deadline, id, _)| (*deadline, *id));

        for (_, id, _) in &expired {
            self.pending.remove(id);
        }
        expired.into_iter().map(|(_, id, kind)| (id, kind)).collect()
    }

    /// Number of timers still pending.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Deadline of a pending timer.
    pub fn deadline(&self, id: TimerId) -> Option<Duration> {
        self.pending.get(&id).map(|(deadline, _)| *deadline)
    }

    /// Pending timers of the given kind.
    pub fn pending_of(&self, kind: TimerKind) -> Vec<TimerId> {
        self.pending
            .iter()
            .filter(|(_, (_, k))| *k == kind)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl TimerService for ManualTimers {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, (self.now + delay, kind));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.pending.remove(&id);
    }
}
