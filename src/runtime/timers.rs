//! Timer service on the tokio clock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::core::{TimerId, TimerKind, TimerService};

/// [`TimerService`] backed by one sleeping task per timer.
///
/// Expired ids arrive on the receiver returned by [`TokioTimers::new`].
/// Scheduling must happen inside a tokio runtime.
#[derive(Debug)]
pub struct TokioTimers {
    start: Instant,
    next_id: u64,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    fired: mpsc::UnboundedSender<TimerId>,
}

impl TokioTimers {
    /// Create a timer service and the channel its expirations arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (fired, expirations) = mpsc::unbounded_channel();
        let timers = Self {
            start: Instant::now(),
            next_id: 0,
            tasks: HashMap::new(),
            fired,
        };
        (timers, expirations)
    }

    /// Timers that have neither fired nor been canceled.
    pub fn pending_count(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }
}

impl TimerService for TokioTimers {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.tasks.retain(|_, task| !task.is_finished());

        let id = TimerId(self.next_id);
        self.next_id += 1;
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The driver may already be gone.
            let _ = fired.send(id);
        });
        trace!(?id, ?kind, ?delay, "timer scheduled");
        self.tasks.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (mut timers, mut fired) = TokioTimers::new();
        let id = timers.schedule(TimerKind::Retransmit, Duration::from_secs(1));

        assert_eq!(fired.recv().await, Some(id));
        assert!(timers.now() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_timer_never_fires() {
        let (mut timers, mut fired) = TokioTimers::new();
        let canceled = timers.schedule(TimerKind::Retransmit, Duration::from_secs(1));
        let kept = timers.schedule(TimerKind::TimeWait, Duration::from_secs(2));
        timers.cancel(canceled);

        assert_eq!(fired.recv().await, Some(kept));
        assert!(fired.try_recv().is_err());
    }
}
