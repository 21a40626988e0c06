//! Connection-level retransmission.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::connection::SendBuffer;
use crate::core::{
    ConnectionError, ConnectionResult, SubflowId, TimerId, TimerKind, TimerService,
};
use crate::mapping::{Mapping, SequenceMapper};
use crate::subflow::SubflowRegistry;

/// A retransmission that went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retransmitted {
    /// Subflow that carried it.
    pub subflow: SubflowId,
    /// Fresh mapping for the resent bytes.
    pub mapping: Mapping,
    /// That subflow's RTO after backoff.
    pub next_rto: Duration,
}

/// Owns the connection's retransmission timer and resends the oldest
/// unacknowledged bytes when it fires.
#[derive(Debug, Default)]
pub struct RetransmissionManager {
    timer: Option<TimerId>,
    retransmit_count: u32,
}

impl RetransmissionManager {
    /// Create a manager with no timer pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the timer is pending.
    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Retransmissions since the last forward progress.
    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count
    }

    /// (Re)start the timer at `rto`, canceling any pending one first.
    pub fn arm(&mut self, timers: &mut dyn TimerService, rto: Duration) -> TimerId {
        self.disarm(timers);
        let id = timers.schedule(TimerKind::Retransmit, rto);
        self.timer = Some(id);
        trace!(?rto, "retransmission timer armed");
        id
    }

    /// Cancel the timer if pending.
    pub fn disarm(&mut self, timers: &mut dyn TimerService) {
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
    }

    /// Claim an expired timer. Returns `false` if `id` is not ours.
    pub fn on_fired(&mut self, id: TimerId) -> bool {
        if self.timer == Some(id) {
            self.timer = None;
            true
        } else {
            false
        }
    }

    /// Forward progress was acknowledged.
    pub fn on_ack(&mut self) {
        self.retransmit_count = 0;
    }

    /// Resend the oldest unacknowledged bytes on the lowest-RTT active
    /// subflow, restart the timer at that subflow's RTO and back the RTO off.
    ///
    /// No-op when no subflow is active or nothing is unacknowledged. A path
    /// refusing the bytes leaves the RTO and the timer untouched.
    pub fn retransmit(
        &mut self,
        registry: &mut SubflowRegistry,
        tx: &SendBuffer,
        mapper: &mut SequenceMapper,
        timers: &mut dyn TimerService,
    ) -> ConnectionResult<Option<Retransmitted>> {
        let Some(id) = registry.lowest_rtt_active() else {
            debug!("no active subflow to retransmit on");
            return Ok(None);
        };
        let unacked = tx.unacked();
        if unacked == 0 {
            trace!("nothing to retransmit");
            return Ok(None);
        }

        let sf = registry
            .get_mut(id)
            .ok_or(ConnectionError::UnknownSubflow(id))?;
        let head = tx.head_dsn();
        let len = unacked.min(u64::from(sf.transport().segment_size().max(1))) as usize;
        let payload: Bytes = tx
            .slice(head, len)
            .ok_or(ConnectionError::DataLoss { dsn: head, len })?;

        let mapping = sf.send_new(head, payload)?;
        let rto = sf.rto();
        let next_rto = sf.rto_estimator_mut().backoff();
        self.arm(timers, rto);
        self.retransmit_count += 1;

        mapper.commit(&mapping, id);
        info!(subflow = %id, dsn = head, len, ?rto, ?next_rto, "retransmitted");

        Ok(Some(Retransmitted {
            subflow: id,
            mapping,
            next_rto,
        }))
    }
}
