//! Connection-level acknowledgements, timers and the close sequence.

use tracing::{debug, info, trace, warn};

use super::event::AppNotification;
use super::meta::Connection;
use crate::core::{
    ConnectionError, ConnectionResult, ControlFlag, SubflowId, TcpState, TimerId, TimerKind,
    TimerService,
};
use crate::subflow::SubflowClass;

impl<T: TimerService> Connection<T> {
    // ========================================================================
    // Application close
    // ========================================================================

    pub(super) fn start_close(&mut self) -> ConnectionResult<()> {
        match self.state {
            TcpState::Established | TcpState::SynRcvd => {
                self.set_state(TcpState::FinWait1);
                self.queue_data_fin()
            }
            TcpState::CloseWait => {
                self.set_state(TcpState::LastAck);
                self.queue_data_fin()
            }
            TcpState::SynSent => {
                self.close_paths();
                self.close_and_notify();
                Ok(())
            }
            state => {
                debug!(conn = %self.token, %state, "close ignored");
                Ok(())
            }
        }
    }

    /// Flush what the windows allow, then send DATA_FIN after the last
    /// queued byte and arm the retransmission timer for it.
    fn queue_data_fin(&mut self) -> ConnectionResult<()> {
        let fin = self.tx.end_dsn();
        self.local_fin = Some(fin);
        self.send_pending_data()?;

        let rto = match self.send_control(ControlFlag::DataFin { dsn: fin }) {
            Ok(id) => self.subflow(id)?.rto(),
            Err(e) if e.is_recoverable() => {
                warn!(conn = %self.token, error = %e, "DATA_FIN deferred to retransmission");
                self.config.initial_rto()
            }
            Err(e) => return Err(e),
        };
        self.retransmit.arm(&mut self.timers, rto);
        Ok(())
    }

    // ========================================================================
    // Acknowledgements
    // ========================================================================

    /// Cumulative DATA_ACK from the peer.
    pub(super) fn on_data_ack(&mut self, subflow: SubflowId, dack: u64) -> ConnectionResult<()> {
        self.subflow(subflow)?;
        if dack <= self.data_acked {
            trace!(%subflow, dack, acked = self.data_acked, "stale DATA_ACK");
            return Ok(());
        }
        self.data_acked = dack;

        let freed = self.tx.acknowledge(dack);
        let retired = self.mapper.acknowledge(dack);
        for sf in self.registry.iter_mut() {
            sf.retire_acked(dack);
        }
        let sf = self.subflow_mut(subflow)?;
        sf.rto_estimator_mut().reset_backoff();
        let rto = sf.rto();
        if freed > 0 {
            self.retransmit.on_ack();
        }
        trace!(%subflow, dack, freed, retired, "DATA_ACK");

        if let Some(fin) = self.local_fin
            && dack > fin
            && !self.local_fin_acked
        {
            self.local_fin_acked = true;
            debug!(conn = %self.token, dsn = fin, "DATA_FIN acknowledged");
            match self.state {
                TcpState::FinWait1 => self.set_state(TcpState::FinWait2),
                TcpState::LastAck => {
                    self.close_all_subflows()?;
                    self.check_drained()?;
                }
                _ => {}
            }
        }

        let fin_outstanding = self.local_fin.is_some() && !self.local_fin_acked;
        if self.tx.unacked() == 0 && !fin_outstanding {
            self.retransmit.disarm(&mut self.timers);
        } else if self.may_rearm() {
            self.retransmit.arm(&mut self.timers, rto);
        }

        self.send_pending_data().map(drop)
    }

    fn may_rearm(&self) -> bool {
        !matches!(self.state, TcpState::Closed | TcpState::TimeWait)
    }

    // ========================================================================
    // Timers
    // ========================================================================

    pub(super) fn on_timer(&mut self, id: TimerId) -> ConnectionResult<()> {
        if self.retransmit.on_fired(id) {
            return self.on_retransmit_timeout();
        }
        if self.time_wait_timer == Some(id) {
            self.time_wait_timer = None;
            debug!(conn = %self.token, "TIME_WAIT expired");
            self.close_and_notify();
            return Ok(());
        }
        trace!(conn = %self.token, ?id, "stale timer ignored");
        Ok(())
    }

    fn on_retransmit_timeout(&mut self) -> ConnectionResult<()> {
        let resent = match self.retransmit.retransmit(
            &mut self.registry,
            &self.tx,
            &mut self.mapper,
            &mut self.timers,
        ) {
            Ok(resent) => resent,
            Err(e) if e.is_recoverable() => {
                // Try again after the same RTO.
                let rto = self
                    .registry
                    .lowest_rtt_active()
                    .and_then(|id| self.registry.get(id))
                    .map_or(self.config.initial_rto(), |sf| sf.rto());
                self.retransmit.arm(&mut self.timers, rto);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if resent.is_some() {
            return Ok(());
        }

        if let Some(fin) = self.local_fin
            && !self.local_fin_acked
        {
            let id = self.send_control(ControlFlag::DataFin { dsn: fin })?;
            let sf = self.subflow_mut(id)?;
            let rto = sf.rto();
            sf.rto_estimator_mut().backoff();
            self.retransmit.arm(&mut self.timers, rto);
            debug!(conn = %self.token, subflow = %id, dsn = fin, ?rto, "DATA_FIN resent");
        }
        Ok(())
    }

    fn cancel_time_wait(&mut self) {
        if let Some(id) = self.time_wait_timer.take() {
            self.timers.cancel(id);
        }
    }

    pub(super) fn cancel_timers(&mut self) {
        self.retransmit.disarm(&mut self.timers);
        self.cancel_time_wait();
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Ask every open subflow to close and move it to the closing set.
    pub(super) fn close_all_subflows(&mut self) -> ConnectionResult<()> {
        match self.state {
            TcpState::FinWait2 | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait => {
                self.close_paths();
                Ok(())
            }
            state => Err(ConnectionError::UnexpectedState {
                state,
                context: "closing all subflows",
            }),
        }
    }

    fn close_paths(&mut self) {
        let open: Vec<SubflowId> = [SubflowClass::Candidate, SubflowClass::Established]
            .into_iter()
            .flat_map(|class| self.registry.ids(class).to_vec())
            .collect();

        for id in open {
            if let Some(sf) = self.registry.get_mut(id)
                && let Err(e) = sf.transport_mut().close()
            {
                warn!(subflow = %id, error = %e, "path close failed");
            }
            self.registry.move_to(id, SubflowClass::Closing);
        }
    }

    /// Enter TIME_WAIT: every path is closed and the connection lingers for
    /// twice the MSL.
    pub(super) fn time_wait(&mut self) {
        self.close_paths();
        self.set_state(TcpState::TimeWait);
        self.cancel_timers();
        let delay = self.config.time_wait();
        self.time_wait_timer = Some(self.timers.schedule(TimerKind::TimeWait, delay));
        debug!(conn = %self.token, ?delay, "TIME_WAIT started");
    }

    /// Move on once the closing set has drained.
    pub(super) fn check_drained(&mut self) -> ConnectionResult<()> {
        let closing = self.registry.count(SubflowClass::Closing);
        if closing > 0 {
            trace!(conn = %self.token, closing, "waiting for subflows to close");
            return Ok(());
        }
        match self.state {
            TcpState::Closing => self.time_wait(),
            TcpState::LastAck if self.local_fin_acked => self.close_and_notify(),
            _ => {}
        }
        Ok(())
    }

    pub(super) fn close_and_notify(&mut self) {
        self.cancel_timers();
        self.set_state(TcpState::Closed);
        info!(conn = %self.token, "connection closed");
        self.notify(AppNotification::Closed);
    }
}
