//! Receive side of the connection: pulling subflow data into reassembly,
//! closing gaps and accepting the peer's DATA_FIN.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::event::AppNotification;
use super::meta::Connection;
use crate::core::{ConnectionError, ConnectionResult, ControlFlag, SubflowId, TcpState, TimerService};
use crate::mapping::Mapping;
use crate::reassembly::{Arrival, OfoItem};
use crate::subflow::SubflowClass;

impl<T: TimerService> Connection<T> {
    pub(super) fn on_subflow_data(
        &mut self,
        subflow: SubflowId,
        mapping: Mapping,
        payload: Bytes,
    ) -> ConnectionResult<()> {
        self.subflow_mut(subflow)?.push_received(mapping, payload)?;
        self.pull_from(subflow)
    }

    /// Pull from every subflow holding received data.
    pub(super) fn pull_all(&mut self) -> ConnectionResult<()> {
        let holding: Vec<SubflowId> = self
            .registry
            .iter()
            .filter(|sf| sf.pending_rx_bytes() > 0)
            .map(|sf| sf.id())
            .collect();
        for id in holding {
            self.pull_from(id)?;
        }
        Ok(())
    }

    /// Move data from one subflow into reassembly, one mapping at a time,
    /// while the receive buffer has room.
    fn pull_from(&mut self, subflow: SubflowId) -> ConnectionResult<()> {
        let before = self.rx.expected_dsn();

        while let Some((mapping, payload)) = self.next_chunk(subflow) {
            self.make_room(&mapping);
            match self.rx.submit(OfoItem {
                mapping,
                payload,
                source: subflow,
            })? {
                Arrival::Buffered { expected, received } => {
                    debug!(%subflow, expected, received, "gap in connection stream");
                    self.recover_gap(subflow, received)?;
                }
                Arrival::Duplicate { dsn, length } => {
                    trace!(%subflow, dsn, length, "duplicate data dropped");
                }
                Arrival::Delivered { bytes, drained } => {
                    trace!(%subflow, bytes, drained, "data delivered");
                }
            }
        }

        self.after_delivery(before)
    }

    /// Next chunk to pull from `subflow`. Data at the cursor goes first.
    fn next_chunk(&mut self, subflow: SubflowId) -> Option<(Mapping, Bytes)> {
        let expected = self.rx.expected_dsn();
        let sf = self.registry.get_mut(subflow)?;
        if let Some(chunk) = sf.take_covering(expected, self.rx.room_for(expected)) {
            return Some(chunk);
        }
        let dsn = sf.next_received_dsn()?;
        sf.take_received(self.rx.room_for(dsn))
    }

    /// Evict buffered out-of-order data until the undelivered part of
    /// `mapping` fits, handing it back to the subflows it came from.
    fn make_room(&mut self, mapping: &Mapping) {
        let needed = mapping.dsn_end().saturating_sub(self.rx.expected_dsn()) as usize;
        if mapping.dsn > self.rx.expected_dsn() || needed <= self.rx.free_space() {
            return;
        }
        for item in self.rx.evict_for(needed) {
            match self.registry.get_mut(item.source) {
                Some(sf) => sf.requeue_received(item.mapping, item.payload),
                None => debug!(
                    subflow = %item.source,
                    dsn = item.mapping.dsn,
                    "evicted data dropped, source subflow gone"
                ),
            }
        }
    }

    /// Close the gap below `received` with data other subflows already hold,
    /// or ask for a retransmission if none has it.
    ///
    /// A gap triggers at most one retransmission for as long as the cursor
    /// stays where it is.
    fn recover_gap(&mut self, source: SubflowId, received: u64) -> ConnectionResult<()> {
        let others: Vec<SubflowId> = self
            .registry
            .ids(SubflowClass::Established)
            .iter()
            .copied()
            .filter(|id| *id != source)
            .collect();

        for id in others {
            while self.rx.expected_dsn() < received {
                let want = self.rx.expected_dsn();
                let room = self.rx.room_for(want);
                let Some(sf) = self.registry.get_mut(id) else { break };
                let Some((mapping, payload)) = sf.take_covering(want, room) else {
                    break;
                };
                debug!(subflow = %id, dsn = mapping.dsn, len = mapping.length, "gap filled");
                self.make_room(&mapping);
                self.rx.submit(OfoItem {
                    mapping,
                    payload,
                    source: id,
                })?;
            }
        }

        let expected = self.rx.expected_dsn();
        if expected >= received {
            return Ok(());
        }
        if self.gap_retransmit_at == Some(expected) {
            trace!(expected, received, "gap already reported");
            return Ok(());
        }
        debug!(expected, received, "no subflow holds the missing range");
        self.retransmit.retransmit(
            &mut self.registry,
            &self.tx,
            &mut self.mapper,
            &mut self.timers,
        )?;
        self.gap_retransmit_at = Some(expected);
        Ok(())
    }

    fn after_delivery(&mut self, before: u64) -> ConnectionResult<()> {
        let expected = self.rx.expected_dsn();
        if expected == before {
            return Ok(());
        }
        self.notify(AppNotification::DataReceived);

        if !self.peer_fin_accepted && self.peer_fin == Some(expected) {
            self.accept_peer_fin(expected)?;
        }
        Ok(())
    }

    /// The peer's DATA_FIN arrived at `dsn`.
    ///
    /// It is recorded and only acted on once every byte before it has been
    /// delivered, however far past the receive window it lies.
    pub(super) fn on_peer_close(&mut self, subflow: SubflowId, dsn: u64) -> ConnectionResult<()> {
        self.subflow(subflow)?;

        if self.peer_fin_accepted {
            if self.peer_fin == Some(dsn) {
                // Our DATA_ACK was lost.
                self.send_control(ControlFlag::DataAck { dack: dsn + 1 })?;
            }
            return Ok(());
        }

        let expected = self.rx.expected_dsn();
        if dsn < expected {
            debug!(%subflow, dsn, expected, "stale DATA_FIN dropped");
            return Ok(());
        }

        self.peer_fin = Some(dsn);
        if dsn == expected {
            return self.accept_peer_fin(dsn);
        }
        let window_end = expected + self.rx.free_space() as u64;
        if dsn > window_end {
            debug!(%subflow, dsn, expected, window_end, "DATA_FIN beyond receive window, deferred");
        } else {
            debug!(%subflow, dsn, expected, "DATA_FIN recorded, waiting for earlier data");
        }
        Ok(())
    }

    fn accept_peer_fin(&mut self, fin: u64) -> ConnectionResult<()> {
        self.peer_fin_accepted = true;
        debug!(conn = %self.token, dsn = fin, state = %self.state, "peer DATA_FIN accepted");

        if let Err(e) = self.send_control(ControlFlag::DataAck { dack: fin + 1 }) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(conn = %self.token, error = %e, "could not acknowledge DATA_FIN");
        }

        match self.state {
            TcpState::FinWait1 => {
                self.set_state(TcpState::Closing);
                self.close_all_subflows()?;
                self.check_drained()
            }
            TcpState::FinWait2 => {
                self.time_wait();
                Ok(())
            }
            TcpState::Established => {
                self.set_state(TcpState::CloseWait);
                self.notify(AppNotification::PeerClosed);
                Ok(())
            }
            state => Err(ConnectionError::UnexpectedState {
                state,
                context: "accepting the peer's DATA_FIN",
            }),
        }
    }
}
