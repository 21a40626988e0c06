//! A single path of the connection.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::control::RtoEstimator;
use crate::core::{
    ConnectionError, ConnectionResult, ConnectionToken, MappingError, PathTransport, SubflowId,
    TcpState,
};
use crate::mapping::{Mapping, MappingTable};
use crate::scheduler::PathMetrics;

/// How a subflow enters the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubflowOptions {
    /// The subflow that opened the connection.
    pub is_master: bool,
    /// State of the path when it is registered.
    pub state: TcpState,
    /// First subflow sequence number used for data.
    pub initial_ssn: u32,
}

impl SubflowOptions {
    /// Options for the master subflow.
    pub fn master(state: TcpState) -> Self {
        Self {
            is_master: true,
            state,
            initial_ssn: 0,
        }
    }

    /// Options for an additional subflow.
    pub fn join(state: TcpState) -> Self {
        Self {
            is_master: false,
            state,
            initial_ssn: 0,
        }
    }

    /// Start data at `ssn` instead of zero.
    pub fn with_initial_ssn(mut self, ssn: u32) -> Self {
        self.initial_ssn = ssn;
        self
    }
}

/// One path owned by the connection.
///
/// Holds the path transport, the state the connection last saw it in, the
/// mappings it carries and data received on it that the connection has not
/// pulled yet.
pub struct Subflow {
    id: SubflowId,
    meta: ConnectionToken,
    is_master: bool,
    state: TcpState,
    transport: Box<dyn PathTransport>,
    rto: RtoEstimator,
    next_ssn: u32,
    sent: MappingTable,
    received: VecDeque<(Mapping, Bytes)>,
}

impl fmt::Debug for Subflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subflow")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .field("is_master", &self.is_master)
            .field("state", &self.state)
            .field("rto", &self.rto.rto())
            .field("next_ssn", &self.next_ssn)
            .field("sent", &self.sent.len())
            .field("received", &self.received.len())
            .finish()
    }
}

impl Subflow {
    /// Wrap `transport` as subflow `id` of connection `meta`.
    pub fn new(
        id: SubflowId,
        meta: ConnectionToken,
        transport: Box<dyn PathTransport>,
        options: SubflowOptions,
        initial_rto: Duration,
    ) -> Self {
        Self {
            id,
            meta,
            is_master: options.is_master,
            state: options.state,
            transport,
            rto: RtoEstimator::new(initial_rto),
            next_ssn: options.initial_ssn,
            sent: MappingTable::new(options.initial_ssn),
            received: VecDeque::new(),
        }
    }

    /// Subflow id.
    pub fn id(&self) -> SubflowId {
        self.id
    }

    /// Connection this subflow belongs to.
    pub fn meta(&self) -> ConnectionToken {
        self.meta
    }

    /// Whether this is the master subflow.
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// Last state reported by the path.
    pub fn state(&self) -> TcpState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TcpState) {
        self.state = state;
    }

    /// Path transport.
    pub fn transport(&self) -> &dyn PathTransport {
        self.transport.as_ref()
    }

    /// Path transport, mutably.
    pub fn transport_mut(&mut self) -> &mut dyn PathTransport {
        self.transport.as_mut()
    }

    /// Scheduler-facing snapshot.
    pub fn metrics(&self) -> PathMetrics {
        PathMetrics {
            id: self.id,
            available_window: self.transport.available_window(),
            window: self.transport.window(),
            rtt: self.transport.rtt(),
            segment_size: self.transport.segment_size(),
            is_master: self.is_master,
        }
    }

    /// Current connection-level retransmission timeout on this path.
    pub fn rto(&self) -> Duration {
        self.rto.rto()
    }

    /// RTO estimator, for samples and backoff.
    pub fn rto_estimator_mut(&mut self) -> &mut RtoEstimator {
        &mut self.rto
    }

    /// Next subflow sequence number to be mapped.
    pub fn next_ssn(&self) -> u32 {
        self.next_ssn
    }

    /// Mappings sent here and not yet acknowledged at the connection level.
    pub fn sent_mappings(&self) -> &MappingTable {
        &self.sent
    }

    /// Map `payload` at `dsn` onto the next subflow sequence numbers and hand
    /// it to the path.
    ///
    /// Nothing is recorded if the path refuses the bytes.
    pub fn send_new(&mut self, dsn: u64, payload: Bytes) -> ConnectionResult<Mapping> {
        let length = u32::try_from(payload.len()).map_err(|_| MappingError::LengthMismatch {
            expected: u32::MAX,
            actual: payload.len(),
        })?;
        let mapping = Mapping::new(dsn, length, self.next_ssn)?;
        self.sent.insert(mapping)?;

        if let Err(e) = self.transport.send(&mapping, payload) {
            self.sent.remove(&mapping);
            return Err(ConnectionError::Path(e));
        }
        self.next_ssn = mapping.ssn_end();
        Ok(mapping)
    }

    /// Drop sent mappings the connection-level ack covers.
    pub fn retire_acked(&mut self, dack: u64) -> usize {
        self.sent.retire_acked(dack)
    }

    /// Queue data the path delivered, waiting for the connection to pull it.
    pub fn push_received(&mut self, mapping: Mapping, payload: Bytes) -> Result<(), MappingError> {
        if mapping.length == 0 {
            return Err(MappingError::ZeroLength);
        }
        if payload.len() != mapping.length as usize {
            return Err(MappingError::LengthMismatch {
                expected: mapping.length,
                actual: payload.len(),
            });
        }
        self.received.push_back((mapping, payload));
        Ok(())
    }

    /// Bytes received here and not pulled yet.
    pub fn pending_rx_bytes(&self) -> usize {
        self.received.iter().map(|(_, p)| p.len()).sum()
    }

    /// Head DSN of the oldest received mapping.
    pub fn next_received_dsn(&self) -> Option<u64> {
        self.received.front().map(|(m, _)| m.dsn)
    }

    /// Put data the connection pulled but could not keep back at the front.
    pub fn requeue_received(&mut self, mapping: Mapping, payload: Bytes) {
        self.received.push_front((mapping, payload));
    }

    /// Pull the oldest received mapping, at most `limit` bytes of it.
    ///
    /// A longer mapping is split: the head is returned, the tail stays queued.
    pub fn take_received(&mut self, limit: usize) -> Option<(Mapping, Bytes)> {
        if limit == 0 {
            return None;
        }
        let (mapping, payload) = self.received.pop_front()?;
        Some(self.split_front(mapping, payload, limit))
    }

    /// Pull a received mapping that covers `dsn`, at most `limit` bytes of it.
    pub fn take_covering(&mut self, dsn: u64, limit: usize) -> Option<(Mapping, Bytes)> {
        if limit == 0 {
            return None;
        }
        let index = self.received.iter().position(|(m, _)| m.contains_dsn(dsn))?;
        let (mapping, payload) = self.received.remove(index)?;
        let (head, tail) = split(mapping, payload, limit);
        if let Some(tail) = tail {
            self.received.insert(index, tail);
        }
        Some(head)
    }

    fn split_front(&mut self, mapping: Mapping, payload: Bytes, limit: usize) -> (Mapping, Bytes) {
        let (head, tail) = split(mapping, payload, limit);
        if let Some(tail) = tail {
            self.received.push_front(tail);
        }
        head
    }
}

type Chunk = (Mapping, Bytes);

fn split(mapping: Mapping, mut payload: Bytes, limit: usize) -> (Chunk, Option<Chunk>) {
    if payload.len() <= limit {
        return ((mapping, payload), None);
    }
    let n = limit as u32;
    let (head, tail) = mapping.split_at(n);
    let rest = payload.split_off(limit);
    ((head, payload), tail.map(|t| (t, rest)))
}
