//! The meta-connection.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use super::buffer::SendBuffer;
use super::config::ConnectionConfig;
use super::event::{AppNotification, ConnectionEvent, SubflowFailure};
use crate::control::{CongestionAggregator, RetransmissionManager};
use crate::core::{
    ConnectionError, ConnectionResult, ConnectionToken, ControlFlag, ManualTimers,
    PathTransport, SubflowId, TcpState, TimerId, TimerService,
};
use crate::mapping::SequenceMapper;
use crate::reassembly::ReassemblyQueue;
use crate::scheduler::{MetaView, PathMetrics, Schedule, Scheduler};
use crate::subflow::{Subflow, SubflowClass, SubflowOptions, SubflowRegistry, Transition};

/// One multipath connection.
///
/// Owns every subflow, the scheduler, both connection-level buffers and the
/// timers. All input arrives through [`Connection::handle_event`] and the
/// application calls, one at a time; nothing here locks.
///
/// A fatal error poisons the connection. Recoverable errors are logged and
/// the failed step is retried on a later event.
#[derive(Debug)]
pub struct Connection<T: TimerService = ManualTimers> {
    pub(super) token: ConnectionToken,
    pub(super) config: ConnectionConfig,
    pub(super) state: TcpState,
    pub(super) registry: SubflowRegistry,
    pub(super) scheduler: Scheduler,
    pub(super) mapper: SequenceMapper,
    pub(super) tx: SendBuffer,
    pub(super) rx: ReassemblyQueue,
    pub(super) aggregator: CongestionAggregator,
    pub(super) retransmit: RetransmissionManager,
    pub(super) timers: T,
    pub(super) time_wait_timer: Option<TimerId>,
    pub(super) data_acked: u64,
    /// DSN our DATA_FIN occupies, once the application closed.
    pub(super) local_fin: Option<u64>,
    pub(super) local_fin_acked: bool,
    /// DSN of the peer's DATA_FIN, once seen.
    pub(super) peer_fin: Option<u64>,
    pub(super) peer_fin_accepted: bool,
    /// Receive cursor at which a gap last triggered a retransmission.
    pub(super) gap_retransmit_at: Option<u64>,
    connect_notified: bool,
    notifications: VecDeque<AppNotification>,
    pub(super) deferred_removals: VecDeque<SubflowId>,
    poisoned: bool,
}

impl<T: TimerService> Connection<T> {
    /// Create a closed connection.
    pub fn new(config: ConnectionConfig, timers: T) -> ConnectionResult<Self> {
        let token = ConnectionToken::next();
        let mut scheduler = Scheduler::from_config(config.scheduler());
        scheduler.set_meta(token)?;
        info!(conn = %token, scheduler = scheduler.name(), "connection created");

        Ok(Self {
            token,
            state: TcpState::Closed,
            registry: SubflowRegistry::new(),
            scheduler,
            mapper: SequenceMapper::new(),
            tx: SendBuffer::new(config.initial_dsn(), config.send_buffer_size()),
            rx: ReassemblyQueue::new(config.peer_initial_dsn(), config.recv_buffer_size()),
            aggregator: CongestionAggregator::new(config.aggregation()),
            retransmit: RetransmissionManager::new(),
            timers,
            time_wait_timer: None,
            data_acked: config.initial_dsn(),
            local_fin: None,
            local_fin_acked: false,
            peer_fin: None,
            peer_fin_accepted: false,
            gap_retransmit_at: None,
            connect_notified: false,
            notifications: VecDeque::new(),
            deferred_removals: VecDeque::new(),
            poisoned: false,
            config,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Connection token.
    pub fn token(&self) -> ConnectionToken {
        self.token
    }

    /// Connection-level state.
    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Registered subflows.
    pub fn subflows(&self) -> &SubflowRegistry {
        &self.registry
    }

    /// The scheduler, e.g. to designate fast and slow paths.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Timer service.
    pub fn timers(&self) -> &T {
        &self.timers
    }

    /// Timer service, mutably.
    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    /// Current connection window.
    pub fn total_window(&self) -> u32 {
        self.aggregator.total_window()
    }

    /// Next data sequence number expected from the peer.
    pub fn expected_dsn(&self) -> u64 {
        self.rx.expected_dsn()
    }

    /// Next data sequence number to send.
    pub fn next_tx_dsn(&self) -> u64 {
        self.tx.next_tx_dsn()
    }

    /// Free space in the send buffer.
    pub fn tx_available(&self) -> usize {
        self.tx.available()
    }

    /// Bytes the application can read.
    pub fn rx_available(&self) -> usize {
        self.rx.readable()
    }

    /// Whether a fatal error made the connection unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Next pending application notification.
    pub fn poll_notification(&mut self) -> Option<AppNotification> {
        self.notifications.pop_front()
    }

    /// Log every subflow set.
    pub fn dump_subflows(&self) {
        info!(conn = %self.token, state = %self.state, "subflows");
        for (class, ids) in self.registry.classes() {
            info!(conn = %self.token, %class, count = ids.len(), subflows = ?ids);
        }
    }

    // ========================================================================
    // Path manager and application
    // ========================================================================

    /// Register a subflow.
    ///
    /// The subflow starts in the set matching `options.state`. Registering the
    /// master copies its state into the connection.
    pub fn add_subflow(
        &mut self,
        transport: Box<dyn PathTransport>,
        options: SubflowOptions,
    ) -> ConnectionResult<SubflowId> {
        self.check_poisoned()?;
        if options.is_master && self.registry.master().is_some() {
            return Err(ConnectionError::DuplicateMaster);
        }

        let id = self.registry.allocate_id();
        let subflow = Subflow::new(id, self.token, transport, options, self.config.initial_rto());
        self.registry
            .insert(subflow, SubflowClass::for_state(options.state))?;
        self.aggregator.recompute(self.registry.windows());
        info!(
            conn = %self.token,
            subflow = %id,
            master = options.is_master,
            state = %options.state,
            "subflow added"
        );

        if options.is_master {
            self.set_state(options.state);
            if options.state == TcpState::Established {
                self.notify(AppNotification::Connected);
            }
        }

        let result = self.send_pending_data().map(drop);
        self.settle(result)?;
        Ok(id)
    }

    /// Queue application data. Returns how many bytes fit in the send buffer.
    pub fn send(&mut self, data: &[u8]) -> ConnectionResult<usize> {
        self.check_poisoned()?;
        if !self.state.can_send() || self.local_fin.is_some() {
            return Err(ConnectionError::NotConnected(self.state));
        }
        let queued = self.tx.push(data);
        trace!(conn = %self.token, queued, offered = data.len(), "application data queued");

        let result = self.send_pending_data().map(drop);
        self.settle(result)?;
        Ok(queued)
    }

    /// Read up to `max` in-order bytes.
    pub fn recv(&mut self, max: usize) -> ConnectionResult<Bytes> {
        self.check_poisoned()?;
        let data = self.rx.read(max);
        if !data.is_empty() {
            let result = self.pull_all();
            self.settle(result)?;
        }
        Ok(data)
    }

    /// Close the application's sending direction.
    pub fn close(&mut self) -> ConnectionResult<()> {
        self.check_poisoned()?;
        let result = self.start_close();
        self.settle(result)
    }

    /// Handle one event.
    ///
    /// Subflow removals requested while handling run once the event is done.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> ConnectionResult<()> {
        self.check_poisoned()?;
        let result = self
            .dispatch(event)
            .and_then(|()| self.run_deferred_removals());
        self.settle(result)
    }

    fn dispatch(&mut self, event: ConnectionEvent) -> ConnectionResult<()> {
        match event {
            ConnectionEvent::SubflowStateChanged { subflow, old, new } => {
                self.on_subflow_state(subflow, old, new)
            }
            ConnectionEvent::SubflowWindowChanged { subflow, old, new } => {
                self.subflow(subflow)?;
                trace!(conn = %self.token, %subflow, old, new, "subflow window changed");
                self.aggregator.recompute(self.registry.windows());
                self.send_pending_data().map(drop)
            }
            ConnectionEvent::SubflowData {
                subflow,
                mapping,
                payload,
            } => self.on_subflow_data(subflow, mapping, payload),
            ConnectionEvent::DataAck { subflow, dack } => self.on_data_ack(subflow, dack),
            ConnectionEvent::DataFin { subflow, dsn } => self.on_peer_close(subflow, dsn),
            ConnectionEvent::RttSample { subflow, rtt } => {
                let sf = self.subflow_mut(subflow)?;
                sf.rto_estimator_mut().update(rtt);
                trace!(%subflow, ?rtt, rto = ?sf.rto(), "rtt sample");
                Ok(())
            }
            ConnectionEvent::SubflowFailed { subflow, failure } => {
                self.on_subflow_failed(subflow, failure)
            }
            ConnectionEvent::TimerFired(id) => self.on_timer(id),
        }
    }

    fn settle(&mut self, result: ConnectionResult<()>) -> ConnectionResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(conn = %self.token, state = %self.state, error = %e, "connection poisoned");
                self.poisoned = true;
                Err(e)
            }
            Err(e) => {
                warn!(conn = %self.token, error = %e, "step dropped, will retry");
                Ok(())
            }
        }
    }

    fn check_poisoned(&self) -> ConnectionResult<()> {
        if self.poisoned {
            Err(ConnectionError::Poisoned)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Subflow lifecycle
    // ========================================================================

    fn on_subflow_state(
        &mut self,
        subflow: SubflowId,
        old: TcpState,
        new: TcpState,
    ) -> ConnectionResult<()> {
        let transition = self.registry.apply_transition(subflow, old, new)?;
        self.aggregator.recompute(self.registry.windows());

        match transition {
            Transition::Established { is_master: true } => self.on_master_established()?,
            Transition::Established { is_master: false } => {
                info!(conn = %self.token, %subflow, "subflow joined");
            }
            Transition::MasterSynRcvd => {
                if self.state.can_transition_to(TcpState::SynRcvd) {
                    self.set_state(TcpState::SynRcvd);
                }
            }
            Transition::Closed => self.deferred_removals.push_back(subflow),
            Transition::Closing | Transition::Unchanged => {
                if new == TcpState::SynSent
                    && self.state == TcpState::Closed
                    && self.registry.master() == Some(subflow)
                {
                    self.set_state(TcpState::SynSent);
                }
            }
        }

        self.send_pending_data().map(drop)
    }

    fn on_master_established(&mut self) -> ConnectionResult<()> {
        match self.state {
            TcpState::SynSent => {
                self.set_state(TcpState::Established);
                self.notify(AppNotification::Connected);
            }
            TcpState::SynRcvd => {
                self.set_state(TcpState::Established);
                self.notify(AppNotification::Accepted);
            }
            TcpState::Established => {}
            state => {
                return Err(ConnectionError::UnexpectedState {
                    state,
                    context: "master subflow established",
                });
            }
        }
        Ok(())
    }

    fn on_subflow_failed(
        &mut self,
        subflow: SubflowId,
        failure: SubflowFailure,
    ) -> ConnectionResult<()> {
        let is_master = self.subflow(subflow)?.is_master();
        warn!(conn = %self.token, %subflow, ?failure, master = is_master, "subflow failed");

        self.registry.move_to(subflow, SubflowClass::Closing);
        self.deferred_removals.push_back(subflow);

        if is_master && failure == SubflowFailure::Refused && self.state.is_handshaking() {
            self.cancel_timers();
            self.set_state(TcpState::Closed);
            self.notify(AppNotification::ConnectionFailed);
            return Ok(());
        }
        self.send_pending_data().map(drop)
    }

    fn run_deferred_removals(&mut self) -> ConnectionResult<()> {
        let mut removed = false;
        while let Some(id) = self.deferred_removals.pop_front() {
            if self.registry.remove(id).is_some() {
                debug!(conn = %self.token, subflow = %id, "subflow removed");
                removed = true;
            }
        }
        if removed {
            self.aggregator.recompute(self.registry.windows());
            self.check_drained()?;
        }
        Ok(())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    fn may_transmit(&self) -> bool {
        !matches!(
            self.state,
            TcpState::Closed | TcpState::SynSent | TcpState::SynRcvd | TcpState::TimeWait
        )
    }

    /// Map pending bytes onto subflows until the scheduler has nothing more.
    ///
    /// A path refusing bytes ends the round; they go out on a later event.
    pub(super) fn send_pending_data(&mut self) -> ConnectionResult<usize> {
        if !self.may_transmit() {
            return Ok(0);
        }

        let mut sent = 0;
        loop {
            let view = MetaRef::new(
                self.token,
                &self.registry,
                &self.tx,
                &self.aggregator,
                self.timers.now(),
            );
            let choice = self.scheduler.generate_mapping(&view);
            let Some(choice) = choice else { break };

            let expected = self.tx.next_tx_dsn();
            if choice.dsn != expected {
                return Err(ConnectionError::SchedulerDesync {
                    expected,
                    got: choice.dsn,
                });
            }
            let len = choice.length as usize;
            let payload = self
                .tx
                .slice(choice.dsn, len)
                .ok_or(ConnectionError::DataLoss { dsn: choice.dsn, len })?;

            let sf = self
                .registry
                .get_mut(choice.subflow)
                .ok_or(ConnectionError::UnknownSubflow(choice.subflow))?;
            let mapping = match sf.send_new(choice.dsn, payload) {
                Ok(mapping) => mapping,
                Err(e) if e.is_recoverable() => {
                    debug!(subflow = %choice.subflow, error = %e, "path refused data");
                    break;
                }
                Err(e) => return Err(e),
            };
            let rto = sf.rto();

            self.mapper.commit(&mapping, choice.subflow);
            self.tx.advance_next_tx(mapping.dsn_end());
            if !self.retransmit.is_armed() {
                self.retransmit.arm(&mut self.timers, rto);
            }
            trace!(
                subflow = %choice.subflow,
                dsn = mapping.dsn,
                ssn = mapping.ssn,
                len,
                "mapping committed"
            );
            sent += len;
        }
        Ok(sent)
    }

    /// Send an empty packet carrying `flag` on the scheduler's control subflow.
    pub(super) fn send_control(&mut self, flag: ControlFlag) -> ConnectionResult<SubflowId> {
        let view = MetaRef::new(
            self.token,
            &self.registry,
            &self.tx,
            &self.aggregator,
            self.timers.now(),
        );
        let id = self
            .scheduler
            .subflow_for_control_packet(&view)
            .ok_or(ConnectionError::NoActiveSubflow)?;
        self.subflow_mut(id)?.transport_mut().send_control(flag)?;
        debug!(conn = %self.token, subflow = %id, ?flag, "control packet sent");
        Ok(id)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    pub(super) fn set_state(&mut self, state: TcpState) {
        if self.state != state {
            info!(conn = %self.token, from = %self.state, to = %state, "connection state");
            self.state = state;
        }
    }

    /// Queue a notification. Connect and accept are reported at most once.
    pub(super) fn notify(&mut self, notification: AppNotification) {
        if matches!(
            notification,
            AppNotification::Connected | AppNotification::Accepted
        ) {
            if self.connect_notified {
                return;
            }
            self.connect_notified = true;
        }
        debug!(conn = %self.token, ?notification, "application notified");
        self.notifications.push_back(notification);
    }

    pub(super) fn subflow(&self, id: SubflowId) -> ConnectionResult<&Subflow> {
        self.registry.get(id).ok_or(ConnectionError::UnknownSubflow(id))
    }

    pub(super) fn subflow_mut(&mut self, id: SubflowId) -> ConnectionResult<&mut Subflow> {
        self.registry
            .get_mut(id)
            .ok_or(ConnectionError::UnknownSubflow(id))
    }
}

impl Connection<ManualTimers> {
    /// Move the virtual clock forward and handle every timer that fired.
    pub fn advance_clock(&mut self, by: Duration) -> ConnectionResult<()> {
        for (id, kind) in self.timers.advance(by) {
            trace!(conn = %self.token, ?id, ?kind, "timer fired");
            self.handle_event(ConnectionEvent::TimerFired(id))?;
        }
        Ok(())
    }
}

/// What schedulers see of a connection.
struct MetaRef<'a> {
    token: ConnectionToken,
    registry: &'a SubflowRegistry,
    tx: &'a SendBuffer,
    aggregator: &'a CongestionAggregator,
    now: Duration,
}

impl<'a> MetaRef<'a> {
    fn new(
        token: ConnectionToken,
        registry: &'a SubflowRegistry,
        tx: &'a SendBuffer,
        aggregator: &'a CongestionAggregator,
        now: Duration,
    ) -> Self {
        Self {
            token,
            registry,
            tx,
            aggregator,
            now,
        }
    }
}

impl MetaView for MetaRef<'_> {
    fn token(&self) -> ConnectionToken {
        self.token
    }

    fn active_count(&self) -> usize {
        self.registry.count(SubflowClass::Established)
    }

    fn active(&self, index: usize) -> Option<PathMetrics> {
        self.registry.active(index).map(Subflow::metrics)
    }

    fn next_tx_dsn(&self) -> u64 {
        self.tx.next_tx_dsn()
    }

    fn pending_bytes(&self) -> u64 {
        self.tx.pending()
    }

    fn available_window(&self) -> u32 {
        self.aggregator.available_window(self.tx.unacked())
    }

    fn data_acked(&self) -> u64 {
        self.tx.head_dsn()
    }

    fn now(&self) -> Duration {
        self.now
    }
}
