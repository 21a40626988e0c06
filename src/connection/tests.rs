use std::time::Duration;

use bytes::Bytes;

use super::*;
use crate::core::{
    ConnectionError, ControlFlag, ManualTimers, SubflowId, TcpState, TimerKind, TimerService,
};
use crate::mapping::Mapping;
use crate::subflow::{SubflowClass, SubflowOptions};
use crate::testing::{MockPath, PathHandle};

const WINDOW: u32 = 64_000;

fn config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .msl(Duration::from_secs(1))
        .build()
        .unwrap()
}

fn connection(config: ConnectionConfig) -> Connection {
    Connection::new(config, ManualTimers::new()).unwrap()
}

/// Master (10 ms) and a joined subflow (30 ms), both established.
fn established(conn: &mut Connection) -> [(SubflowId, PathHandle); 2] {
    let (path, master_handle) = MockPath::new(10, WINDOW);
    let master = conn
        .add_subflow(Box::new(path), SubflowOptions::master(TcpState::SynSent))
        .unwrap();
    assert_eq!(conn.state(), TcpState::SynSent);
    conn.handle_event(ConnectionEvent::SubflowStateChanged {
        subflow: master,
        old: TcpState::SynSent,
        new: TcpState::Established,
    })
    .unwrap();

    let (path, join_handle) = MockPath::new(30, WINDOW);
    let join = conn
        .add_subflow(Box::new(path), SubflowOptions::join(TcpState::Established))
        .unwrap();
    [(master, master_handle), (join, join_handle)]
}

fn data(conn: &mut Connection, subflow: SubflowId, dsn: u64, ssn: u32, bytes: &'static [u8]) {
    let mapping = Mapping::new(dsn, bytes.len() as u32, ssn).unwrap();
    conn.handle_event(ConnectionEvent::SubflowData {
        subflow,
        mapping,
        payload: Bytes::from_static(bytes),
    })
    .unwrap();
}

fn path_closed(conn: &mut Connection, subflow: SubflowId) {
    for (old, new) in [
        (TcpState::Established, TcpState::FinWait1),
        (TcpState::FinWait1, TcpState::Closed),
    ] {
        conn.handle_event(ConnectionEvent::SubflowStateChanged { subflow, old, new })
            .unwrap();
    }
}

fn notifications(conn: &mut Connection) -> Vec<AppNotification> {
    std::iter::from_fn(|| conn.poll_notification()).collect()
}

#[test]
fn test_active_close_end_to_end() {
    let mut conn = connection(config());
    let [(master, master_path), (join, join_path)] = established(&mut conn);
    assert_eq!(conn.state(), TcpState::Established);

    conn.close().unwrap();
    assert_eq!(conn.state(), TcpState::FinWait1);
    assert_eq!(master_path.control(), vec![ControlFlag::DataFin { dsn: 0 }]);

    // Peer's DATA_FIN, in window and in order.
    conn.handle_event(ConnectionEvent::DataFin {
        subflow: join,
        dsn: 0,
    })
    .unwrap();
    assert_eq!(conn.state(), TcpState::Closing);
    assert_eq!(
        master_path.control().last(),
        Some(&ControlFlag::DataAck { dack: 1 })
    );
    assert!(master_path.is_closed() && join_path.is_closed());
    assert_eq!(conn.subflows().count(SubflowClass::Closing), 2);

    path_closed(&mut conn, master);
    assert_eq!(conn.state(), TcpState::Closing);
    path_closed(&mut conn, join);
    assert_eq!(conn.state(), TcpState::TimeWait);
    assert!(conn.subflows().is_empty());

    let timers = conn.timers();
    assert_eq!(timers.pending_of(TimerKind::TimeWait).len(), 1);
    assert!(timers.pending_of(TimerKind::Retransmit).is_empty());

    conn.advance_clock(Duration::from_secs(1)).unwrap();
    assert_eq!(conn.state(), TcpState::TimeWait);
    conn.advance_clock(Duration::from_secs(1)).unwrap();
    assert_eq!(conn.state(), TcpState::Closed);

    assert_eq!(
        notifications(&mut conn),
        vec![AppNotification::Connected, AppNotification::Closed]
    );
}

#[test]
fn test_passive_close_through_last_ack() {
    let mut conn = connection(config());
    let [(master, master_path), (join, join_path)] = established(&mut conn);
    notifications(&mut conn);

    // DATA_FIN ahead of undelivered data is only recorded.
    conn.handle_event(ConnectionEvent::DataFin {
        subflow: master,
        dsn: 5,
    })
    .unwrap();
    assert_eq!(conn.state(), TcpState::Established);

    data(&mut conn, join, 0, 0, b"hello");
    assert_eq!(conn.state(), TcpState::CloseWait);
    assert!(master_path.control().contains(&ControlFlag::DataAck { dack: 6 }));
    assert_eq!(
        notifications(&mut conn),
        vec![AppNotification::DataReceived, AppNotification::PeerClosed]
    );

    // Still allowed to send in CLOSE_WAIT.
    assert_eq!(conn.send(b"bye").unwrap(), 3);
    conn.close().unwrap();
    assert_eq!(conn.state(), TcpState::LastAck);
    assert!(master_path.control().contains(&ControlFlag::DataFin { dsn: 3 }));
    assert!(matches!(
        conn.send(b"more"),
        Err(ConnectionError::NotConnected(TcpState::LastAck))
    ));

    conn.handle_event(ConnectionEvent::DataAck {
        subflow: master,
        dack: 4,
    })
    .unwrap();
    assert!(master_path.is_closed() && join_path.is_closed());
    assert_eq!(conn.state(), TcpState::LastAck);

    path_closed(&mut conn, master);
    path_closed(&mut conn, join);
    assert_eq!(conn.state(), TcpState::Closed);
    assert_eq!(notifications(&mut conn), vec![AppNotification::Closed]);
    assert_eq!(conn.timers().pending_count(), 0);
}

#[test]
fn test_data_fin_past_window_waits_for_data() {
    let config = ConnectionConfig::builder()
        .recv_buffer_size(8)
        .build()
        .unwrap();
    let mut conn = connection(config);
    let [(master, master_path), (join, _)] = established(&mut conn);

    conn.handle_event(ConnectionEvent::DataFin {
        subflow: master,
        dsn: 10,
    })
    .unwrap();
    assert_eq!(conn.state(), TcpState::Established);

    data(&mut conn, master, 0, 0, b"abcdefgh");
    assert_eq!(&conn.recv(8).unwrap()[..], b"abcdefgh");
    assert_eq!(conn.state(), TcpState::Established);

    data(&mut conn, join, 8, 0, b"ij");
    assert_eq!(conn.expected_dsn(), 10);
    assert_eq!(conn.state(), TcpState::CloseWait);
    assert!(master_path.control().contains(&ControlFlag::DataAck { dack: 11 }));
}

#[test]
fn test_send_before_connected() {
    let mut conn = connection(config());
    assert!(matches!(
        conn.send(b"early"),
        Err(ConnectionError::NotConnected(TcpState::Closed))
    ));
}

#[test]
fn test_send_spreads_and_ack_frees_buffer() {
    let mut conn = connection(config());
    let [(master, master_path), (_, join_path)] = established(&mut conn);
    let capacity = conn.tx_available();

    assert_eq!(conn.send(&[1u8; 5000]).unwrap(), 5000);
    assert_eq!(conn.next_tx_dsn(), 5000);
    assert_eq!(master_path.sent_bytes() + join_path.sent_bytes(), 5000);
    assert!(master_path.sent().iter().all(|(m, _)| m.length <= 1400));
    assert_eq!(conn.timers().pending_of(TimerKind::Retransmit).len(), 1);

    conn.handle_event(ConnectionEvent::DataAck {
        subflow: master,
        dack: 5000,
    })
    .unwrap();
    assert_eq!(conn.tx_available(), capacity);
    assert!(conn.timers().pending_of(TimerKind::Retransmit).is_empty());
}

#[test]
fn test_send_limited_by_connection_window() {
    let mut conn = connection(config());
    let [(master, master_path), (join, join_path)] = established(&mut conn);
    master_path.set_window(1000);
    join_path.set_window(500);
    for (subflow, new) in [(master, 1000), (join, 500)] {
        conn.handle_event(ConnectionEvent::SubflowWindowChanged {
            subflow,
            old: WINDOW,
            new,
        })
        .unwrap();
    }
    assert_eq!(conn.total_window(), 1500);

    conn.send(&[0u8; 4000]).unwrap();
    assert_eq!(conn.next_tx_dsn(), 1500);

    conn.handle_event(ConnectionEvent::DataAck {
        subflow: master,
        dack: 1000,
    })
    .unwrap();
    assert_eq!(conn.next_tx_dsn(), 2500);
}

#[test]
fn test_refused_path_is_retried_later() {
    let mut conn = connection(config());
    let [(master, master_path), (_, join_path)] = established(&mut conn);
    master_path.set_refuse_sends(true);
    join_path.set_refuse_sends(true);

    assert_eq!(conn.send(b"queued").unwrap(), 6);
    assert_eq!(conn.next_tx_dsn(), 0);
    assert!(!conn.is_poisoned());

    master_path.set_refuse_sends(false);
    join_path.set_refuse_sends(false);
    conn.handle_event(ConnectionEvent::SubflowWindowChanged {
        subflow: master,
        old: WINDOW,
        new: WINDOW,
    })
    .unwrap();
    assert_eq!(conn.next_tx_dsn(), 6);
}

#[test]
fn test_receive_in_any_order() {
    let mut conn = connection(config());
    let [(master, _), (join, _)] = established(&mut conn);

    data(&mut conn, join, 5, 0, b"fghij");
    assert_eq!(conn.rx_available(), 0);
    data(&mut conn, master, 0, 0, b"abcde");

    assert_eq!(conn.expected_dsn(), 10);
    assert_eq!(&conn.recv(100).unwrap()[..], b"abcdefghij");
}

#[test]
fn test_full_buffer_leaves_data_on_subflow() {
    let config = ConnectionConfig::builder()
        .recv_buffer_size(8)
        .build()
        .unwrap();
    let mut conn = connection(config);
    let [(master, _), (join, _)] = established(&mut conn);

    data(&mut conn, master, 0, 0, b"abcde");
    data(&mut conn, master, 5, 5, b"fghij");
    data(&mut conn, join, 10, 0, b"kl");
    assert_eq!(conn.expected_dsn(), 8);

    assert_eq!(&conn.recv(8).unwrap()[..], b"abcdefgh");
    assert_eq!(conn.expected_dsn(), 12);
    assert_eq!(&conn.recv(8).unwrap()[..], b"ijkl");
}

#[test]
fn test_cursor_data_displaces_buffered_data() {
    let config = ConnectionConfig::builder()
        .recv_buffer_size(10)
        .build()
        .unwrap();
    let mut conn = connection(config);
    let [(master, _), (join, _)] = established(&mut conn);

    // The faster path fills the whole buffer past the gap.
    data(&mut conn, join, 5, 0, b"fghijklmno");
    assert_eq!(conn.expected_dsn(), 0);

    data(&mut conn, master, 0, 0, b"abcde");
    assert_eq!(conn.expected_dsn(), 5);
    assert_eq!(conn.subflows().get(join).unwrap().pending_rx_bytes(), 10);

    assert_eq!(&conn.recv(100).unwrap()[..], b"abcde");
    assert_eq!(conn.expected_dsn(), 15);
    assert_eq!(&conn.recv(100).unwrap()[..], b"fghijklmno");
    assert!(!conn.is_poisoned());
}

#[test]
fn test_gap_filled_from_other_subflow() {
    let config = ConnectionConfig::builder()
        .recv_buffer_size(6)
        .build()
        .unwrap();
    let mut conn = connection(config);
    let [(master, master_path), (join, join_path)] = established(&mut conn);

    // Join delivers 6 of 8 bytes; "gh" stays queued on it.
    data(&mut conn, join, 0, 0, b"abcdefgh");
    // Buffer full, so this waits on the master.
    data(&mut conn, master, 8, 0, b"ij");
    assert_eq!(conn.expected_dsn(), 6);

    assert_eq!(&conn.recv(6).unwrap()[..], b"abcdef");
    assert_eq!(conn.expected_dsn(), 10);
    assert_eq!(&conn.recv(6).unwrap()[..], b"ghij");

    // Found locally, nothing was retransmitted.
    assert!(master_path.sent().is_empty() && join_path.sent().is_empty());
}

#[test]
fn test_gap_without_source_retransmits() {
    let mut conn = connection(config());
    let [(_, master_path), (join, join_path)] = established(&mut conn);
    conn.send(&[9u8; 100]).unwrap();
    let before = master_path.sent().len();

    data(&mut conn, join, 50, 0, b"late");
    assert_eq!(conn.expected_dsn(), 0);

    let sent = master_path.sent();
    assert_eq!(sent.len(), before + 1);
    let (mapping, _) = sent[before];
    assert_eq!((mapping.dsn, mapping.length), (0, 100));
    assert!(join_path.sent().len() <= 1);
}

#[test]
fn test_gap_retransmits_once_per_cursor() {
    let mut conn = connection(config());
    let [(master, master_path), (join, _)] = established(&mut conn);
    conn.send(&[9u8; 100]).unwrap();
    let before = master_path.sent().len();

    data(&mut conn, join, 50, 0, b"late");
    data(&mut conn, join, 60, 4, b"more");
    data(&mut conn, join, 70, 8, b"even");

    assert_eq!(conn.expected_dsn(), 0);
    assert_eq!(master_path.sent().len(), before + 1);
    assert_eq!(conn.subflows().get(master).unwrap().rto(), Duration::from_secs(2));
}

#[test]
fn test_refused_retransmission_keeps_rto() {
    let mut conn = connection(config());
    let [(master, master_path), (_, join_path)] = established(&mut conn);
    conn.send(&[9u8; 100]).unwrap();
    let sent = master_path.sent().len() + join_path.sent().len();

    master_path.set_refuse_sends(true);
    join_path.set_refuse_sends(true);
    conn.advance_clock(Duration::from_secs(1)).unwrap();
    assert_eq!(master_path.sent().len() + join_path.sent().len(), sent);
    assert_eq!(conn.subflows().get(master).unwrap().rto(), Duration::from_secs(1));
    assert_eq!(conn.timers().pending_of(TimerKind::Retransmit).len(), 1);

    master_path.set_refuse_sends(false);
    join_path.set_refuse_sends(false);
    conn.advance_clock(Duration::from_secs(1)).unwrap();
    assert_eq!(master_path.sent().len() + join_path.sent().len(), sent + 1);
    assert_eq!(conn.subflows().get(master).unwrap().rto(), Duration::from_secs(2));
}

#[test]
fn test_retransmit_timer_backs_off() {
    let mut conn = connection(config());
    let [(master, master_path), (_, join_path)] = established(&mut conn);
    conn.send(&[9u8; 100]).unwrap();
    let sent = master_path.sent().len() + join_path.sent().len();

    conn.advance_clock(Duration::from_secs(1)).unwrap();
    assert_eq!(master_path.sent().len() + join_path.sent().len(), sent + 1);
    assert_eq!(conn.subflows().get(master).unwrap().rto(), Duration::from_secs(2));

    // Rearmed at the pre-backoff RTO.
    conn.advance_clock(Duration::from_secs(1)).unwrap();
    assert_eq!(master_path.sent().len() + join_path.sent().len(), sent + 2);
    assert_eq!(conn.subflows().get(master).unwrap().rto(), Duration::from_secs(4));

    conn.handle_event(ConnectionEvent::DataAck {
        subflow: master,
        dack: 100,
    })
    .unwrap();
    assert_eq!(conn.subflows().get(master).unwrap().rto(), Duration::from_secs(1));
    assert_eq!(conn.timers().pending_count(), 0);
}

#[test]
fn test_passive_open_notifies_accept_once() {
    let mut conn = connection(config());
    let (path, _) = MockPath::new(10, WINDOW);
    let master = conn
        .add_subflow(Box::new(path), SubflowOptions::master(TcpState::Closed))
        .unwrap();

    for (old, new) in [
        (TcpState::Closed, TcpState::SynRcvd),
        (TcpState::SynRcvd, TcpState::Established),
    ] {
        conn.handle_event(ConnectionEvent::SubflowStateChanged {
            subflow: master,
            old,
            new,
        })
        .unwrap();
    }
    assert_eq!(conn.state(), TcpState::Established);

    let (path, _) = MockPath::new(10, WINDOW);
    let join = conn
        .add_subflow(Box::new(path), SubflowOptions::join(TcpState::SynSent))
        .unwrap();
    conn.handle_event(ConnectionEvent::SubflowStateChanged {
        subflow: join,
        old: TcpState::SynSent,
        new: TcpState::Established,
    })
    .unwrap();

    assert_eq!(notifications(&mut conn), vec![AppNotification::Accepted]);
    assert_eq!(conn.subflows().count(SubflowClass::Established), 2);
}

#[test]
fn test_refused_master_fails_connection() {
    let mut conn = connection(config());
    let (path, _) = MockPath::new(10, WINDOW);
    let master = conn
        .add_subflow(Box::new(path), SubflowOptions::master(TcpState::SynSent))
        .unwrap();

    conn.handle_event(ConnectionEvent::SubflowFailed {
        subflow: master,
        failure: SubflowFailure::Refused,
    })
    .unwrap();

    assert_eq!(conn.state(), TcpState::Closed);
    assert!(conn.subflows().is_empty());
    assert_eq!(
        notifications(&mut conn),
        vec![AppNotification::ConnectionFailed]
    );
}

#[test]
fn test_reset_join_is_removed() {
    let mut conn = connection(config());
    let [_, (join, _)] = established(&mut conn);

    conn.handle_event(ConnectionEvent::SubflowFailed {
        subflow: join,
        failure: SubflowFailure::Reset,
    })
    .unwrap();

    assert_eq!(conn.state(), TcpState::Established);
    assert!(conn.subflows().get(join).is_none());
    assert_eq!(conn.total_window(), WINDOW);
}

#[test]
fn test_fatal_error_poisons() {
    let mut conn = connection(config());
    let [(master, _), _] = established(&mut conn);

    let err = conn
        .handle_event(ConnectionEvent::SubflowStateChanged {
            subflow: master,
            old: TcpState::SynSent,
            new: TcpState::Established,
        })
        .unwrap_err();
    assert!(matches!(err, ConnectionError::StateMismatch { .. }));
    assert!(conn.is_poisoned());

    assert!(matches!(
        conn.handle_event(ConnectionEvent::TimerFired(crate::core::TimerId(0))),
        Err(ConnectionError::Poisoned)
    ));
    assert!(matches!(conn.send(b"x"), Err(ConnectionError::Poisoned)));
}

#[test]
fn test_recoverable_errors_are_swallowed() {
    let mut conn = connection(config());
    established(&mut conn);

    conn.handle_event(ConnectionEvent::DataAck {
        subflow: SubflowId(99),
        dack: 10,
    })
    .unwrap();
    assert!(!conn.is_poisoned());
}

#[test]
fn test_rtt_sample_updates_rto() {
    let mut conn = connection(config());
    let [(master, _), _] = established(&mut conn);

    conn.handle_event(ConnectionEvent::RttSample {
        subflow: master,
        rtt: Duration::from_millis(100),
    })
    .unwrap();
    // srtt 100 ms, rttvar 50 ms: 100 + 4 * 50.
    assert_eq!(
        conn.subflows().get(master).unwrap().rto(),
        Duration::from_millis(300)
    );
    assert_eq!(conn.timers().now(), Duration::ZERO);
}

#[test]
fn test_data_fin_goes_on_lowest_rtt_path() {
    let mut conn = connection(config());
    let [(_, master_path), (_, join_path)] = established(&mut conn);
    master_path.set_rtt(50);

    conn.close().unwrap();
    assert!(master_path.control().is_empty());
    assert_eq!(join_path.control(), vec![ControlFlag::DataFin { dsn: 0 }]);
}
