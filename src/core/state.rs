//! TCP-style state machine shared by the connection and its subflows.

use std::fmt;

/// Lifecycle state of a subflow or of the meta-connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    /// No connection.
    Closed,
    /// Active open, waiting for the peer's reply.
    SynSent,
    /// Passive open, waiting for the final handshake ack.
    SynRcvd,
    /// Data transfer.
    Established,
    /// Local close sent, waiting for its ack.
    FinWait1,
    /// Local close acked, waiting for the peer's close.
    FinWait2,
    /// Both sides closed simultaneously.
    Closing,
    /// Peer closed, local side still open.
    CloseWait,
    /// Local close sent after the peer closed.
    LastAck,
    /// Waiting for stray segments to expire.
    TimeWait,
}

impl TcpState {
    /// Upper-case name as used in protocol traces.
    pub fn name(self) -> &'static str {
        match self {
            TcpState::Closed => "CLOSED",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRcvd => "SYN_RCVD",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::Closing => "CLOSING",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
        }
    }

    /// Whether the handshake is still in progress.
    pub fn is_handshaking(self) -> bool {
        matches!(self, TcpState::SynSent | TcpState::SynRcvd)
    }

    /// Whether a close has started on either side.
    pub fn is_tearing_down(self) -> bool {
        matches!(
            self,
            TcpState::FinWait1
                | TcpState::FinWait2
                | TcpState::Closing
                | TcpState::CloseWait
                | TcpState::LastAck
                | TcpState::TimeWait
        )
    }

    /// Whether the application may still queue data in this state.
    pub fn can_send(self) -> bool {
        matches!(self, TcpState::Established | TcpState::CloseWait)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Self-transitions are not legal. A reset can take any open state to
    /// [`TcpState::Closed`].
    pub fn can_transition_to(self, next: TcpState) -> bool {
        use TcpState::*;
        match (self, next) {
            (Closed, SynSent | SynRcvd) => true,
            (SynSent, Established | SynRcvd | Closed) => true,
            (SynRcvd, Established | FinWait1 | Closed) => true,
            (Established, FinWait1 | CloseWait | Closed) => true,
            (FinWait1, FinWait2 | Closing | TimeWait | Closed) => true,
            (FinWait2, TimeWait | Closed) => true,
            (Closing, TimeWait | Closed) => true,
            (CloseWait, LastAck | Closed) => true,
            (LastAck, Closed) => true,
            (TimeWait, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
