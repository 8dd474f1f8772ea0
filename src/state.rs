//! Connection finite-state machine (FSM) types.
//!
//! This module defines every possible state a bTCP connection can occupy and
//! the transition table that moves between them.  Transitions are triggered
//! either by a local request from the application actor or by a segment
//! arriving from the peer; anything not listed in the table leaves the state
//! unchanged (the segment is dropped, never fatal).
//!
//! ```text
//!            local connect                 local accept
//!   CLOSED ───────────────▶ SYN_SENT   CLOSED ─────────▶ ACCEPTING
//!                               │                            │
//!                   recv SYN+ACK│                   recv SYN │
//!                               ▼                            ▼
//!                         ESTABLISHED ◀──── recv ACK ──── SYN_RCVD
//!                          │        │
//!               local close│        │recv FIN
//!                          ▼        ▼
//!                      FIN_SENT   CLOSING
//!                          │        │
//!             recv ACK of  │        │recv ACK
//!                      FIN ▼        ▼
//!                        CLOSED   CLOSED
//! ```

/// All possible states of the connection FSM.
///
/// `Closed` is both the initial and the terminal state; a connection that
/// returns to `Closed` after teardown is finished and not reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BtcpState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// Passive open: waiting for a peer's SYN.
    Accepting,
    /// Active open: SYN sent, waiting for SYN+ACK.
    SynSent,
    /// SYN received and SYN+ACK sent; waiting for the final handshake ACK.
    SynRcvd,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for its acknowledgement.
    FinSent,
    /// Peer's FIN received and FIN+ACK sent; waiting for the final ACK.
    Closing,
}

impl BtcpState {
    /// `true` once the connection has fully shut down (or never opened).
    pub fn is_closed(self) -> bool {
        self == BtcpState::Closed
    }

    /// `true` while application data may flow.
    pub fn is_established(self) -> bool {
        self == BtcpState::Established
    }

    /// Apply `event` to the current state.
    ///
    /// Returns `Some(next)` for a legal transition and `None` when the event
    /// is not meaningful in this state; callers drop the offending segment
    /// and carry on.
    pub fn transition(self, event: Event) -> Option<BtcpState> {
        use BtcpState::*;
        match (self, event) {
            (Closed, Event::Connect) => Some(SynSent),
            (Closed, Event::Accept) => Some(Accepting),
            (Accepting, Event::RecvSyn) => Some(SynRcvd),
            (SynSent, Event::RecvSynAck) => Some(Established),
            (SynRcvd, Event::RecvAck) => Some(Established),
            (Established, Event::Close) => Some(FinSent),
            (Established, Event::RecvFin) => Some(Closing),
            (FinSent, Event::RecvAck) => Some(Closed),
            (Closing, Event::RecvAck) => Some(Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BtcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Events that can drive the FSM: local application requests and the
/// protocol-relevant classes of received segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Application requested an active open.
    Connect,
    /// Application requested a passive open.
    Accept,
    /// Application requested shutdown (all data flushed).
    Close,
    /// Peer's SYN arrived.
    RecvSyn,
    /// Peer's SYN+ACK arrived, acknowledging our SYN.
    RecvSynAck,
    /// Peer's ACK arrived for the segment the current state is waiting on.
    RecvAck,
    /// Peer's FIN arrived.
    RecvFin,
}

/// Requests the application actor passes to the network actor.
///
/// Carried on a dedicated single-slot channel rather than a shared field so
/// ordering and visibility between the two actors are well defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Begin a passive open.
    Accept,
    /// Begin an active open.
    Connect,
    /// Flush outstanding data, then tear the connection down.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use BtcpState::*;

    #[test]
    fn initial_state_is_closed() {
        assert_eq!(BtcpState::default(), Closed);
        assert!(Closed.is_closed());
    }

    #[test]
    fn client_handshake_path() {
        let s = Closed.transition(Event::Connect).unwrap();
        assert_eq!(s, SynSent);
        let s = s.transition(Event::RecvSynAck).unwrap();
        assert_eq!(s, Established);
        assert!(s.is_established());
    }

    #[test]
    fn server_handshake_path() {
        let s = Closed.transition(Event::Accept).unwrap();
        assert_eq!(s, Accepting);
        let s = s.transition(Event::RecvSyn).unwrap();
        assert_eq!(s, SynRcvd);
        let s = s.transition(Event::RecvAck).unwrap();
        assert_eq!(s, Established);
    }

    #[test]
    fn active_close_path() {
        let s = Established.transition(Event::Close).unwrap();
        assert_eq!(s, FinSent);
        assert_eq!(s.transition(Event::RecvAck), Some(Closed));
    }

    #[test]
    fn passive_close_path() {
        let s = Established.transition(Event::RecvFin).unwrap();
        assert_eq!(s, Closing);
        assert_eq!(s.transition(Event::RecvAck), Some(Closed));
    }

    #[test]
    fn illegal_events_are_rejected() {
        // Data-bearing events before the handshake completes.
        assert_eq!(Closed.transition(Event::RecvFin), None);
        assert_eq!(Accepting.transition(Event::RecvAck), None);
        assert_eq!(SynSent.transition(Event::RecvSyn), None);
        // Connecting twice, or closing a connection that never opened.
        assert_eq!(SynSent.transition(Event::Connect), None);
        assert_eq!(Closed.transition(Event::Close), None);
    }

    #[test]
    fn stray_segments_leave_terminal_state_terminal() {
        for ev in [Event::RecvSyn, Event::RecvSynAck, Event::RecvAck, Event::RecvFin] {
            assert_eq!(Closed.transition(ev), None);
        }
    }
}
