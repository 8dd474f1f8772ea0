//! Per-connection protocol engine.
//!
//! [`ConnectionEngine`] composes the segment codec, the state machine, the
//! sliding-window sender, the reassembly buffer, and the retransmission
//! timer for one logical connection.  It is deliberately synchronous and
//! I/O-free: each invocation processes exactly one input — a local signal,
//! a chunk of application data, one inbound datagram, or one timer tick —
//! and pushes any resulting segments onto an outbound queue that the
//! network actor drains to the wire.
//!
//! Keeping the engine pure means the whole protocol (handshake, loss
//! recovery, teardown) is unit-testable by feeding it byte buffers and
//! fabricated clock values, with no sockets or tasks involved.
//!
//! # Inputs and outputs
//!
//! ```text
//!  on_signal ──┐                        ┌──▶ poll_outbound (segments)
//!  write     ──┤   ┌───────────────┐    │
//!  on_datagram──┼──▶│ConnectionEngine│───┼──▶ read (in-order bytes)
//!  on_tick   ──┘   └───────────────┘    └──▶ state / failure
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::reassembly::{Accepted, ReceiveBuffer};
use crate::segment::{self, Header, Segment, PAYLOAD_SIZE};
use crate::state::{BtcpState, Event, Signal};
use crate::timer::RetransmitTimer;
use crate::window::WindowSender;

/// Give up on a segment (or handshake step) after this many transmissions.
///
/// This is the peer-unresponsive bound: without it, loss of connectivity
/// would leave `send`/`receive` blocked forever.
pub const MAX_RETRIES: u32 = 6;

/// Fixed per-connection configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Sliding-window size in segments (also advertised in every header).
    pub window: u8,
    /// Retransmission timeout.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: 4,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Terminal failures the engine can report after force-closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFailure {
    /// Handshake control segment went unanswered past [`MAX_RETRIES`].
    HandshakeFailed,
    /// A data or teardown segment went unanswered past [`MAX_RETRIES`].
    MaxRetriesExceeded,
}

impl std::fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineFailure::HandshakeFailed => write!(f, "handshake failed"),
            EngineFailure::MaxRetriesExceeded => {
                write!(f, "peer unresponsive: retransmission limit exceeded")
            }
        }
    }
}

impl std::error::Error for EngineFailure {}

/// Protocol engine for a single connection.
pub struct ConnectionEngine {
    state: BtcpState,
    config: Config,
    sender: WindowSender,
    receiver: ReceiveBuffer,
    timer: RetransmitTimer,

    /// Segments ready for the wire, drained by [`poll_outbound`].
    ///
    /// [`poll_outbound`]: ConnectionEngine::poll_outbound
    outbound: VecDeque<Segment>,
    /// Application bytes accepted by [`write`] but not yet segmented.
    ///
    /// [`write`]: ConnectionEngine::write
    pending: VecDeque<u8>,

    /// Our initial sequence number (SYN consumes it).
    local_isn: u16,
    /// The control segment currently being retried on the timer: SYN,
    /// SYN+ACK, FIN, or FIN+ACK depending on the state.
    control: Option<Segment>,
    /// Transmissions of the current control segment.
    control_tx_count: u32,
    /// Sequence number consumed by our FIN, once sent.
    fin_seq: Option<u16>,
    /// Shutdown requested; FIN goes out once all data is flushed.
    shutdown_requested: bool,
    /// Terminal failure, if the engine force-closed.
    failure: Option<EngineFailure>,
}

impl ConnectionEngine {
    /// Create an engine in the `Closed` state.
    pub fn new(config: Config) -> Self {
        let window = config.window.max(1) as usize;
        Self {
            state: BtcpState::Closed,
            sender: WindowSender::new(0, window),
            receiver: ReceiveBuffer::new(0, window),
            timer: RetransmitTimer::new(config.timeout),
            outbound: VecDeque::new(),
            pending: VecDeque::new(),
            local_isn: 0,
            control: None,
            control_tx_count: 0,
            fin_seq: None,
            shutdown_requested: false,
            failure: None,
            config,
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> BtcpState {
        self.state
    }

    /// Terminal failure, if any.
    pub fn failure(&self) -> Option<EngineFailure> {
        self.failure
    }

    /// Next outbound segment, if any is queued.
    pub fn poll_outbound(&mut self) -> Option<Segment> {
        self.outbound.pop_front()
    }

    /// In-order bytes ready for the application.
    pub fn available(&self) -> usize {
        self.receiver.available()
    }

    /// Drain all in-order received bytes.
    pub fn take_delivered(&mut self) -> Vec<u8> {
        self.receiver.take_available()
    }

    /// `true` while [`write`] will accept more application data.
    ///
    /// Bounded so a stalled peer cannot make us buffer without limit; the
    /// async layer adds channel backpressure on top.
    ///
    /// [`write`]: ConnectionEngine::write
    pub fn can_accept_data(&self) -> bool {
        self.state.is_established()
            && !self.shutdown_requested
            && self.pending.len() < self.config.window as usize * PAYLOAD_SIZE
    }

    /// `true` once every written byte has been sent *and* acknowledged.
    pub fn all_data_flushed(&self) -> bool {
        self.pending.is_empty() && !self.sender.has_unacked()
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Apply a local application signal.
    pub fn on_signal(&mut self, signal: Signal, now: Instant) {
        match signal {
            Signal::Connect => self.start_connect(now),
            Signal::Accept => self.start_accept(),
            Signal::Shutdown => self.start_shutdown(now),
        }
    }

    /// Queue application bytes for transmission.
    ///
    /// Returns the number of bytes accepted (0 unless established).  Data
    /// is segmented and sent as window space allows, on this call and on
    /// subsequent ticks/ACKs.
    pub fn write(&mut self, data: &[u8], now: Instant) -> usize {
        if !self.state.is_established() || self.shutdown_requested {
            return 0;
        }
        let room = (self.config.window as usize * PAYLOAD_SIZE)
            .saturating_sub(self.pending.len());
        let n = data.len().min(room);
        self.pending.extend(&data[..n]);
        self.pump_data(now);
        n
    }

    /// Process one raw inbound datagram.
    ///
    /// Corrupt (bad checksum) and malformed datagrams are dropped silently;
    /// recovery is the sender's timeout, never a NACK.
    pub fn on_datagram(&mut self, raw: &[u8], now: Instant) {
        if !segment::verify_checksum(raw) {
            log::debug!("[engine] dropping datagram with bad checksum");
            return;
        }
        let seg = match Segment::decode(raw) {
            Ok(seg) => seg,
            Err(e) => {
                log::debug!("[engine] dropping malformed datagram: {e}");
                return;
            }
        };
        self.handle_segment(seg, now);
    }

    /// Advance time-driven work: retransmission on timer expiry, pending
    /// data transmission, and the deferred FIN once shutdown has drained.
    pub fn on_tick(&mut self, now: Instant) {
        if self.state.is_closed() {
            return;
        }
        if self.timer.is_expired(now) {
            self.on_timeout(now);
        }
        self.pump_data(now);
        self.maybe_send_fin(now);
    }

    // -----------------------------------------------------------------------
    // Local signals
    // -----------------------------------------------------------------------

    fn start_connect(&mut self, now: Instant) {
        let Some(next) = self.state.transition(Event::Connect) else {
            log::warn!("[engine] connect ignored in state {}", self.state);
            return;
        };
        self.state = next;
        self.local_isn = rand::random::<u16>();
        let syn = self.control_segment(self.local_isn, 0, true, false, false);
        log::debug!("[engine] → SYN seq={}", self.local_isn);
        self.send_control(syn, now);
    }

    fn start_accept(&mut self) {
        match self.state.transition(Event::Accept) {
            Some(next) => self.state = next,
            None => log::warn!("[engine] accept ignored in state {}", self.state),
        }
    }

    fn start_shutdown(&mut self, now: Instant) {
        match self.state {
            BtcpState::Established => {
                self.shutdown_requested = true;
                self.maybe_send_fin(now);
            }
            BtcpState::FinSent | BtcpState::Closing | BtcpState::Closed => {}
            // Shutdown before the handshake finished: nothing to flush,
            // nothing to tear down.
            _ => {
                log::debug!("[engine] shutdown in {}; closing immediately", self.state);
                self.state = BtcpState::Closed;
                self.timer.disarm();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Segment handling
    // -----------------------------------------------------------------------

    fn handle_segment(&mut self, seg: Segment, now: Instant) {
        let h = seg.header;
        match self.state {
            BtcpState::SynSent if h.syn && h.ack_flag => {
                if h.ack != self.local_isn.wrapping_add(1) {
                    log::debug!("[engine] SYN+ACK with wrong ack {}; dropped", h.ack);
                    return;
                }
                // Peer's SYN consumes one sequence number.
                let window = self.config.window.max(1) as usize;
                self.sender = WindowSender::new(self.local_isn.wrapping_add(1), window);
                self.receiver = ReceiveBuffer::new(h.seq.wrapping_add(1), window);
                self.clear_control();
                self.state = self.state.transition(Event::RecvSynAck).unwrap_or(self.state);
                log::debug!("[engine] ← SYN+ACK; established, → ACK");
                self.queue_ack();
            }
            BtcpState::Accepting if h.syn && !h.ack_flag => {
                self.local_isn = rand::random::<u16>();
                let window = self.config.window.max(1) as usize;
                self.sender = WindowSender::new(self.local_isn.wrapping_add(1), window);
                self.receiver = ReceiveBuffer::new(h.seq.wrapping_add(1), window);
                self.state = self.state.transition(Event::RecvSyn).unwrap_or(self.state);
                let syn_ack = self.control_segment(
                    self.local_isn,
                    self.receiver.ack_number(),
                    true,
                    true,
                    false,
                );
                log::debug!(
                    "[engine] ← SYN seq={}; → SYN+ACK seq={}",
                    h.seq,
                    self.local_isn
                );
                self.send_control(syn_ack, now);
            }
            BtcpState::SynRcvd => {
                if h.syn && !h.ack_flag {
                    // Our SYN+ACK was lost; the peer repeated its SYN.
                    log::debug!("[engine] duplicate SYN; re-sending SYN+ACK");
                    self.requeue_control(now);
                } else if h.ack_flag && h.ack == self.local_isn.wrapping_add(1) {
                    self.clear_control();
                    self.state = self.state.transition(Event::RecvAck).unwrap_or(self.state);
                    log::debug!("[engine] ← ACK; established");
                    // The handshake ACK may already piggyback data.
                    if !seg.payload.is_empty() || h.fin {
                        self.handle_established(seg, now);
                    }
                } else {
                    log::debug!("[engine] unexpected segment in SynRcvd; dropped");
                }
            }
            BtcpState::Established => self.handle_established(seg, now),
            BtcpState::FinSent => self.handle_fin_sent(seg),
            BtcpState::Closing => self.handle_closing(seg, now),
            _ => {
                log::debug!(
                    "[engine] segment inconsistent with state {}; dropped",
                    self.state
                );
            }
        }
    }

    fn handle_established(&mut self, seg: Segment, now: Instant) {
        let h = seg.header;

        if h.syn && h.ack_flag {
            // Retransmitted SYN+ACK: our handshake ACK was lost.
            log::debug!("[engine] duplicate SYN+ACK; re-sending ACK");
            self.queue_ack();
            return;
        }

        if h.ack_flag {
            let acked = self.sender.on_ack(h.ack);
            if acked > 0 {
                log::debug!("[engine] ← ACK {} (slid {} segment(s))", h.ack, acked);
                if self.sender.has_unacked() {
                    // A new segment became the oldest outstanding one.
                    self.timer.restart(now);
                } else {
                    self.timer.disarm();
                }
                self.pump_data(now);
            }
        }

        if !seg.payload.is_empty() {
            let disposition = self.receiver.on_segment(h.seq, &seg.payload);
            log::debug!(
                "[engine] ← DATA seq={} len={} ({disposition:?})",
                h.seq,
                seg.payload.len()
            );
            match disposition {
                Accepted::Delivered | Accepted::Buffered | Accepted::Duplicate => {
                    self.queue_ack()
                }
                Accepted::OutOfWindow => {}
            }
        }

        if h.fin {
            // Peer closed its half.  Acknowledge with FIN+ACK; our FIN
            // consumes a sequence number of its own.
            self.receiver.on_fin(h.seq);
            let fin_seq = self.sender.next_seq();
            self.fin_seq = Some(fin_seq);
            let fin_ack =
                self.control_segment(fin_seq, self.receiver.ack_number(), false, true, true);
            self.state = self.state.transition(Event::RecvFin).unwrap_or(self.state);
            log::debug!("[engine] ← FIN; → FIN+ACK seq={fin_seq}");
            self.send_control(fin_ack, now);
        }
    }

    fn handle_fin_sent(&mut self, seg: Segment) {
        let h = seg.header;
        let fin_acked = self
            .fin_seq
            .is_some_and(|fs| h.ack_flag && h.ack == fs.wrapping_add(1));
        if !fin_acked {
            log::debug!("[engine] segment in FinSent does not ack our FIN; dropped");
            return;
        }
        if h.fin {
            // Peer answered with FIN+ACK; complete the exchange.
            self.receiver.on_fin(h.seq);
            self.queue_ack();
        }
        self.clear_control();
        self.timer.disarm();
        self.state = self.state.transition(Event::RecvAck).unwrap_or(self.state);
        log::debug!("[engine] ← ACK of FIN; closed");
    }

    fn handle_closing(&mut self, seg: Segment, now: Instant) {
        let h = seg.header;
        if h.fin {
            // Retransmitted FIN: our FIN+ACK was lost.  The final ACK never
            // carries FIN, so this cannot be confused with it.
            log::debug!("[engine] duplicate FIN; re-sending FIN+ACK");
            self.requeue_control(now);
            return;
        }
        let fin_acked = self
            .fin_seq
            .is_some_and(|fs| h.ack_flag && h.ack == fs.wrapping_add(1));
        if fin_acked {
            self.clear_control();
            self.timer.disarm();
            self.state = self.state.transition(Event::RecvAck).unwrap_or(self.state);
            log::debug!("[engine] ← final ACK; closed");
        }
    }

    // -----------------------------------------------------------------------
    // Timeout and transmission
    // -----------------------------------------------------------------------

    fn on_timeout(&mut self, now: Instant) {
        if self.control.is_some() {
            if self.control_tx_count >= MAX_RETRIES {
                let failure = match self.state {
                    BtcpState::SynSent | BtcpState::SynRcvd => EngineFailure::HandshakeFailed,
                    _ => EngineFailure::MaxRetriesExceeded,
                };
                log::warn!("[engine] {} unanswered after {MAX_RETRIES} tries", self.state);
                self.fail(failure);
                return;
            }
            log::debug!("[engine] timeout; re-sending control segment");
            self.requeue_control(now);
            return;
        }

        if self.sender.has_unacked() {
            if self.sender.oldest_tx_count() >= MAX_RETRIES {
                log::warn!("[engine] data unacked after {MAX_RETRIES} transmissions");
                self.fail(EngineFailure::MaxRetriesExceeded);
                return;
            }
            // Go-Back-N: retransmit the whole outstanding window, in order.
            let window: Vec<Segment> = self.sender.unacked_segments().cloned().collect();
            log::debug!("[engine] timeout; retransmitting {} segment(s)", window.len());
            self.outbound.extend(window);
            self.sender.on_retransmit();
            self.timer.restart(now);
        } else {
            self.timer.disarm();
        }
    }

    /// Segment pending application bytes into the window while space lasts.
    fn pump_data(&mut self, now: Instant) {
        if !self.state.is_established() {
            return;
        }
        while self.sender.can_send() && !self.pending.is_empty() {
            let n = self.pending.len().min(PAYLOAD_SIZE);
            let payload: Vec<u8> = self.pending.drain(..n).collect();
            let seg = Segment {
                header: Header {
                    seq: self.sender.next_seq(),
                    ack: self.receiver.ack_number(),
                    syn: false,
                    ack_flag: true,
                    fin: false,
                    window: self.config.window,
                    length: 0,
                    checksum: 0,
                },
                payload,
            };
            log::debug!(
                "[engine] → DATA seq={} len={}",
                seg.header.seq,
                seg.payload.len()
            );
            self.sender.record_sent(seg.clone());
            self.outbound.push_back(seg);
            self.timer.arm(now);
        }
    }

    /// Send our FIN once shutdown was requested and all data is flushed.
    fn maybe_send_fin(&mut self, now: Instant) {
        if !self.shutdown_requested
            || self.state != BtcpState::Established
            || !self.all_data_flushed()
        {
            return;
        }
        let fin_seq = self.sender.next_seq();
        self.fin_seq = Some(fin_seq);
        let fin = self.control_segment(fin_seq, self.receiver.ack_number(), false, true, true);
        self.state = self.state.transition(Event::Close).unwrap_or(self.state);
        log::debug!("[engine] → FIN seq={fin_seq}");
        self.send_control(fin, now);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn control_segment(&self, seq: u16, ack: u16, syn: bool, ack_flag: bool, fin: bool) -> Segment {
        Segment {
            header: Header {
                seq,
                ack,
                syn,
                ack_flag,
                fin,
                window: self.config.window,
                length: 0,
                checksum: 0,
            },
            payload: Vec::new(),
        }
    }

    /// Queue a control segment and start its retransmission cycle.
    fn send_control(&mut self, seg: Segment, now: Instant) {
        self.outbound.push_back(seg.clone());
        self.control = Some(seg);
        self.control_tx_count = 1;
        self.timer.restart(now);
    }

    /// Re-send the current control segment and restart the timer.
    fn requeue_control(&mut self, now: Instant) {
        if let Some(seg) = &self.control {
            self.outbound.push_back(seg.clone());
            self.control_tx_count += 1;
            self.timer.restart(now);
        }
    }

    fn clear_control(&mut self) {
        self.control = None;
        self.control_tx_count = 0;
        self.timer.disarm();
    }

    fn queue_ack(&mut self) {
        let ack = self.control_segment(
            self.sender.next_seq(),
            self.receiver.ack_number(),
            false,
            true,
            false,
        );
        self.outbound.push_back(ack);
    }

    fn fail(&mut self, failure: EngineFailure) {
        self.failure = Some(failure);
        self.state = BtcpState::Closed;
        self.timer.disarm();
        self.control = None;
        self.outbound.clear();
    }

    /// Copy up to `buf.len()` delivered bytes out of the reassembly buffer.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.receiver.read(buf)
    }
}
