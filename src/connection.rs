//! Application-facing connection API.
//!
//! Each bTCP socket is two concurrent actors:
//!
//! - the **application actor** — whoever holds a [`BtcpSocket`] and calls
//!   `send` / `recv` / `close`;
//! - the **network actor** — a spawned task that owns the
//!   [`ConnectionEngine`] and the transport, and is the *sole* mutator of
//!   protocol state.
//!
//! The two sides communicate only through channels, so no protocol state is
//! ever shared unsynchronised:
//!
//! ```text
//!  BtcpSocket                         network task
//!    │  signal (capacity 1: Accept/Connect/Shutdown)
//!    ├──────────────────────────────────▶│
//!    │  outbound data (bounded; backpressure blocks send)
//!    ├──────────────────────────────────▶│   ┌────────────────┐
//!    │  delivered in-order chunks        │──▶│ConnectionEngine│
//!    │◀──────────────────────────────────┤   └────────────────┘
//!    │  state watch (handshake/teardown progress)
//!    │◀──────────────────────────────────┘
//! ```
//!
//! The network task multiplexes the signal channel, the data channel, the
//! inbound datagram stream, and a periodic tick with `tokio::select!`; after
//! every step it drains the engine's outbound queue to the transport and its
//! reassembled bytes to the delivery channel.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::engine::{Config, ConnectionEngine, EngineFailure};
use crate::segment::{self, Segment};
use crate::socket::{SegmentTransport, SocketError};
use crate::state::{BtcpState, Signal};

/// Per-connection channel depth for outbound data and inbound deliveries.
const CHANNEL_DEPTH: usize = 16;

/// Errors surfaced to the application.
#[derive(Debug)]
pub enum ConnError {
    /// The handshake did not complete within the retry budget.
    HandshakeFailed,
    /// The peer stopped acknowledging; the connection was force-closed.
    MaxRetriesExceeded,
    /// Operation on a connection that is already closed.
    Closed,
    /// Transport-level failure.
    Socket(SocketError),
}

impl std::fmt::Display for ConnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnError::HandshakeFailed => write!(f, "handshake failed"),
            ConnError::MaxRetriesExceeded => {
                write!(f, "peer unresponsive: retransmission limit exceeded")
            }
            ConnError::Closed => write!(f, "connection is closed"),
            ConnError::Socket(e) => write!(f, "socket error: {e}"),
        }
    }
}

impl std::error::Error for ConnError {}

impl From<SocketError> for ConnError {
    fn from(e: SocketError) -> Self {
        ConnError::Socket(e)
    }
}

impl From<EngineFailure> for ConnError {
    fn from(e: EngineFailure) -> Self {
        match e {
            EngineFailure::HandshakeFailed => ConnError::HandshakeFailed,
            EngineFailure::MaxRetriesExceeded => ConnError::MaxRetriesExceeded,
        }
    }
}

/// Snapshot of the network actor's view, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    state: BtcpState,
    failure: Option<EngineFailure>,
}

/// A reliable, ordered byte-stream socket over lossy datagrams.
///
/// Obtain one via [`BtcpSocket::connect`] (active open) or
/// [`BtcpSocket::accept`] (passive open).
pub struct BtcpSocket {
    signal_tx: mpsc::Sender<Signal>,
    /// `None` once `close` has begun; dropping the sender closes the data
    /// channel, which is how the network actor learns that every byte the
    /// application queued has been handed over.
    data_tx: Option<mpsc::Sender<Vec<u8>>>,
    recv_rx: mpsc::Receiver<Vec<u8>>,
    status_rx: watch::Receiver<Status>,
    handle: JoinHandle<()>,
    /// Delivered bytes not yet consumed by `recv` (when a chunk exceeded
    /// the caller's `max`).
    readahead: VecDeque<u8>,
}

impl BtcpSocket {
    /// Active open: run the client half of the handshake against `peer`.
    ///
    /// Resolves once the connection is established, or fails with
    /// [`ConnError::HandshakeFailed`] after the retry budget is spent.
    pub async fn connect<T: SegmentTransport>(
        transport: T,
        peer: SocketAddr,
        config: Config,
    ) -> Result<Self, ConnError> {
        let mut socket = Self::spawn(transport, Some(peer), config);
        socket.signal(Signal::Connect).await?;
        socket.await_established().await?;
        Ok(socket)
    }

    /// Passive open: wait for a peer's SYN and complete the handshake.
    ///
    /// The peer address is learned from the first valid SYN to arrive.
    pub async fn accept<T: SegmentTransport>(
        transport: T,
        config: Config,
    ) -> Result<Self, ConnError> {
        let mut socket = Self::spawn(transport, None, config);
        socket.signal(Signal::Accept).await?;
        socket.await_established().await?;
        Ok(socket)
    }

    /// Queue `data` for reliable in-order delivery to the peer.
    ///
    /// Returns the number of bytes accepted (all of them).  Non-blocking
    /// with respect to the network actor, but blocks the caller while the
    /// local outgoing buffer is full.
    pub async fn send(&self, data: &[u8]) -> Result<usize, ConnError> {
        if data.is_empty() {
            return Ok(0);
        }
        self.check_failure()?;
        let tx = self.data_tx.as_ref().ok_or(ConnError::Closed)?;
        tx.send(data.to_vec())
            .await
            .map_err(|_| ConnError::Closed)?;
        Ok(data.len())
    }

    /// Receive up to `max` in-order bytes.
    ///
    /// Blocks until at least one byte is available.  Returns an empty
    /// vector once the peer has closed and all data has been consumed
    /// (end of stream).
    pub async fn recv(&mut self, max: usize) -> Result<Vec<u8>, ConnError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        if self.readahead.is_empty() {
            match self.recv_rx.recv().await {
                Some(chunk) => self.readahead.extend(chunk),
                None => {
                    // Delivery channel closed: clean EOF or failure.
                    return match self.status_rx.borrow().failure {
                        Some(f) => Err(f.into()),
                        None => Ok(Vec::new()),
                    };
                }
            }
        }
        let n = max.min(self.readahead.len());
        Ok(self.readahead.drain(..n).collect())
    }

    /// Gracefully close: flush all queued data, exchange FINs, and wait for
    /// the network actor to finish.
    pub async fn close(mut self) -> Result<(), ConnError> {
        // Closing the data channel is what orders shutdown after all queued
        // data: the actor drains the channel to its end before handing the
        // shutdown to the engine.  The explicit signal carries the intent;
        // a failed send means the actor already terminated.
        drop(self.data_tx.take());
        // Stop accepting deliveries; inbound data the application never
        // read is discarded on close rather than left for the actor to
        // hold.
        self.recv_rx.close();
        let _ = self.signal_tx.send(Signal::Shutdown).await;
        let _ = self
            .status_rx
            .wait_for(|status| status.state.is_closed())
            .await;
        let failure = self.status_rx.borrow().failure;
        let _ = self.handle.await;
        match failure {
            Some(f) => Err(f.into()),
            None => Ok(()),
        }
    }

    /// Current connection state, as last published by the network actor.
    pub fn state(&self) -> BtcpState {
        self.status_rx.borrow().state
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn spawn<T: SegmentTransport>(
        transport: T,
        peer: Option<SocketAddr>,
        config: Config,
    ) -> Self {
        // Single-slot signal channel: the application issues one lifecycle
        // request at a time.
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (data_tx, data_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (recv_tx, recv_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (status_tx, status_rx) = watch::channel(Status {
            state: BtcpState::Closed,
            failure: None,
        });

        let engine = ConnectionEngine::new(config);
        let handle = tokio::spawn(network_actor(
            transport, peer, engine, config, signal_rx, data_rx, recv_tx, status_tx,
        ));

        Self {
            signal_tx,
            data_tx: Some(data_tx),
            recv_rx,
            status_rx,
            handle,
            readahead: VecDeque::new(),
        }
    }

    async fn signal(&self, signal: Signal) -> Result<(), ConnError> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|_| ConnError::Closed)
    }

    async fn await_established(&mut self) -> Result<(), ConnError> {
        // The watch starts out in Closed, so wait for an affirmative
        // outcome: established, or a recorded failure.
        let status = self
            .status_rx
            .wait_for(|s| s.state.is_established() || s.failure.is_some())
            .await
            .map_err(|_| ConnError::Closed)?;
        match status.failure {
            None => Ok(()),
            Some(f) => Err(f.into()),
        }
    }

    fn check_failure(&self) -> Result<(), ConnError> {
        match self.status_rx.borrow().failure {
            Some(f) => Err(f.into()),
            None => Ok(()),
        }
    }
}

/// The network actor: sole owner and mutator of the protocol engine.
#[allow(clippy::too_many_arguments)]
async fn network_actor<T: SegmentTransport>(
    transport: T,
    mut peer: Option<SocketAddr>,
    mut engine: ConnectionEngine,
    config: Config,
    mut signal_rx: mpsc::Receiver<Signal>,
    mut data_rx: mpsc::Receiver<Vec<u8>>,
    recv_tx: mpsc::Sender<Vec<u8>>,
    status_tx: watch::Sender<Status>,
) {
    // Tick faster than the timeout so expiry is noticed promptly; this is
    // the coarse granularity the single-timer design accepts.
    let tick_period = (config.timeout / 4).max(Duration::from_millis(1));
    let mut tick = tokio::time::interval(tick_period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Bytes accepted from the data channel that the engine had no room for
    // yet.  Refilled into the engine as the window opens.
    let mut stash: VecDeque<u8> = VecDeque::new();
    // Delivered chunks the application has not made room for yet.  The
    // actor must never block on delivery: it is also the task servicing
    // the retransmission timer and the teardown exchange.
    let mut undelivered: VecDeque<Vec<u8>> = VecDeque::new();
    let mut data_open = true;
    // Shutdown is forwarded to the engine only after the data channel has
    // been drained to its end, so a FIN can never overtake queued data.
    let mut shutdown_pending = false;
    let mut shutdown_forwarded = false;
    // The engine is born in Closed; only exit once it has left that state
    // (or failed outright), otherwise the first tick would end the actor
    // before the Connect/Accept signal arrives.
    let mut started = false;

    loop {
        tokio::select! {
            Some(sig) = signal_rx.recv() => {
                log::debug!("[net] signal {sig:?}");
                match sig {
                    Signal::Shutdown => shutdown_pending = true,
                    sig => engine.on_signal(sig, Instant::now()),
                }
            }

            maybe_chunk = data_rx.recv(),
                if data_open && stash.is_empty() && engine.can_accept_data() =>
            {
                match maybe_chunk {
                    Some(chunk) => stash.extend(chunk),
                    None => {
                        // Channel closed and fully drained.  Whether via
                        // close() or a dropped handle, the peer still gets
                        // a FIN.
                        data_open = false;
                        shutdown_pending = true;
                    }
                }
            }

            result = transport.recv_datagram() => {
                let now = Instant::now();
                match result {
                    Ok((raw, addr)) => {
                        if peer.is_none() && is_valid_syn(&raw) {
                            log::debug!("[net] locking onto peer {addr}");
                            peer = Some(addr);
                        }
                        if peer == Some(addr) {
                            engine.on_datagram(&raw, now);
                        } else {
                            log::debug!("[net] datagram from unknown {addr}; dropped");
                        }
                    }
                    Err(e) => {
                        log::warn!("[net] transport error: {e}");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                engine.on_tick(Instant::now());
            }
        }

        // Feed stashed bytes into the engine as window space allows.
        while !stash.is_empty() && engine.can_accept_data() {
            stash.make_contiguous();
            let (front, _) = stash.as_slices();
            let written = engine.write(front, Instant::now());
            if written == 0 {
                break;
            }
            stash.drain(..written);
        }

        // Everything the application queued is in the engine; now the
        // shutdown may proceed (the engine still flushes its own window
        // before emitting the FIN).
        if shutdown_pending && !shutdown_forwarded && !data_open && stash.is_empty() {
            shutdown_forwarded = true;
            engine.on_signal(Signal::Shutdown, Instant::now());
        }

        // Drain outbound segments to the wire.
        if let Some(dest) = peer {
            while let Some(seg) = engine.poll_outbound() {
                if let Err(e) = transport.send_segment(&seg, dest).await {
                    log::warn!("[net] send failed: {e}");
                    break;
                }
            }
        }

        // Deliver reassembled bytes to the application.  A full delivery
        // channel parks chunks in the overflow queue; they are retried on
        // every subsequent iteration (each tick at the latest).
        if engine.available() > 0 {
            undelivered.push_back(engine.take_delivered());
        }
        while let Some(chunk) = undelivered.pop_front() {
            match recv_tx.try_send(chunk) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(chunk)) => {
                    undelivered.push_front(chunk);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiving side of the application is gone; the
                    // dropped data sender will drive the shutdown.
                    undelivered.clear();
                    shutdown_pending = true;
                    break;
                }
            }
        }

        let status = Status {
            state: engine.state(),
            failure: engine.failure(),
        };
        status_tx.send_if_modified(|s| {
            if *s != status {
                *s = status;
                true
            } else {
                false
            }
        });

        if !engine.state().is_closed() {
            started = true;
        } else if started || engine.failure().is_some() {
            log::debug!("[net] connection closed; actor exiting");
            break;
        }
    }
}

/// `true` when `raw` is a well-formed, checksum-valid SYN segment —
/// the only datagram a passive open locks onto.
fn is_valid_syn(raw: &[u8]) -> bool {
    segment::verify_checksum(raw)
        && matches!(
            Segment::decode(raw),
            Ok(seg) if seg.header.syn && !seg.header.ack_flag
        )
}
