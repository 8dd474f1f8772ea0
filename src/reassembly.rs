//! Receive-side reassembly and cumulative-ACK state.
//!
//! [`ReceiveBuffer`] sits between segment decoding and the application:
//!
//! - In-order segments (`seq == expected_seq`) are delivered immediately,
//!   after which any buffered segments that have become contiguous are
//!   drained in turn.
//! - Out-of-order segments within the receive window are buffered, keyed by
//!   sequence number; re-delivery of the same segment is idempotent.
//! - Segments behind `expected_seq` are duplicates of already-delivered
//!   data and are dropped — but the cumulative ACK is still re-emitted so a
//!   sender that missed our ACK can recover.
//!
//! The cumulative ACK is always `expected_seq`: the next sequence number
//! missing from the in-order stream.  Checksum verification happens before
//! this module; corrupt segments never reach it.
//!
//! This module only manages state; the connection engine builds and sends
//! the actual ACK segments.

use std::collections::{HashMap, VecDeque};

use crate::segment::PAYLOAD_SIZE;

/// What [`ReceiveBuffer::on_segment`] did with a segment.
///
/// Every variant still warrants a cumulative ACK; the distinction exists for
/// logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// In order: payload (plus any newly contiguous buffered data) was
    /// delivered to the application buffer.
    Delivered,
    /// Ahead of `expected_seq` but within the window: stashed for later.
    Buffered,
    /// Behind `expected_seq`: already delivered, dropped.
    Duplicate,
    /// Too far ahead of the window (or an empty segment): dropped.
    OutOfWindow,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct ReceiveBuffer {
    /// Next sequence number expected in order (`RCV.NXT`).
    expected_seq: u16,
    /// Segments received ahead of `expected_seq`, keyed by sequence number.
    /// Bounded by `window_size` entries.
    out_of_order: HashMap<u16, Vec<u8>>,
    /// In-order bytes awaiting the application.
    app_buffer: VecDeque<u8>,
    /// Receive window in segments; also bounds `out_of_order`.
    window_size: usize,
}

impl ReceiveBuffer {
    /// Create a new [`ReceiveBuffer`].
    ///
    /// `expected_seq` is the first in-order sequence number, `peer_isn + 1`
    /// after the handshake.
    pub fn new(expected_seq: u16, window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            expected_seq,
            out_of_order: HashMap::new(),
            app_buffer: VecDeque::new(),
            window_size,
        }
    }

    /// Cumulative ACK number for the next outbound ACK segment.
    pub fn ack_number(&self) -> u16 {
        self.expected_seq
    }

    /// Number of in-order bytes waiting to be read by the application.
    pub fn available(&self) -> usize {
        self.app_buffer.len()
    }

    /// Number of segments parked in the out-of-order buffer.
    pub fn buffered_out_of_order(&self) -> usize {
        self.out_of_order.len()
    }

    /// Process a checksum-verified inbound data segment.
    pub fn on_segment(&mut self, seq: u16, payload: &[u8]) -> Accepted {
        if payload.is_empty() {
            return Accepted::OutOfWindow;
        }

        let offset = seq.wrapping_sub(self.expected_seq);
        if offset == 0 {
            self.deliver(payload.to_vec());
            self.drain_contiguous();
            Accepted::Delivered
        } else if (offset as usize) <= self.window_span() {
            // Ahead of the in-order point but close enough to keep.  Insert
            // is idempotent: a retransmitted copy overwrites its twin.
            if self.out_of_order.len() < self.window_size
                || self.out_of_order.contains_key(&seq)
            {
                self.out_of_order.insert(seq, payload.to_vec());
                Accepted::Buffered
            } else {
                Accepted::OutOfWindow
            }
        } else if offset > u16::MAX / 2 {
            // Behind expected_seq in wrap-around space: stale duplicate.
            Accepted::Duplicate
        } else {
            // Ahead of the window without being a plausible retransmission.
            Accepted::OutOfWindow
        }
    }

    /// Advance `expected_seq` past a received FIN, which consumes one
    /// sequence number without carrying data.  A FIN at any other sequence
    /// number is a retransmission and is ignored.
    pub fn on_fin(&mut self, fin_seq: u16) -> bool {
        if fin_seq == self.expected_seq {
            self.expected_seq = self.expected_seq.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Copy up to `buf.len()` in-order bytes into `buf`.
    ///
    /// Returns the number of bytes copied (possibly fewer than requested,
    /// zero when nothing is buffered).
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.app_buffer.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.app_buffer.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Drain everything in-order into an owned `Vec`.
    pub fn take_available(&mut self) -> Vec<u8> {
        self.app_buffer.drain(..).collect()
    }

    fn deliver(&mut self, payload: Vec<u8>) {
        self.expected_seq = self.expected_seq.wrapping_add(payload.len() as u16);
        self.app_buffer.extend(payload);
    }

    /// Deliver buffered segments that have become contiguous.
    fn drain_contiguous(&mut self) {
        while let Some(payload) = self.out_of_order.remove(&self.expected_seq) {
            self.deliver(payload);
        }
    }

    /// Byte distance from `expected_seq` still considered "within window".
    ///
    /// Capped below half the sequence space so wrap-around comparisons stay
    /// unambiguous.
    fn window_span(&self) -> usize {
        (self.window_size * PAYLOAD_SIZE).min(u16::MAX as usize / 2)
    }
}
