//! Go-Back-N send-side sliding window.
//!
//! [`WindowSender`] maintains up to `window_size` in-flight segments and the
//! sequence-number bookkeeping around them.
//!
//! # Protocol contract
//!
//! - At most `window_size` segments may be unacknowledged at once; callers
//!   check [`WindowSender::can_send`] and hold back data while it is false.
//! - ACKs are **cumulative**: `ack = A` means the peer has accepted all
//!   bytes up to (but not including) sequence number `A`.
//! - An ACK at or behind `send_base` is a duplicate and is ignored; a
//!   duplicate ACK never triggers retransmission by itself (no
//!   fast-retransmit).
//! - On timeout the caller retransmits **all** unacked segments from
//!   `send_base` onwards, oldest first.
//! - Sequence numbers are u16 and wrap; comparisons use the convention that
//!   two values are "close" when their distance is under `u16::MAX / 2`,
//!   which always holds for a sane window.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::segment::Segment;

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub(crate) fn seq_le(a: u16, b: u16) -> bool {
    b.wrapping_sub(a) <= u16::MAX / 2
}

/// A single in-flight segment occupying one window slot.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// The segment as originally sent (retransmitted unchanged).
    pub segment: Segment,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
}

impl InFlight {
    /// First sequence number after this segment's payload.
    fn seq_end(&self) -> u16 {
        self.segment
            .header
            .seq
            .wrapping_add(self.segment.payload.len() as u16)
    }
}

/// Go-Back-N send-side state for one connection.
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ ◀── in flight ──▶│ ◀── sendable ──▶
/// ```
#[derive(Debug)]
pub struct WindowSender {
    /// Sequence number of the **oldest** unacked byte (left window edge).
    send_base: u16,
    /// Sequence number for the **next** new segment.
    next_seq: u16,
    /// Maximum number of in-flight segments (N).
    window_size: usize,
    /// In-flight segments ordered by sequence number (front = oldest).
    unacked: VecDeque<InFlight>,
}

impl WindowSender {
    /// Create a new [`WindowSender`].
    ///
    /// `seq_start` is the first data sequence number (`ISN + 1` after the
    /// handshake, the SYN having consumed one number).  `window_size` is the
    /// Go-Back-N window N (≥ 1).
    pub fn new(seq_start: u16, window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            send_base: seq_start,
            next_seq: seq_start,
            window_size,
            unacked: VecDeque::with_capacity(window_size),
        }
    }

    /// Left edge of the window: oldest unacknowledged sequence number.
    pub fn send_base(&self) -> u16 {
        self.send_base
    }

    /// Sequence number the next new segment will carry.
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// `true` when there is room for at least one more in-flight segment.
    pub fn can_send(&self) -> bool {
        self.unacked.len() < self.window_size
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    /// `true` when at least one segment is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    /// Place a just-transmitted segment into the window and advance
    /// `next_seq` by its payload length.
    ///
    /// The segment must carry `seq == next_seq`.  Panics in debug builds if
    /// the window is already full; check [`WindowSender::can_send`] first.
    pub fn record_sent(&mut self, segment: Segment) {
        debug_assert!(
            self.can_send(),
            "record_sent on a full window ({}/{})",
            self.unacked.len(),
            self.window_size
        );
        debug_assert_eq!(segment.header.seq, self.next_seq);
        let advance = segment.payload.len() as u16;
        self.unacked.push_back(InFlight {
            segment,
            tx_count: 1,
        });
        self.next_seq = self.next_seq.wrapping_add(advance);
    }

    /// Process a cumulative ACK.
    ///
    /// Removes every window entry whose payload ends at or before `ack`,
    /// advances `send_base`, and returns the number of newly acknowledged
    /// segments.  Returns `0` for a duplicate (`ack ≤ send_base`) or
    /// out-of-range (`ack > next_seq`) acknowledgement; neither is an error
    /// and neither changes any state.
    pub fn on_ack(&mut self, ack: u16) -> usize {
        if !seq_le(self.send_base, ack) || !seq_le(ack, self.next_seq) {
            return 0;
        }
        if ack == self.send_base {
            return 0;
        }

        let mut acked = 0usize;
        while let Some(front) = self.unacked.front() {
            let seg_end = front.seq_end();
            if seq_le(seg_end, ack) {
                self.send_base = seg_end;
                self.unacked.pop_front();
                acked += 1;
            } else {
                break;
            }
        }
        acked
    }

    /// Iterate over all in-flight segments, oldest first.
    ///
    /// The caller resends each of these on timeout (the "go back N" step)
    /// and then calls [`WindowSender::on_retransmit`].
    pub fn unacked_segments(&self) -> impl Iterator<Item = &Segment> {
        self.unacked.iter().map(|e| &e.segment)
    }

    /// Bump the transmission count on every in-flight segment.
    ///
    /// Call immediately after retransmitting the whole window.
    pub fn on_retransmit(&mut self) {
        for entry in self.unacked.iter_mut() {
            entry.tx_count += 1;
        }
    }

    /// Transmission count of the oldest in-flight segment (0 when idle).
    ///
    /// Used by the engine to bound retransmission attempts.
    pub fn oldest_tx_count(&self) -> u32 {
        self.unacked.front().map_or(0, |e| e.tx_count)
    }
}
