//! Fault-injecting transport wrapper for deterministic testing.
//!
//! Real networks drop, duplicate, and reorder datagrams.  To exercise the
//! reliability machinery without depending on actual network conditions,
//! [`LossySocket`] wraps any [`SegmentTransport`] and applies a configurable
//! fault model on the send path:
//!
//! | Fault         | Description                                         |
//! |---------------|-----------------------------------------------------|
//! | Loss          | Drop a datagram with probability `loss_rate`.       |
//! | Duplication   | Send a datagram twice with `duplicate_rate`.        |
//! | Targeted loss | Drop specific data transmissions exactly once, by   |
//! |               | zero-based index (`drop_data_at`).                  |
//!
//! Randomised faults use a seeded [`StdRng`] so failures reproduce; the
//! targeted-loss list makes scripted scenarios ("lose the first data
//! segment, observe one retransmission") fully deterministic.
//!
//! Receive-side faults are unnecessary: dropping a datagram before it is
//! sent is indistinguishable from losing it in flight.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::segment::Segment;
use crate::socket::{SegmentTransport, SocketError};

/// Configuration for the fault-injection model.
///
/// The default is a transparent pass-through.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability in `[0.0, 1.0]` that any datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability in `[0.0, 1.0]` that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Zero-based indices of *data-carrying* transmissions to drop exactly
    /// once each.
    pub drop_data_at: Vec<u64>,
    /// Seed for the fault RNG.
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            drop_data_at: Vec::new(),
            seed: 0,
        }
    }
}

impl FaultConfig {
    /// Drop the `index`-th data-carrying transmission (and nothing else).
    pub fn drop_nth_data(index: u64) -> Self {
        Self {
            drop_data_at: vec![index],
            ..Self::default()
        }
    }
}

/// A fault-injecting wrapper around a [`SegmentTransport`].
pub struct LossySocket<T> {
    inner: T,
    config: FaultConfig,
    rng: Mutex<StdRng>,
    data_tx_count: AtomicU64,
}

impl<T: SegmentTransport> LossySocket<T> {
    /// Wrap `inner`, applying `config`'s fault model to every send.
    pub fn new(inner: T, config: FaultConfig) -> Self {
        let rng = Mutex::new(StdRng::seed_from_u64(config.seed));
        Self {
            inner,
            config,
            rng,
            data_tx_count: AtomicU64::new(0),
        }
    }

    /// Number of data-carrying transmissions attempted so far (including
    /// dropped ones); lets tests observe retransmissions.
    pub fn data_transmissions(&self) -> u64 {
        self.data_tx_count.load(Ordering::SeqCst)
    }

    /// Decide the fate of one outbound segment.
    fn fate(&self, segment: &Segment) -> Fate {
        if !segment.payload.is_empty() {
            let idx = self.data_tx_count.fetch_add(1, Ordering::SeqCst);
            if self.config.drop_data_at.contains(&idx) {
                return Fate::Drop;
            }
        }
        let mut rng = self.rng.lock().expect("fault rng poisoned");
        if self.config.loss_rate > 0.0 && rng.gen_bool(self.config.loss_rate) {
            Fate::Drop
        } else if self.config.duplicate_rate > 0.0 && rng.gen_bool(self.config.duplicate_rate) {
            Fate::Duplicate
        } else {
            Fate::Deliver
        }
    }
}

enum Fate {
    Deliver,
    Drop,
    Duplicate,
}

impl<T: SegmentTransport> SegmentTransport for LossySocket<T> {
    async fn send_segment(&self, segment: &Segment, dest: SocketAddr) -> Result<(), SocketError> {
        match self.fate(segment) {
            Fate::Drop => {
                log::debug!(
                    "[sim] dropping segment seq={} len={}",
                    segment.header.seq,
                    segment.payload.len()
                );
                Ok(())
            }
            Fate::Deliver => self.inner.send_segment(segment, dest).await,
            Fate::Duplicate => {
                log::debug!("[sim] duplicating segment seq={}", segment.header.seq);
                self.inner.send_segment(segment, dest).await?;
                self.inner.send_segment(segment, dest).await
            }
        }
    }

    async fn recv_datagram(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        self.inner.recv_datagram().await
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}
