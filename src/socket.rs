//! Async UDP socket abstraction.
//!
//! [`UdpTransport`] is a thin wrapper around `tokio::net::UdpSocket` that
//! speaks [`crate::segment::Segment`] instead of raw bytes.  All protocol
//! logic lives elsewhere; this module owns only byte I/O.
//!
//! The [`SegmentTransport`] trait is the seam between the network actor and
//! the wire: production code uses [`UdpTransport`], tests substitute the
//! fault-injecting [`crate::simulator::LossySocket`].

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::segment::{FormatError, Segment, SEGMENT_LEN};

/// Errors that can arise from socket operations.
#[derive(Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    Io(std::io::Error),
    /// A segment could not be encoded for transmission.
    Format(FormatError),
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket I/O error: {e}"),
            Self::Format(e) => write!(f, "segment encode error: {e}"),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FormatError> for SocketError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

/// The datagram interface the connection engine's network actor drives.
///
/// The underlying network is assumed lossy and unordered; implementations
/// deliver raw datagrams without interpreting them.  Decoding and checksum
/// verification stay in the engine so corrupt datagrams can be dropped by
/// protocol policy rather than transport policy.
pub trait SegmentTransport: Send + Sync + 'static {
    /// Encode `segment` and send it as one datagram to `dest`.
    fn send_segment(
        &self,
        segment: &Segment,
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Receive the next raw datagram and its sender address.
    fn recv_datagram(
        &self,
    ) -> impl Future<Output = Result<(Vec<u8>, SocketAddr), SocketError>> + Send;

    /// Address this transport is bound to.
    fn local_addr(&self) -> SocketAddr;
}

// Lets callers keep a handle on a transport (e.g. a fault injector whose
// counters a test inspects) after moving a clone into the connection.
impl<T: SegmentTransport> SegmentTransport for std::sync::Arc<T> {
    async fn send_segment(&self, segment: &Segment, dest: SocketAddr) -> Result<(), SocketError> {
        (**self).send_segment(segment, dest).await
    }

    async fn recv_datagram(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        (**self).recv_datagram().await
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }
}

/// An async, segment-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct UdpTransport {
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

impl SegmentTransport for UdpTransport {
    async fn send_segment(
        &self,
        segment: &Segment,
        dest: SocketAddr,
    ) -> Result<(), SocketError> {
        let bytes = segment.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    async fn recv_datagram(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        // One extra byte so oversized datagrams are detectable (and then
        // rejected by `Segment::decode`) instead of silently truncated.
        let mut buf = vec![0u8; SEGMENT_LEN + 1];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
