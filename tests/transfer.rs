//! Integration tests for reliable data transfer and teardown.
//!
//! Each test spins up two in-process endpoints talking over the loopback
//! interface, spawned as separate tokio tasks so both sides make progress
//! concurrently.  Loss scenarios route the client through the fault
//! injector instead of the bare socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use btcp::simulator::{FaultConfig, LossySocket};
use btcp::socket::{SegmentTransport, UdpTransport};
use btcp::{BtcpSocket, Config};

fn config() -> Config {
    Config {
        window: 4,
        timeout: Duration::from_millis(50),
    }
}

async fn ephemeral() -> (UdpTransport, SocketAddr) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let transport = UdpTransport::bind(addr).await.expect("bind failed");
    let local = transport.local_addr();
    (transport, local)
}

/// Read from `conn` until exactly `n` bytes have arrived (or EOF).
async fn recv_exact(conn: &mut BtcpSocket, n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let chunk = conn.recv(n - out.len()).await.expect("recv failed");
        if chunk.is_empty() {
            break;
        }
        out.extend(chunk);
    }
    out
}

/// Property 8: `connect` + `send(b"hello")` against `accept` + `receive(5)`
/// yields exactly `b"hello"` once the handshake completes.
#[tokio::test]
async fn end_to_end_hello() {
    let (server_transport, server_addr) = ephemeral().await;

    let server = tokio::spawn(async move {
        let mut conn = BtcpSocket::accept(server_transport, config())
            .await
            .expect("accept");
        let data = recv_exact(&mut conn, 5).await;
        assert_eq!(data, b"hello");
        while !conn.recv(1024).await.expect("drain").is_empty() {}
        conn.close().await.expect("server close");
    });

    let client = tokio::spawn(async move {
        let (transport, _) = ephemeral().await;
        let conn = BtcpSocket::connect(transport, server_addr, config())
            .await
            .expect("connect");
        assert_eq!(conn.send(b"hello").await.expect("send"), 5);
        conn.close().await.expect("client close");
    });

    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        let (s, c) = tokio::join!(server, client);
        s.unwrap();
        c.unwrap();
    });
    joined.await.expect("test timed out");
}

/// Pipelined transfer: several messages pushed back-to-back through a
/// four-segment window arrive complete and in order.
#[tokio::test]
async fn pipelined_transfer_preserves_order() {
    let (server_transport, server_addr) = ephemeral().await;

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let server = tokio::spawn(async move {
        let mut conn = BtcpSocket::accept(server_transport, config())
            .await
            .expect("accept");
        let data = recv_exact(&mut conn, expected.len()).await;
        assert_eq!(data, expected, "bytes must arrive gap-free and in order");
        while !conn.recv(1024).await.expect("drain").is_empty() {}
        conn.close().await.expect("server close");
    });

    let client = tokio::spawn(async move {
        let (transport, _) = ephemeral().await;
        let conn = BtcpSocket::connect(transport, server_addr, config())
            .await
            .expect("connect");
        // Push in odd-sized chunks so segment boundaries do not line up
        // with message boundaries.
        for chunk in payload.chunks(1701) {
            conn.send(chunk).await.expect("send");
        }
        conn.close().await.expect("client close");
    });

    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        let (s, c) = tokio::join!(server, client);
        s.unwrap();
        c.unwrap();
    });
    joined.await.expect("test timed out");
}

/// Both directions at once: request/response over the same connection.
#[tokio::test]
async fn bidirectional_ping_pong() {
    let (server_transport, server_addr) = ephemeral().await;

    let server = tokio::spawn(async move {
        let mut conn = BtcpSocket::accept(server_transport, config())
            .await
            .expect("accept");
        let ping = recv_exact(&mut conn, 5).await;
        assert_eq!(ping, b"Ping!");
        conn.send(b"Pong!").await.expect("server send");
        while !conn.recv(1024).await.expect("drain").is_empty() {}
        conn.close().await.expect("server close");
    });

    let client = tokio::spawn(async move {
        let (transport, _) = ephemeral().await;
        let mut conn = BtcpSocket::connect(transport, server_addr, config())
            .await
            .expect("connect");
        conn.send(b"Ping!").await.expect("client send");
        let pong = recv_exact(&mut conn, 5).await;
        assert_eq!(pong, b"Pong!");
        conn.close().await.expect("client close");
    });

    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        let (s, c) = tokio::join!(server, client);
        s.unwrap();
        c.unwrap();
    });
    joined.await.expect("test timed out");
}

/// Graceful teardown: after the client closes, the server's `recv` returns
/// empty (end of stream) rather than blocking or erroring.
#[tokio::test]
async fn close_delivers_eof() {
    let (server_transport, server_addr) = ephemeral().await;

    let server = tokio::spawn(async move {
        let mut conn = BtcpSocket::accept(server_transport, config())
            .await
            .expect("accept");
        let data = recv_exact(&mut conn, 4).await;
        assert_eq!(data, b"bye!");
        let eof = conn.recv(1024).await.expect("recv after close");
        assert!(eof.is_empty(), "recv must signal EOF with an empty buffer");
        conn.close().await.expect("server close");
    });

    let client = tokio::spawn(async move {
        let (transport, _) = ephemeral().await;
        let conn = BtcpSocket::connect(transport, server_addr, config())
            .await
            .expect("connect");
        conn.send(b"bye!").await.expect("send");
        conn.close().await.expect("client close");
    });

    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        let (s, c) = tokio::join!(server, client);
        s.unwrap();
        c.unwrap();
    });
    joined.await.expect("test timed out");
}

/// `close()` must complete even when the application never read a byte:
/// the network actor keeps servicing ACKs, retransmissions, and teardown
/// no matter how much delivered data is still queued for the application.
#[tokio::test]
async fn close_succeeds_with_undrained_inbound_data() {
    let (server_transport, server_addr) = ephemeral().await;

    let server = tokio::spawn(async move {
        let conn = BtcpSocket::accept(server_transport, config())
            .await
            .expect("accept");
        // Never recv; let far more data pile up than the delivery channel
        // can hold, then close with it all undrained.
        tokio::time::sleep(Duration::from_secs(3)).await;
        conn.close().await.expect("server close");
    });

    let client = tokio::spawn(async move {
        let (transport, _) = ephemeral().await;
        let conn = BtcpSocket::connect(transport, server_addr, config())
            .await
            .expect("connect");
        let payload = vec![0x5Au8; 40_000];
        for chunk in payload.chunks(1000) {
            conn.send(chunk).await.expect("send");
        }
        conn.close().await.expect("client close");
    });

    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        let (s, c) = tokio::join!(server, client);
        s.unwrap();
        c.unwrap();
    });
    joined.await.expect("test timed out");
}

/// Property 9: with the first data segment dropped once, the sender
/// retransmits after the timeout and the receiver still gets identical
/// bytes — with exactly one retransmission observed.
#[tokio::test]
async fn lost_data_segment_is_retransmitted() {
    let (server_transport, server_addr) = ephemeral().await;

    let server = tokio::spawn(async move {
        let mut conn = BtcpSocket::accept(server_transport, config())
            .await
            .expect("accept");
        let data = recv_exact(&mut conn, 5).await;
        assert_eq!(data, b"hello");
        while !conn.recv(1024).await.expect("drain").is_empty() {}
        conn.close().await.expect("server close");
    });

    let (transport, _) = ephemeral().await;
    let lossy = Arc::new(LossySocket::new(transport, FaultConfig::drop_nth_data(0)));

    let conn = BtcpSocket::connect(Arc::clone(&lossy), server_addr, config())
        .await
        .expect("connect");
    conn.send(b"hello").await.expect("send");
    tokio::time::timeout(Duration::from_secs(10), conn.close())
        .await
        .expect("close timed out")
        .expect("client close");

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server timed out")
        .expect("server task panicked");

    assert_eq!(
        lossy.data_transmissions(),
        2,
        "one original (dropped) transmission plus exactly one retransmission"
    );
}
