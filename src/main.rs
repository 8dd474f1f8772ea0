//! Entry point for the `btcp` demo binary.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing).
//!
//! The demo exchanges one message each way: the client sends a line of
//! text, the server echoes it back upper-cased.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use btcp::socket::UdpTransport;
use btcp::{BtcpSocket, Config};

/// TCP-like reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Sliding-window size in segments.
    #[arg(short, long, default_value_t = 4)]
    window: u8,

    /// Retransmission timeout in milliseconds.
    #[arg(short, long, default_value_t = 100)]
    timeout_ms: u64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a server, echoing received data upper-cased.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Run as a client, sending a message to a remote server.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Message to send.
        #[arg(short, long, default_value = "hello over btcp")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = Config {
        window: cli.window,
        timeout: Duration::from_millis(cli.timeout_ms),
    };

    match cli.mode {
        Mode::Server { bind } => {
            log::info!("listening on {bind}");
            let transport = UdpTransport::bind(bind).await?;
            let mut conn = BtcpSocket::accept(transport, config).await?;
            log::info!("connection established");

            loop {
                let data = conn.recv(4096).await?;
                if data.is_empty() {
                    log::info!("peer closed the connection");
                    break;
                }
                log::info!("received {} byte(s)", data.len());
                let reply = data.to_ascii_uppercase();
                conn.send(&reply).await?;
            }
            conn.close().await?;
        }
        Mode::Client { server, message } => {
            let transport = UdpTransport::bind("0.0.0.0:0".parse()?).await?;
            let mut conn = BtcpSocket::connect(transport, server, config).await?;
            log::info!("connected to {server}");

            conn.send(message.as_bytes()).await?;
            let reply = conn.recv(4096).await?;
            println!("{}", String::from_utf8_lossy(&reply));
            conn.close().await?;
        }
    }
    Ok(())
}
