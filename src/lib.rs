//! `btcp` — a TCP-like reliable, ordered byte stream over lossy UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────┐  send/recv/close   ┌────────────────┐
//!  │  Application  │◀──── channels ────▶│  network task  │
//!  │ (BtcpSocket)  │                    │ (sole mutator) │
//!  └───────────────┘                    └───────┬────────┘
//!                                               │
//!                                   ┌───────────▼────────────┐
//!                                   │    ConnectionEngine    │
//!                                   │  state machine + timer │
//!                                   │  window + reassembly   │
//!                                   └───────────┬────────────┘
//!                                               │ segments
//!                                   ┌───────────▼────────────┐
//!                                   │    SegmentTransport    │
//!                                   │ (UDP, or lossy wrapper)│
//!                                   └────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]    — wire format: header layout, checksum, padding
//! - [`state`]      — finite-state-machine types and the signal enum
//! - [`timer`]      — single per-connection retransmission deadline
//! - [`window`]     — Go-Back-N outbound sliding window
//! - [`reassembly`] — inbound ordering, deduplication, cumulative ACKs
//! - [`engine`]     — per-connection protocol engine (pure, tick-driven)
//! - [`connection`] — async application API and the network actor
//! - [`socket`]     — async UDP transport
//! - [`simulator`]  — fault-injecting transport for testing

pub mod connection;
pub mod engine;
pub mod reassembly;
pub mod segment;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;

pub use connection::{BtcpSocket, ConnError};
pub use engine::Config;
pub use state::BtcpState;
