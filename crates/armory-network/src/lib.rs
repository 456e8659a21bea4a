//! Persistent transport links to the relay boards.
//!
//! A [`TransportClient`] owns one TCP or serial link and keeps it alive:
//! it reconnects after every failure, optionally heartbeats the peer and
//! optionally frames messages with a 4-byte length prefix. Inbound payloads
//! and connection status changes are published as [`TransportEvent`]s on a
//! channel handed over at construction.
//!
//! # Architecture
//!
//! ```text
//! TransportClient ──connect()──> supervisor task
//!                                   │  open link (TCP / serial)
//!                                   │  session loop ── read ──> decode ──> waiter | TransportEvent::Data
//!                                   │               ── write <── send() / send_no_wait()
//!                                   │               ── heartbeat tick / ack deadline
//!                                   └─ on close: status event, fixed delay, retry
//! ```

pub mod client;
pub mod error;
mod link;
pub mod transport;

pub use client::TransportClient;
pub use error::{Result, TransportError};
pub use transport::{Transport, TransportEvent, TransportStats};
