//! Hardware communication manager for the armory cabinet controller.
//!
//! This crate sits between the transport links and the state machines. It
//! registers the cabinet and control board links, multiplexes sends across
//! them and paces outbound relay commands through a single FIFO queue.
//!
//! # Sending
//!
//! Two paths reach the boards:
//!
//! - [`HardwareManager::send`] writes immediately and returns one outcome per
//!   addressed endpoint.
//! - [`HardwareManager::enqueue`] appends to the command queue. Entries are
//!   sent one at a time with a minimum gap between them, and the returned
//!   [`CompletionHandle`] resolves once the entry went out.
//!
//! Only addressing errors are raised. A link that is down, slow or closed is
//! reported in the outcome map for that endpoint, so a broadcast never fails
//! as a whole because one board is unreachable.
//!
//! # Events
//!
//! Every transport publishes [`armory_network::TransportEvent`]s. The manager
//! keeps one stream per [`armory_core::TransportKind`], handed out once via
//! [`HardwareManager::subscribe`].
//!
//! # Mock Implementations
//!
//! [`mock::MockTransport`] replaces a real link in tests: it records writes,
//! answers from a scripted queue and injects inbound data on demand.

pub mod error;
pub mod manager;
pub mod mock;
pub mod queue;
pub mod transports;

pub use error::{HardwareError, Result};
pub use manager::{ConnectionSnapshot, HardwareManager, HardwareManagerBuilder, Response, SendOutcome};
pub use queue::CompletionHandle;
pub use transports::AnyTransport;
