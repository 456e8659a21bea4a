//! Mock implementations for testing and development.
//!
//! These stand in for real links so the manager and the state machines can
//! be exercised without relay boards attached.

pub mod transport;

pub use transport::{MockTransport, MockTransportHandle};
