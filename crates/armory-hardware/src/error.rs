//! Error types for the hardware communication manager.
//!
//! Per-endpoint transport failures are not raised here: they are reported
//! inside the outcome map of a send. The manager itself only fails on
//! addressing and lifecycle problems.

use armory_core::TransportKind;

/// Result type alias for manager operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// No endpoint with this id is registered for the kind.
    #[error("{kind} endpoint not found: {id}")]
    EndpointNotFound { kind: TransportKind, id: String },

    /// No endpoint of any kind has this id.
    #[error("Endpoint not found: {0}")]
    UnknownEndpoint(String),

    /// Two transports were registered under the same id.
    #[error("Duplicate endpoint id: {0}")]
    DuplicateEndpoint(String),

    /// The dispatch loop is gone, so queued commands can no longer run.
    #[error("Command queue closed")]
    QueueClosed,
}

impl HardwareError {
    pub fn not_found(kind: TransportKind, id: impl Into<String>) -> Self {
        Self::EndpointNotFound {
            kind,
            id: id.into(),
        }
    }
}
