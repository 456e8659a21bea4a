use armory_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur on a transport link.
///
/// None of these are fatal: the client recovers by reconnecting, and callers
/// see them only as the outcome of their own request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is not open
    #[error("Not connected")]
    NotConnected,

    /// Opening the link took too long
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Opening the link failed
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// No response arrived for a request
    #[error("Message timeout after {0}ms")]
    ResponseTimeout(u64),

    /// The link was closed while the request was pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// No heartbeat acknowledgment arrived in time
    #[error("Heartbeat timeout after {0}ms")]
    HeartbeatTimeout(u64),

    /// Writing to the link failed or timed out
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Framing error on the inbound stream
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
