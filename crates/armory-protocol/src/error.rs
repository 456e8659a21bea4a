use thiserror::Error;

/// Errors produced while decoding board traffic.
///
/// A rejected active report is never fatal: callers log it and drop the
/// frame. Framing errors end the current connection so the transport can
/// resynchronize by reconnecting.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid active report: {0}")]
    InvalidReport(String),

    #[error("Frame too large: {size} bytes exceeds maximum of {max_size} bytes")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
