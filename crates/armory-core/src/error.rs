use thiserror::Error;

/// Errors raised while building or validating controller configuration.
///
/// Every variant is a startup failure. Runtime problems (lost links, malformed
/// frames) are handled by the crates that own them and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid channel index {index}: must be below {max}")]
    InvalidChannelIndex { index: u8, max: u8 },

    #[error("Invalid relay channel {0}: must be 1-8")]
    InvalidRelayChannel(u8),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Duplicate endpoint id: {0}")]
    DuplicateEndpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error for a value outside its allowed range.
    pub fn out_of_range(field: &str, value: u64, min: u64, max: u64) -> Self {
        Self::Config(format!("{field} must be {min}-{max}, got {value}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
