//! Shared building blocks for the armory cabinet controller.
//!
//! This crate holds everything the other workspace crates agree on: the
//! error taxonomy, wire and timing constants, endpoint and channel types, and
//! the controller configuration that is loaded once at startup.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
