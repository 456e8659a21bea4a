//! Active report frames.
//!
//! A relay board pushes one frame every time an input changes:
//!
//! ```text
//! offset  0    1    2    3     4      5      6       7        8
//!         EE   FF   C0   addr  relay  input  rising  falling  trailer
//! ```
//!
//! Each mask byte is little-bit-order: bit N describes local channel N.
//! Anything that is not exactly nine bytes with the `EE FF C0` prefix is
//! rejected without raising; the caller drops it and moves on.
//!
//! # Example
//!
//! ```
//! use armory_protocol::report::{RelayStatusReport, encode_active_report};
//!
//! let frame = encode_active_report(0x01, 0x00, 0b0000_1001, 0b0000_1000, 0x00);
//! let report = RelayStatusReport::parse(&frame).unwrap();
//!
//! assert!(report.channels[0]);
//! assert!(report.channels[3]);
//! assert_eq!(report.raw_hex, "EE FF C0 01 00 09 08 00 00");
//! ```

use armory_core::constants::*;
use serde::Serialize;

use crate::{ProtocolError, Result};

/// Decoded active report of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatusReport {
    /// Uppercase, space separated hex dump of the frame.
    pub raw_hex: String,
    pub address: u8,
    /// Current relay output mask.
    pub relay_mask: u8,
    /// Current input mask.
    pub input_mask: u8,
    /// Inputs that went high since the board's previous report.
    pub rising_mask: u8,
    /// Inputs that went low since the board's previous report.
    pub falling_mask: u8,
    /// `input_mask` expanded to one flag per local channel.
    pub channels: [bool; CHANNELS_PER_ENDPOINT],
}

impl RelayStatusReport {
    /// Parse a frame, returning `None` when it is not a valid active report.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        Self::try_from(data).ok()
    }

    /// Input level of a local channel (0-7).
    #[must_use]
    pub fn channel(&self, local: usize) -> bool {
        self.channels.get(local).copied().unwrap_or(false)
    }
}

impl TryFrom<&[u8]> for RelayStatusReport {
    type Error = ProtocolError;

    fn try_from(data: &[u8]) -> Result<Self> {
        if data.len() != ACTIVE_REPORT_LEN {
            return Err(ProtocolError::InvalidReport(format!(
                "expected {ACTIVE_REPORT_LEN} bytes, got {}",
                data.len()
            )));
        }
        if data[0] != REPORT_MARKER_0 || data[1] != REPORT_MARKER_1 {
            return Err(ProtocolError::InvalidReport(format!(
                "header mismatch: {:02X} {:02X}",
                data[0], data[1]
            )));
        }
        if data[2] != REPORT_FRAME_TYPE {
            return Err(ProtocolError::InvalidReport(format!(
                "unexpected frame type {:02X}",
                data[2]
            )));
        }

        let input_mask = data[REPORT_INPUT_OFFSET];
        Ok(Self {
            raw_hex: format_hex(data),
            address: data[REPORT_ADDRESS_OFFSET],
            relay_mask: data[REPORT_RELAY_OFFSET],
            input_mask,
            rising_mask: data[REPORT_RISING_OFFSET],
            falling_mask: data[REPORT_FALLING_OFFSET],
            channels: expand_mask(input_mask),
        })
    }
}

/// Check the length and the marker/type bytes of a frame.
#[must_use]
pub fn is_active_report_frame(data: &[u8]) -> bool {
    data.len() == ACTIVE_REPORT_LEN
        && data[0] == REPORT_MARKER_0
        && data[1] == REPORT_MARKER_1
        && data[2] == REPORT_FRAME_TYPE
}

/// Build an active report frame. Used by simulators and tests.
#[must_use]
pub fn encode_active_report(
    address: u8,
    relay_mask: u8,
    input_mask: u8,
    rising_mask: u8,
    falling_mask: u8,
) -> [u8; ACTIVE_REPORT_LEN] {
    [
        REPORT_MARKER_0,
        REPORT_MARKER_1,
        REPORT_FRAME_TYPE,
        address,
        relay_mask,
        input_mask,
        rising_mask,
        falling_mask,
        0x00,
    ]
}

fn expand_mask(mask: u8) -> [bool; CHANNELS_PER_ENDPOINT] {
    std::array::from_fn(|bit| (mask >> bit) & 0x01 == 1)
}

/// Uppercase hex dump with single spaces, e.g. `EE FF C0`.
pub(crate) fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
