//! Relay output control commands.
//!
//! The boards accept an "A1 short frame" that carries an enable mask
//! (outputs the command touches) and a set mask (the new level of those
//! outputs):
//!
//! ```text
//! CC DD A1 01 00 <set> 00 <enable> <cs> <cs2>
//! ```
//!
//! `cs` is the low byte of `A1 + 01 + 00 + set + 00 + enable`, and `cs2` is
//! `cs + cs` truncated to a byte.
//!
//! # Example
//!
//! ```
//! use armory_core::RelayChannel;
//! use armory_protocol::RelayCommand;
//!
//! let channel = RelayChannel::new(1).unwrap();
//! let bytes = RelayCommand::close(channel).encode();
//! assert_eq!(bytes.as_ref(), &[0xCC, 0xDD, 0xA1, 0x01, 0x00, 0x01, 0x00, 0x01, 0xA4, 0x48]);
//! ```

use armory_core::RelayChannel;
use armory_core::constants::*;
use bytes::Bytes;
use std::fmt;

/// Outputs addressed by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelaySelector {
    Channel(RelayChannel),
    All,
}

impl RelaySelector {
    #[must_use]
    pub fn mask(&self) -> u8 {
        match self {
            Self::Channel(channel) => channel.mask(),
            Self::All => ALL_RELAYS_MASK,
        }
    }
}

impl From<RelayChannel> for RelaySelector {
    fn from(channel: RelayChannel) -> Self {
        Self::Channel(channel)
    }
}

impl fmt::Display for RelaySelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Channel(channel) => write!(f, "relay {channel}"),
            Self::All => f.write_str("all relays"),
        }
    }
}

/// Desired output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayAction {
    /// Energize the relay (contact closed).
    Close,
    /// Release the relay (contact open).
    Open,
}

impl fmt::Display for RelayAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Close => f.write_str("close"),
            Self::Open => f.write_str("open"),
        }
    }
}

/// A relay control command ready to be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayCommand {
    pub action: RelayAction,
    pub selector: RelaySelector,
}

impl RelayCommand {
    #[must_use]
    pub fn new(action: RelayAction, selector: impl Into<RelaySelector>) -> Self {
        Self {
            action,
            selector: selector.into(),
        }
    }

    #[must_use]
    pub fn close(selector: impl Into<RelaySelector>) -> Self {
        Self::new(RelayAction::Close, selector)
    }

    #[must_use]
    pub fn open(selector: impl Into<RelaySelector>) -> Self {
        Self::new(RelayAction::Open, selector)
    }

    /// Command switching every output off. Sent at startup.
    #[must_use]
    pub fn open_all() -> Self {
        Self::open(RelaySelector::All)
    }

    /// Encode into the 10-byte wire frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let enable = self.selector.mask();
        let set = match self.action {
            RelayAction::Close => enable,
            RelayAction::Open => 0x00,
        };
        let (set_high, enable_high) = (0x00u8, 0x00u8);

        let checksum = [
            COMMAND_FUNCTION_RELAY,
            COMMAND_BOARD_ADDRESS,
            set_high,
            set,
            enable_high,
            enable,
        ]
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte));

        let frame: [u8; RELAY_COMMAND_LEN] = [
            COMMAND_MARKER_0,
            COMMAND_MARKER_1,
            COMMAND_FUNCTION_RELAY,
            COMMAND_BOARD_ADDRESS,
            set_high,
            set,
            enable_high,
            enable,
            checksum,
            checksum.wrapping_add(checksum),
        ];
        Bytes::copy_from_slice(&frame)
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.action, self.selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn channel(n: u8) -> RelayChannel {
        RelayChannel::new(n).unwrap()
    }

    #[rstest]
    #[case(RelayCommand::close(channel(1)), [0xCC, 0xDD, 0xA1, 0x01, 0x00, 0x01, 0x00, 0x01, 0xA4, 0x48])]
    #[case(RelayCommand::open(channel(1)), [0xCC, 0xDD, 0xA1, 0x01, 0x00, 0x00, 0x00, 0x01, 0xA3, 0x46])]
    #[case(RelayCommand::close(channel(8)), [0xCC, 0xDD, 0xA1, 0x01, 0x00, 0x80, 0x00, 0x80, 0xA2, 0x44])]
    #[case(RelayCommand::open_all(), [0xCC, 0xDD, 0xA1, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xA1, 0x42])]
    #[case(RelayCommand::close(RelaySelector::All), [0xCC, 0xDD, 0xA1, 0x01, 0x00, 0xFF, 0x00, 0xFF, 0xA0, 0x40])]
    fn test_encode(#[case] command: RelayCommand, #[case] expected: [u8; 10]) {
        assert_eq!(command.encode().as_ref(), &expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(RelayCommand::close(channel(3)).to_string(), "close relay 3");
        assert_eq!(RelayCommand::open_all().to_string(), "open all relays");
    }
}
