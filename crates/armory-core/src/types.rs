use crate::{
    Result,
    constants::{CHANNELS_PER_ENDPOINT, COMBINED_CHANNELS, MAX_RELAY_CHANNEL},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical link used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Stream-oriented network link.
    Tcp,
    /// Serial line.
    Serial,
}

impl TransportKind {
    pub const ALL: [TransportKind; 2] = [TransportKind::Tcp, TransportKind::Serial];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Serial => "serial",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link state of a transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One of the two relay boards the controller talks to.
///
/// The cabinet board owns combined channels 0-7 and the control panel board
/// owns 8-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Cabinet,
    Control,
}

impl Endpoint {
    pub const ALL: [Endpoint; 2] = [Endpoint::Cabinet, Endpoint::Control];

    /// Registry id used by the hardware manager.
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Cabinet => "cabinet",
            Self::Control => "control",
        }
    }

    /// Look up an endpoint by its registry id.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "cabinet" => Some(Self::Cabinet),
            "control" => Some(Self::Control),
            _ => None,
        }
    }

    /// First combined channel owned by this endpoint.
    #[must_use]
    pub fn channel_offset(&self) -> usize {
        match self {
            Self::Cabinet => 0,
            Self::Control => CHANNELS_PER_ENDPOINT,
        }
    }

    /// Whether a combined channel index belongs to this endpoint's half.
    #[must_use]
    pub fn owns(&self, index: ChannelIndex) -> bool {
        let start = self.channel_offset();
        (start..start + CHANNELS_PER_ENDPOINT).contains(&index.as_usize())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::from_id(s).ok_or_else(|| Error::UnknownEndpoint(s.to_string()))
    }
}

/// Index into the 16-slot combined input view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    /// Create a combined channel index.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannelIndex` unless `index < 16`.
    pub fn new(index: u8) -> Result<Self> {
        if usize::from(index) >= COMBINED_CHANNELS {
            return Err(Error::InvalidChannelIndex {
                index,
                max: COMBINED_CHANNELS as u8,
            });
        }
        Ok(ChannelIndex(index))
    }

    pub(crate) const fn new_unchecked(index: u8) -> Self {
        ChannelIndex(index)
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn as_usize(&self) -> usize {
        usize::from(self.0)
    }

    /// Board that reports this channel.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        if self.as_usize() < CHANNELS_PER_ENDPOINT {
            Endpoint::Cabinet
        } else {
            Endpoint::Control
        }
    }

    /// Channel number on the owning board (0-7).
    #[must_use]
    pub fn local(&self) -> usize {
        self.as_usize() % CHANNELS_PER_ENDPOINT
    }
}

impl TryFrom<u8> for ChannelIndex {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        ChannelIndex::new(value)
    }
}

impl From<ChannelIndex> for u8 {
    fn from(index: ChannelIndex) -> u8 {
        index.0
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relay output number on a single board (1-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RelayChannel(u8);

impl RelayChannel {
    /// Create a relay output number.
    ///
    /// # Errors
    /// Returns `Error::InvalidRelayChannel` for values outside 1-8.
    pub fn new(channel: u8) -> Result<Self> {
        if !(1..=MAX_RELAY_CHANNEL).contains(&channel) {
            return Err(Error::InvalidRelayChannel(channel));
        }
        Ok(RelayChannel(channel))
    }

    pub(crate) const fn new_unchecked(channel: u8) -> Self {
        RelayChannel(channel)
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Output bit used in the command enable/set masks.
    #[must_use]
    pub fn mask(&self) -> u8 {
        1 << (self.0 - 1)
    }
}

impl TryFrom<u8> for RelayChannel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        RelayChannel::new(value)
    }
}

impl From<RelayChannel> for u8 {
    fn from(channel: RelayChannel) -> u8 {
        channel.0
    }
}

impl fmt::Display for RelayChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
