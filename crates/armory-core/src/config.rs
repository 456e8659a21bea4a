//! Controller configuration.
//!
//! Configuration is read once at startup, validated, and then handed to the
//! transport clients and state machines as immutable values. Every section
//! falls back to its defaults, so a file only needs the keys it overrides:
//!
//! ```json
//! {
//!   "cabinet": { "host": "192.168.1.101", "port": 50000 },
//!   "control": { "path": "/dev/ttyUSB0", "baud_rate": 9600 },
//!   "timing": { "door_open_timeout_s": 45 }
//! }
//! ```
//!
//! Invalid values are rejected by [`ControllerConfig::validate`], which runs
//! as part of [`ControllerConfig::from_json_file`].

use crate::{
    ChannelIndex, Endpoint, RelayChannel, Result,
    constants::*,
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Cabinet relay board, reached over TCP.
    pub cabinet: TcpEndpointConfig,
    /// Control panel relay board, reached over a serial line.
    pub control: SerialEndpointConfig,
    /// Reconnect, response and heartbeat settings shared by both links.
    pub transport: TransportConfig,
    /// Minimum gap between queued hardware commands.
    pub queue_interval_ms: QueueInterval,
    pub channels: ChannelMap,
    pub relays: RelayLayout,
    pub timing: TimingConfig,
    pub monitor: MonitorConfig,
}

impl ControllerConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, `Error::Json` if it is
    /// not valid JSON for this schema, or a validation error.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a configuration document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: ControllerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.cabinet.host.trim().is_empty() {
            return Err(Error::Config("cabinet.host must not be empty".into()));
        }
        if self.cabinet.port == 0 {
            return Err(Error::Config("cabinet.port must not be 0".into()));
        }
        if self.control.path.trim().is_empty() {
            return Err(Error::Config("control.path must not be empty".into()));
        }
        if self.control.baud_rate == 0 {
            return Err(Error::Config("control.baud_rate must be positive".into()));
        }
        check_range("control.data_bits", self.control.data_bits.into(), 5, 8)?;
        check_range("control.stop_bits", self.control.stop_bits.into(), 1, 2)?;

        self.transport.validate()?;
        self.channels.validate()?;
        self.timing.validate()?;
        self.monitor.validate()
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if !(min..=max).contains(&value) {
        return Err(Error::out_of_range(field, value, min, max));
    }
    Ok(())
}

/// Millisecond gap enforced between queued commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueInterval(pub u64);

impl Default for QueueInterval {
    fn default() -> Self {
        Self(DEFAULT_QUEUE_INTERVAL_MS)
    }
}

impl QueueInterval {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

/// Network link to the cabinet board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpEndpointConfig {
    pub host: String,
    pub port: u16,
    /// Wrap every message in a 4-byte length prefix.
    pub framing: bool,
    pub connect_timeout_ms: u64,
}

impl Default for TcpEndpointConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.101".to_string(),
            port: 50000,
            framing: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl TcpEndpointConfig {
    /// `host:port` string accepted by `TcpStream::connect`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Parity setting of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial link to the control panel board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialEndpointConfig {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub framing: bool,
}

impl Default for SerialEndpointConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            framing: false,
        }
    }
}

/// Heartbeat policy of a transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Relay boards do not answer heartbeats, so this is off unless a link
    /// goes through a gateway that does.
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Close the link on a missed acknowledgment instead of only warning.
    pub strict: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            strict: true,
        }
    }
}

impl HeartbeatConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings shared by every transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub response_timeout_ms: u64,
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
    pub heartbeat: HeartbeatConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            reconnect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        check_range("transport.response_timeout_ms", self.response_timeout_ms, 1000, 60_000)?;
        if self.reconnect_delay_ms == 0 {
            return Err(Error::Config("transport.reconnect_delay_ms must be positive".into()));
        }
        if self.heartbeat.enabled {
            if self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms == 0 {
                return Err(Error::Config("heartbeat interval and timeout must be positive".into()));
            }
            if self.heartbeat.timeout_ms >= self.heartbeat.interval_ms {
                return Err(Error::Config(
                    "heartbeat timeout must be shorter than its interval".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Combined input channel assigned to each switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub apply: ChannelIndex,
    pub cabinet_door: ChannelIndex,
    pub door_lock: ChannelIndex,
    pub key: ChannelIndex,
    pub vibration: ChannelIndex,
    pub alarm_cancel: ChannelIndex,
    pub auth_cancel: ChannelIndex,
    pub auth_pass: ChannelIndex,
    /// Sensors wired normally-open report the inverse of the usual level.
    pub invert_sensor_state: bool,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            apply: ChannelIndex::new_unchecked(0),
            cabinet_door: ChannelIndex::new_unchecked(1),
            door_lock: ChannelIndex::new_unchecked(2),
            key: ChannelIndex::new_unchecked(3),
            vibration: ChannelIndex::new_unchecked(4),
            alarm_cancel: ChannelIndex::new_unchecked(10),
            auth_cancel: ChannelIndex::new_unchecked(11),
            auth_pass: ChannelIndex::new_unchecked(12),
            invert_sensor_state: false,
        }
    }
}

impl ChannelMap {
    /// Every configured switch with its name.
    #[must_use]
    pub fn named(&self) -> [(&'static str, ChannelIndex); 8] {
        [
            ("apply", self.apply),
            ("cabinet_door", self.cabinet_door),
            ("door_lock", self.door_lock),
            ("key", self.key),
            ("vibration", self.vibration),
            ("alarm_cancel", self.alarm_cancel),
            ("auth_cancel", self.auth_cancel),
            ("auth_pass", self.auth_pass),
        ]
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (name, index) in self.named() {
            if !seen.insert(index) {
                return Err(Error::Config(format!(
                    "channels.{name} reuses input channel {index}"
                )));
            }
        }
        Ok(())
    }
}

/// A relay output on a specific board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayTarget {
    pub endpoint: Endpoint,
    pub channel: RelayChannel,
}

impl RelayTarget {
    #[must_use]
    pub const fn new(endpoint: Endpoint, channel: RelayChannel) -> Self {
        Self { endpoint, channel }
    }

    const fn preset(endpoint: Endpoint, channel: u8) -> Self {
        Self::new(endpoint, RelayChannel::new_unchecked(channel))
    }
}

/// Relay outputs driven by the workflow and alarm machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayLayout {
    /// Electric door lock; closing the relay unlocks the door.
    pub door_lock: RelayTarget,
    /// Indicator lit while the mechanical lock is turned open.
    pub lock_indicator: RelayTarget,
    pub cabinet_alarm: RelayTarget,
    pub control_alarm: RelayTarget,
    /// Lamp showing a pending ammunition request.
    pub apply_light: RelayTarget,
}

impl Default for RelayLayout {
    fn default() -> Self {
        Self {
            door_lock: RelayTarget::preset(Endpoint::Cabinet, 2),
            lock_indicator: RelayTarget::preset(Endpoint::Control, 3),
            cabinet_alarm: RelayTarget::preset(Endpoint::Cabinet, 8),
            control_alarm: RelayTarget::preset(Endpoint::Control, 1),
            apply_light: RelayTarget::preset(Endpoint::Control, 2),
        }
    }
}

/// Workflow timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub door_open_timeout_s: u64,
    pub vibration_throttle_ms: u64,
    pub auth_retry_interval_s: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            door_open_timeout_s: DEFAULT_DOOR_OPEN_TIMEOUT_S,
            vibration_throttle_ms: DEFAULT_VIBRATION_THROTTLE_MS,
            auth_retry_interval_s: DEFAULT_AUTH_RETRY_INTERVAL_S,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn door_open_timeout(&self) -> Duration {
        Duration::from_secs(self.door_open_timeout_s)
    }

    #[must_use]
    pub fn vibration_throttle(&self) -> Duration {
        Duration::from_millis(self.vibration_throttle_ms)
    }

    #[must_use]
    pub fn auth_retry_interval(&self) -> Duration {
        Duration::from_secs(self.auth_retry_interval_s)
    }

    fn validate(&self) -> Result<()> {
        if self.door_open_timeout_s == 0 {
            return Err(Error::Config("timing.door_open_timeout_s must be at least 1".into()));
        }
        check_range(
            "timing.vibration_throttle_ms",
            self.vibration_throttle_ms,
            MIN_VIBRATION_THROTTLE_MS,
            MAX_VIBRATION_THROTTLE_MS,
        )?;
        check_range(
            "timing.auth_retry_interval_s",
            self.auth_retry_interval_s,
            MIN_AUTH_RETRY_INTERVAL_S,
            MAX_AUTH_RETRY_INTERVAL_S,
        )
    }
}

/// How the monitor decides whether an endpoint is alive.
///
/// One strategy applies to both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStrategy {
    /// Follow the transport layer's connection status changes.
    #[default]
    ConnectionEvents,
    /// Periodically check when each endpoint last sent a frame.
    FramePolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub liveness: LivenessStrategy,
    pub check_interval_ms: u64,
    /// Silence after which a polled endpoint counts as disconnected.
    pub heartbeat_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessStrategy::default(),
            check_interval_ms: DEFAULT_MONITOR_CHECK_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_MONITOR_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 || self.heartbeat_interval_ms == 0 {
            return Err(Error::Config(
                "monitor check and heartbeat intervals must be positive".into(),
            ));
        }
        Ok(())
    }
}
