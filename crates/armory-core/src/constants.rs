//! Wire-level and timing constants for the relay I/O boards.
//!
//! The cabinet and the control panel each carry an 8-channel relay board that
//! pushes a fixed 9-byte *active report* whenever one of its inputs changes:
//!
//! ```text
//! EE FF C0 <addr> <relay> <input> <rising> <falling> <trailer>
//! ```
//!
//! Bit N of a mask byte is local channel N. The controller merges the two
//! boards into one 16-channel view: slots 0-7 are the cabinet, 8-15 the
//! control panel.
//!
//! # Usage
//!
//! ```
//! use armory_core::constants::*;
//!
//! assert_eq!(ACTIVE_REPORT_LEN, 9);
//! assert_eq!(COMBINED_CHANNELS, 2 * CHANNELS_PER_ENDPOINT);
//! ```

// ============================================================================
// Active Report Frame
// ============================================================================

/// First marker byte of an active report frame.
pub const REPORT_MARKER_0: u8 = 0xEE;

/// Second marker byte of an active report frame.
pub const REPORT_MARKER_1: u8 = 0xFF;

/// Frame type byte identifying an active report.
pub const REPORT_FRAME_TYPE: u8 = 0xC0;

/// Exact length of an active report frame in bytes.
pub const ACTIVE_REPORT_LEN: usize = 9;

/// Byte offsets inside an active report frame.
pub const REPORT_ADDRESS_OFFSET: usize = 3;
pub const REPORT_RELAY_OFFSET: usize = 4;
pub const REPORT_INPUT_OFFSET: usize = 5;
pub const REPORT_RISING_OFFSET: usize = 6;
pub const REPORT_FALLING_OFFSET: usize = 7;

// ============================================================================
// Relay Command Frame (A1 short frame)
// ============================================================================

/// Marker bytes that open a relay control command.
pub const COMMAND_MARKER_0: u8 = 0xCC;
pub const COMMAND_MARKER_1: u8 = 0xDD;

/// Function code of the relay output control command.
pub const COMMAND_FUNCTION_RELAY: u8 = 0xA1;

/// Board address used for every relay command.
pub const COMMAND_BOARD_ADDRESS: u8 = 0x01;

/// Length of a relay control command in bytes.
pub const RELAY_COMMAND_LEN: usize = 10;

/// Mask selecting every relay output on a board.
pub const ALL_RELAYS_MASK: u8 = 0xFF;

// ============================================================================
// Channel Layout
// ============================================================================

/// Input channels reported by a single board.
pub const CHANNELS_PER_ENDPOINT: usize = 8;

/// Slots in the combined cabinet + control view.
pub const COMBINED_CHANNELS: usize = 16;

/// Highest relay output number on a board (outputs are numbered from 1).
pub const MAX_RELAY_CHANNEL: u8 = 8;

// ============================================================================
// Transport Framing and Heartbeat
// ============================================================================

/// Size of the big-endian length prefix used by framed links.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a framed link accepts before dropping the connection.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Payload sent on every heartbeat tick.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"HEARTBEAT";

/// Payloads accepted as a heartbeat acknowledgment.
pub const HEARTBEAT_ACK_PAYLOADS: &[&[u8]] = &[b"HEARTBEAT_ACK", b"PONG"];

// ============================================================================
// Timing Defaults (milliseconds unless noted)
// ============================================================================

/// How long a correlated response may take before `ResponseTimeout`.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// How long a connection attempt may take.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Interval between heartbeat payloads.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Time allowed for a heartbeat acknowledgment.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 5000;

/// Minimum gap between two queued hardware commands.
pub const DEFAULT_QUEUE_INTERVAL_MS: u64 = 50;

/// Seconds the cabinet door may stay open before the timeout alarm.
pub const DEFAULT_DOOR_OPEN_TIMEOUT_S: u64 = 30;

/// Minimum time between two reported vibration alarms.
pub const DEFAULT_VIBRATION_THROTTLE_MS: u64 = 5000;
pub const MIN_VIBRATION_THROTTLE_MS: u64 = 100;
pub const MAX_VIBRATION_THROTTLE_MS: u64 = 60_000;

/// Seconds between repeated authorization prompts while applying.
pub const DEFAULT_AUTH_RETRY_INTERVAL_S: u64 = 30;
pub const MIN_AUTH_RETRY_INTERVAL_S: u64 = 5;
pub const MAX_AUTH_RETRY_INTERVAL_S: u64 = 300;

/// Period of the monitor's liveness check when polling frames.
pub const DEFAULT_MONITOR_CHECK_INTERVAL_MS: u64 = 30_000;

/// Silence after which a polled endpoint counts as disconnected.
pub const DEFAULT_MONITOR_HEARTBEAT_INTERVAL_MS: u64 = 60_000;

// ============================================================================
// Event Channels
// ============================================================================

/// Capacity of the bounded channels carrying transport and business events.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
