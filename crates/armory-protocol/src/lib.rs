//! Wire formats spoken by the cabinet and control panel relay boards.
//!
//! - [`report`]: the 9-byte active report pushed by a board on input changes
//! - [`command`]: relay output control commands (A1 short frame)
//! - [`framing`]: optional length-prefix framing used on transport links
//! - [`aggregator`]: merges both boards into one 16-channel view with edges

pub mod aggregator;
pub mod command;
pub mod error;
pub mod framing;
pub mod report;

pub use aggregator::{CombinedRelayState, RelayStatusAggregator};
pub use command::{RelayAction, RelayCommand, RelaySelector};
pub use error::{ProtocolError, Result};
pub use framing::{LengthPrefixCodec, MessageCodec};
pub use report::{RelayStatusReport, encode_active_report, is_active_report_frame};
