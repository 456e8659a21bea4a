//! Combined relay status across both boards.
//!
//! The cabinet board fills slots 0-7 of a 16-slot view and the control panel
//! board fills slots 8-15. Every accepted report rewrites only the reporting
//! board's half, and the edges of an update are computed against the shadow
//! copy the aggregator kept from the previous report.
//!
//! # Momentary buttons
//!
//! Some inputs are momentary buttons: the board raises the channel once per
//! press and keeps it high until the next report. To make sure one press is
//! consumed exactly once, the caller checks
//! [`RelayStatusAggregator::has_active_report_trigger`] and then calls
//! [`RelayStatusAggregator::reset_channel_state`] to clear the shadow bit, so
//! the next report raising the channel is seen as a fresh rising edge.
//!
//! ```
//! use armory_core::{ChannelIndex, Endpoint};
//! use armory_protocol::{RelayStatusAggregator, RelayStatusReport, encode_active_report};
//!
//! let mut aggregator = RelayStatusAggregator::new();
//! let cancel = ChannelIndex::new(10).unwrap();
//! let pulse = RelayStatusReport::parse(&encode_active_report(1, 0, 0x04, 0x04, 0)).unwrap();
//!
//! let update = aggregator.update(Endpoint::Control, &pulse).unwrap();
//! assert!(aggregator.has_active_report_trigger(cancel, Endpoint::Control, &update));
//! aggregator.reset_channel_state(Endpoint::Control, cancel);
//!
//! // The same pulse is detected again after the reset.
//! let update = aggregator.update(Endpoint::Control, &pulse).unwrap();
//! assert!(aggregator.has_active_report_trigger(cancel, Endpoint::Control, &update));
//! ```

use armory_core::constants::{CHANNELS_PER_ENDPOINT, COMBINED_CHANNELS};
use armory_core::{ChannelIndex, Endpoint};
use serde::Serialize;
use tracing::trace;

use crate::RelayStatusReport;

/// Result of an update that changed at least one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedRelayState {
    /// Board whose report produced this update.
    pub endpoint: Endpoint,
    pub raw_hex: String,
    pub current: [bool; COMBINED_CHANNELS],
    pub previous: [bool; COMBINED_CHANNELS],
    pub changed: bool,
    /// One line per changed channel, e.g. `CH4: open → closed`.
    pub changes: Vec<String>,
    /// Channels that went low → high, ascending.
    pub rising: Vec<ChannelIndex>,
    /// Channels that went high → low, ascending.
    pub falling: Vec<ChannelIndex>,
}

impl CombinedRelayState {
    /// Level of a combined channel after this update.
    #[must_use]
    pub fn is_closed(&self, index: ChannelIndex) -> bool {
        self.current[index.as_usize()]
    }

    /// Whether the channel appears in either edge set.
    #[must_use]
    pub fn has_edge(&self, index: ChannelIndex) -> bool {
        self.rising.contains(&index) || self.falling.contains(&index)
    }
}

/// Merges both boards' reports into one 16-channel view.
#[derive(Debug, Clone, Default)]
pub struct RelayStatusAggregator {
    combined: [bool; COMBINED_CHANNELS],
}

impl RelayStatusAggregator {
    /// Create an aggregator where every channel starts open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current combined view.
    #[must_use]
    pub fn snapshot(&self) -> [bool; COMBINED_CHANNELS] {
        self.combined
    }

    /// Apply one board's report.
    ///
    /// Returns `None` when the report did not change any channel.
    pub fn update(
        &mut self,
        endpoint: Endpoint,
        report: &RelayStatusReport,
    ) -> Option<CombinedRelayState> {
        let previous = self.combined;
        let offset = endpoint.channel_offset();
        self.combined[offset..offset + CHANNELS_PER_ENDPOINT].copy_from_slice(&report.channels);
        let current = self.combined;

        let mut rising = Vec::new();
        let mut falling = Vec::new();
        let mut changes = Vec::new();

        for slot in offset..offset + CHANNELS_PER_ENDPOINT {
            let (before, after) = (previous[slot], current[slot]);
            if before == after {
                continue;
            }
            let Ok(index) = ChannelIndex::new(slot as u8) else {
                continue;
            };
            if after {
                rising.push(index);
            } else {
                falling.push(index);
            }
            changes.push(format!(
                "CH{}: {} → {}",
                slot + 1,
                level(before),
                level(after)
            ));
        }

        if changes.is_empty() {
            trace!(endpoint = %endpoint, raw = %report.raw_hex, "Report without channel changes");
            return None;
        }

        Some(CombinedRelayState {
            endpoint,
            raw_hex: report.raw_hex.clone(),
            current,
            previous,
            changed: true,
            changes,
            rising,
            falling,
        })
    }

    /// Whether an absolute channel index changed in the given update.
    #[must_use]
    pub fn has_index_changed(&self, index: ChannelIndex, update: &CombinedRelayState) -> bool {
        update.has_edge(index)
    }

    /// Whether a momentary button fired in this update.
    ///
    /// True only if the channel belongs to `endpoint`, the update came from
    /// that endpoint and the channel rose.
    #[must_use]
    pub fn has_active_report_trigger(
        &self,
        index: ChannelIndex,
        endpoint: Endpoint,
        update: &CombinedRelayState,
    ) -> bool {
        endpoint.owns(index) && update.endpoint == endpoint && update.rising.contains(&index)
    }

    /// Clear the shadow bit of a consumed momentary trigger.
    pub fn reset_channel_state(&mut self, endpoint: Endpoint, index: ChannelIndex) {
        if !endpoint.owns(index) {
            trace!(endpoint = %endpoint, index = %index, "Reset ignored for channel of other endpoint");
            return;
        }
        self.combined[index.as_usize()] = false;
    }
}

fn level(closed: bool) -> &'static str {
    if closed { "closed" } else { "open" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_active_report;

    fn report(input: u8) -> RelayStatusReport {
        RelayStatusReport::parse(&encode_active_report(0x01, 0x00, input, 0x00, 0x00)).unwrap()
    }

    fn idx(n: u8) -> ChannelIndex {
        ChannelIndex::new(n).unwrap()
    }

    #[test]
    fn test_first_report_with_no_inputs_is_unchanged() {
        let mut aggregator = RelayStatusAggregator::new();
        assert!(aggregator.update(Endpoint::Cabinet, &report(0x00)).is_none());
        assert_eq!(aggregator.snapshot(), [false; COMBINED_CHANNELS]);
    }

    #[test]
    fn test_cabinet_writes_lower_half() {
        let mut aggregator = RelayStatusAggregator::new();
        let update = aggregator.update(Endpoint::Cabinet, &report(0b0000_0011)).unwrap();

        assert_eq!(update.endpoint, Endpoint::Cabinet);
        assert!(update.changed);
        assert_eq!(update.rising, vec![idx(0), idx(1)]);
        assert!(update.falling.is_empty());
        assert!(update.is_closed(idx(0)));
        assert!(!update.is_closed(idx(8)));
        assert_eq!(update.changes, vec!["CH1: open → closed", "CH2: open → closed"]);
    }

    #[test]
    fn test_control_writes_upper_half() {
        let mut aggregator = RelayStatusAggregator::new();
        aggregator.update(Endpoint::Cabinet, &report(0xFF));
        let update = aggregator.update(Endpoint::Control, &report(0b1000_0001)).unwrap();

        assert_eq!(update.rising, vec![idx(8), idx(15)]);
        assert!(update.previous[..8].iter().all(|closed| *closed));
        assert!(update.current[..8].iter().all(|closed| *closed));
        assert_eq!(update.changes, vec!["CH9: open → closed", "CH16: open → closed"]);
    }

    #[test]
    fn test_falling_edges() {
        let mut aggregator = RelayStatusAggregator::new();
        aggregator.update(Endpoint::Cabinet, &report(0b0000_1100));
        let update = aggregator.update(Endpoint::Cabinet, &report(0b0000_0100)).unwrap();

        assert!(update.rising.is_empty());
        assert_eq!(update.falling, vec![idx(3)]);
        assert!(aggregator.has_index_changed(idx(3), &update));
        assert!(!aggregator.has_index_changed(idx(2), &update));
        assert_eq!(update.changes, vec!["CH4: closed → open"]);
    }

    #[test]
    fn test_repeated_pulse_triggers_once_without_reset() {
        let mut aggregator = RelayStatusAggregator::new();
        let cancel = idx(10);
        let pulse = report(0b0000_0100);

        let update = aggregator.update(Endpoint::Control, &pulse).unwrap();
        assert!(aggregator.has_active_report_trigger(cancel, Endpoint::Control, &update));

        // Identical report: nothing changed, nothing to trigger.
        assert!(aggregator.update(Endpoint::Control, &pulse).is_none());
    }

    #[test]
    fn test_pulse_detected_again_after_reset() {
        let mut aggregator = RelayStatusAggregator::new();
        let cancel = idx(10);
        let pulse = report(0b0000_0100);

        let first = aggregator.update(Endpoint::Control, &pulse).unwrap();
        assert!(aggregator.has_active_report_trigger(cancel, Endpoint::Control, &first));
        aggregator.reset_channel_state(Endpoint::Control, cancel);

        let second = aggregator.update(Endpoint::Control, &pulse).unwrap();
        assert!(aggregator.has_active_report_trigger(cancel, Endpoint::Control, &second));
    }

    #[test]
    fn test_trigger_requires_owning_endpoint() {
        let mut aggregator = RelayStatusAggregator::new();
        let update = aggregator.update(Endpoint::Control, &report(0b0000_0100)).unwrap();

        assert!(!aggregator.has_active_report_trigger(idx(10), Endpoint::Cabinet, &update));
        assert!(!aggregator.has_active_report_trigger(idx(2), Endpoint::Cabinet, &update));
    }

    #[test]
    fn test_trigger_ignores_unrelated_change_while_held() {
        let mut aggregator = RelayStatusAggregator::new();
        aggregator.update(Endpoint::Control, &report(0b0000_0100));

        // Another channel changes while the button is still high.
        let update = aggregator.update(Endpoint::Control, &report(0b0000_0101)).unwrap();
        assert!(!aggregator.has_active_report_trigger(idx(10), Endpoint::Control, &update));
    }

    #[test]
    fn test_reset_other_half_is_ignored() {
        let mut aggregator = RelayStatusAggregator::new();
        aggregator.update(Endpoint::Cabinet, &report(0x01));
        aggregator.reset_channel_state(Endpoint::Control, idx(0));
        assert!(aggregator.snapshot()[0]);
    }
}
