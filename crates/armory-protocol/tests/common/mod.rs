//! Helpers shared by the protocol integration tests.

#![allow(dead_code)]

use armory_core::{ChannelIndex, Endpoint};
use armory_protocol::{RelayStatusReport, encode_active_report};

/// Build a parsed report for the given input mask.
///
/// Rising/falling masks are derived from `previous` the way a board computes
/// them.
pub fn report(previous: u8, input: u8) -> RelayStatusReport {
    let frame = encode_active_report(0x01, 0x00, input, input & !previous, previous & !input);
    RelayStatusReport::parse(&frame).expect("encoded frame must parse")
}

/// Combined indices of the set bits of `mask` within an endpoint's half.
pub fn indices(endpoint: Endpoint, mask: u8) -> Vec<ChannelIndex> {
    (0..8)
        .filter(|bit| mask & (1 << bit) != 0)
        .map(|bit| {
            ChannelIndex::new((endpoint.channel_offset() + bit) as u8)
                .expect("index within combined range")
        })
        .collect()
}
