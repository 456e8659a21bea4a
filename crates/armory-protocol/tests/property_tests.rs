//! Property-based tests for the active report codec and the aggregator.

mod common;

use armory_core::Endpoint;
use armory_protocol::{RelayStatusAggregator, RelayStatusReport, encode_active_report};
use proptest::prelude::*;

fn endpoint() -> impl Strategy<Value = Endpoint> {
    prop_oneof![Just(Endpoint::Cabinet), Just(Endpoint::Control)]
}

/// Sequence of (endpoint, input mask) reports.
fn report_sequence() -> impl Strategy<Value = Vec<(Endpoint, u8)>> {
    prop::collection::vec((endpoint(), any::<u8>()), 1..40)
}

proptest! {
    /// Decoding an encoded frame yields the bits of its input mask.
    #[test]
    fn prop_frame_roundtrip(
        address in any::<u8>(),
        relay in any::<u8>(),
        input in any::<u8>(),
        rising in any::<u8>(),
        falling in any::<u8>(),
    ) {
        let frame = encode_active_report(address, relay, input, rising, falling);
        let report = RelayStatusReport::parse(&frame).unwrap();

        for bit in 0..8 {
            prop_assert_eq!(report.channels[bit], input & (1 << bit) != 0);
        }
        prop_assert_eq!(report.address, address);
        prop_assert_eq!(report.rising_mask, rising);
        prop_assert_eq!(report.falling_mask, falling);
    }

    /// Edge sets equal the XOR of consecutive masks of the reporting endpoint,
    /// split by direction and confined to that endpoint's half.
    #[test]
    fn prop_edges_are_xor_of_consecutive_masks(sequence in report_sequence()) {
        let mut aggregator = RelayStatusAggregator::new();
        let mut last = [0u8; 2];

        for (endpoint, mask) in sequence {
            let slot = if endpoint == Endpoint::Cabinet { 0 } else { 1 };
            let previous = last[slot];
            let update = aggregator.update(endpoint, &common::report(previous, mask));
            let diff = previous ^ mask;

            match update {
                None => prop_assert_eq!(diff, 0),
                Some(state) => {
                    prop_assert!(diff != 0);
                    prop_assert_eq!(state.endpoint, endpoint);
                    prop_assert_eq!(&state.rising, &common::indices(endpoint, diff & mask));
                    prop_assert_eq!(&state.falling, &common::indices(endpoint, diff & previous));
                    prop_assert_eq!(state.changes.len(), diff.count_ones() as usize);
                }
            }
            last[slot] = mask;
        }
    }

    /// Arbitrary bytes never panic the parser, and acceptance matches the
    /// marker check.
    #[test]
    fn prop_arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..16)) {
        let parsed = RelayStatusReport::parse(&data);
        prop_assert_eq!(parsed.is_some(), armory_protocol::is_active_report_frame(&data));
    }
}
