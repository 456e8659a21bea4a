//! End-to-end decoding of board traffic into combined state updates.

mod common;

use armory_core::{ChannelIndex, Endpoint};
use armory_protocol::{RelayStatusAggregator, RelayStatusReport};

#[test]
fn test_interleaved_boards_keep_their_halves() {
    let mut aggregator = RelayStatusAggregator::new();

    let cabinet = aggregator
        .update(Endpoint::Cabinet, &common::report(0x00, 0b0000_0010))
        .unwrap();
    assert_eq!(cabinet.rising, common::indices(Endpoint::Cabinet, 0b0000_0010));

    let control = aggregator
        .update(Endpoint::Control, &common::report(0x00, 0b0001_0000))
        .unwrap();
    assert_eq!(control.rising, common::indices(Endpoint::Control, 0b0001_0000));
    assert!(control.current[1], "cabinet half untouched by control report");

    let snapshot = aggregator.snapshot();
    let closed: Vec<usize> = (0..16).filter(|i| snapshot[*i]).collect();
    assert_eq!(closed, vec![1, 12]);
}

#[test]
fn test_wire_bytes_to_update() {
    let mut aggregator = RelayStatusAggregator::new();
    let frame = [0xEE, 0xFF, 0xC0, 0x01, 0x00, 0x10, 0x10, 0x00, 0x00];

    let report = RelayStatusReport::parse(&frame).unwrap();
    let update = aggregator.update(Endpoint::Cabinet, &report).unwrap();

    let vibration = ChannelIndex::new(4).unwrap();
    assert!(aggregator.has_index_changed(vibration, &update));
    assert!(update.is_closed(vibration));
    assert_eq!(update.raw_hex, "EE FF C0 01 00 10 10 00 00");
}

#[test]
fn test_garbage_is_dropped_before_aggregation() {
    let aggregator = RelayStatusAggregator::new();
    for frame in [&b"HEARTBEAT_ACK"[..], &[0xEE, 0xFF][..], &[0u8; 9][..]] {
        assert!(RelayStatusReport::parse(frame).is_none());
    }
    assert_eq!(aggregator.snapshot(), [false; 16]);
}
