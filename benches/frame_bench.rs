//! Performance benchmarks for active report decoding and aggregation.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench frame_bench
//! ```

use armory_core::Endpoint;
use armory_protocol::{
    LengthPrefixCodec, RelayStatusAggregator, RelayStatusReport, encode_active_report,
};
use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

/// Benchmark parsing a single active report.
fn bench_parse_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_report");
    group.throughput(Throughput::Elements(1));

    let frame = encode_active_report(0x01, 0x00, 0b1010_0101, 0b1000_0001, 0x00);

    group.bench_function("parse_active_report", |b| {
        b.iter(|| black_box(RelayStatusReport::parse(black_box(&frame))));
    });

    group.finish();
}

/// Benchmark feeding alternating reports from both boards into the aggregator.
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for count in [16usize, 256, 4096] {
        let reports: Vec<(Endpoint, RelayStatusReport)> = (0..count)
            .map(|i| {
                let endpoint = if i % 2 == 0 { Endpoint::Cabinet } else { Endpoint::Control };
                let frame = encode_active_report(0x01, 0x00, (i % 256) as u8, 0x00, 0x00);
                (endpoint, RelayStatusReport::parse(&frame).unwrap())
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &reports, |b, reports| {
            b.iter(|| {
                let mut aggregator = RelayStatusAggregator::new();
                for (endpoint, report) in reports {
                    black_box(aggregator.update(*endpoint, report));
                }
            });
        });
    }

    group.finish();
}

/// Benchmark length-prefix framing of a relay command.
fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Elements(1));

    let payload = Bytes::from_static(&[0xCC, 0xDD, 0xA1, 0x01, 0x00, 0x01, 0x00, 0x01, 0xA4, 0x48]);

    group.bench_function("encode_decode", |b| {
        b.iter(|| {
            let mut codec = LengthPrefixCodec::new();
            let mut buffer = BytesMut::new();
            codec.encode(black_box(payload.clone()), &mut buffer).unwrap();
            black_box(codec.decode(&mut buffer).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parse_report, bench_aggregate, bench_framing);
criterion_main!(benches);
