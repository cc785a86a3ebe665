//! Benchmarks for per-field decoding and framing
//!
//! Tests parsing performance for:
//! - Every field codec on a single value
//! - Checksum validation of a full packet
//! - Framing clean and noisy byte streams
//!
//! Platform: Cross-platform (synthetic streams, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use framewire::config::FramerConfig;
use framewire::framer::Framer;
use framewire::test_utils::{PacketStreamBuilder, mixed_layout};
use framewire::types::FieldCodec;
use std::hint::black_box;

fn bench_codecs(c: &mut Criterion) {
    let bytes = [0x12, 0x34, 0x56, 0x78];
    let mut group = c.benchmark_group("field_codecs");

    for codec in FieldCodec::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(codec.name()), &codec, |b, codec| {
            b.iter(|| black_box(codec.extract_value(black_box(&bytes))))
        });
    }

    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let layout = mixed_layout();
    let stream = PacketStreamBuilder::new(layout.clone()).packets(1).build();
    let checksum = layout.checksum().expect("mixed layout has a checksum");

    c.bench_function("checksum_validate", |b| {
        b.iter(|| black_box(checksum.codec.validate(black_box(&stream), checksum.offset)))
    });
}

fn bench_framing(c: &mut Criterion) {
    let layout = mixed_layout();
    let packets = 16 * 1024;
    let clean = PacketStreamBuilder::new(layout.clone()).packets(packets).build();
    let noisy = PacketStreamBuilder::new(layout.clone())
        .leading_noise(&[0x01; 64])
        .packets(packets)
        .corrupt_checksums((0..packets).step_by(97))
        .build();

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(clean.len() as u64));

    for (name, stream) in [("clean", &clean), ("noisy", &noisy)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), stream, |b, stream| {
            b.iter(|| {
                let (writer, mut framer) = Framer::new(&FramerConfig::default());
                framer.set_packet_size(layout.packet_size());
                writer.write(stream).expect("buffer within cap");
                writer.close();

                let mut framed = 0;
                loop {
                    let count = framer.read_packets(layout.sync_word(), 1).count();
                    if count == 0 {
                        break;
                    }
                    framed += count;
                }
                black_box(framed)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codecs, bench_checksum, bench_framing);
criterion_main!(benches);
