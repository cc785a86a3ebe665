//! Benchmarks for decoding throughput into the sample store
//!
//! Compares the serial path against the worker pool at several pool sizes,
//! using the same synthetic stream for every run.
//!
//! Platform: Cross-platform (synthetic streams, CI-safe)

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use framewire::SampleStore;
use framewire::config::StoreConfig;
use framewire::decoder::ParallelDecoder;
use framewire::notify::RecordingSink;
use framewire::store::BLOCK_SIZE;
use framewire::test_utils::{PacketStreamBuilder, mixed_layout};
use framewire::types::PacketsBuffer;
use std::hint::black_box;
use std::sync::Arc;

const PACKETS: usize = 64 * BLOCK_SIZE;

fn bench_decode(c: &mut Criterion) {
    let layout = Arc::new(mixed_layout());
    let stream = PacketStreamBuilder::new((*layout).clone()).random_values(7).packets(PACKETS).build();
    let packet_size = layout.packet_size();

    let mut group = c.benchmark_group("decode_throughput");
    group.throughput(Throughput::Elements(PACKETS as u64));
    group.sample_size(20);

    for workers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.iter_batched(
                || {
                    let store = Arc::new(
                        SampleStore::new(layout.channel_count(), &StoreConfig::default()).expect("store"),
                    );
                    ParallelDecoder::new(Arc::clone(&layout), store, workers, Arc::new(RecordingSink::default()))
                        .expect("decoder")
                },
                |mut decoder| {
                    let packets = PacketsBuffer::new(&stream, 0, PACKETS, packet_size);
                    black_box(decoder.decode(packets).expect("decode"))
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
