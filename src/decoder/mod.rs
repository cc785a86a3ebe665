//! Packet decoding into the sample store.
//!
//! [`ParallelDecoder`] consumes [`PacketsBuffer`]s produced by the framer. Whenever
//! the next sample index is block aligned and at least one full block per
//! worker of checksum-valid packets is available, the blocks are handed to the
//! worker pool; everything else is decoded one packet at a time on the calling
//! thread. Both paths convert values with the same per-channel ratio and fold
//! block ranges with [`fold_range`](crate::store::fold_range), so they produce
//! bit-identical stores.
//!
//! [`CsvDecoder`] is the line-oriented counterpart for CSV packets.

pub mod csv;
mod pool;

pub use csv::CsvDecoder;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::layout::{Checksum, PacketLayout};
use crate::notify::{Notification, NotificationSink};
use crate::store::{BLOCK_SIZE, SampleStore, now_millis};
use crate::types::{FieldCodec, PacketsBuffer};
use crate::Result;
use pool::WorkerPool;

/// Counters maintained by a decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    /// Packets converted into samples
    pub packets_decoded: u64,
    /// Packets dropped because their checksum did not match
    pub checksum_failures: u64,
    /// Batches handed to the worker pool
    pub parallel_dispatches: u64,
    /// Packets decoded on the calling thread
    pub serial_packets: u64,
}

/// Decode-ready form of one channel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelPlan {
    offset: usize,
    codec: FieldCodec,
    ratio: f32,
}

/// Decode-ready form of a locked layout.
#[derive(Debug, Clone)]
pub(crate) struct DecodePlan {
    pub(crate) packet_size: usize,
    checksum: Option<Checksum>,
    pub(crate) channels: Vec<ChannelPlan>,
}

impl DecodePlan {
    pub(crate) fn new(layout: &PacketLayout) -> Self {
        let channels = layout
            .channels()
            .iter()
            .filter_map(|channel| {
                channel.codec.map(|codec| ChannelPlan {
                    offset: channel.location,
                    codec,
                    ratio: channel.conversion_ratio(),
                })
            })
            .collect();
        Self { packet_size: layout.packet_size(), checksum: layout.checksum(), channels }
    }

    /// Converted value of `channel` in `packet`.
    #[inline]
    pub(crate) fn value(&self, channel: usize, packet: &[u8]) -> f32 {
        let plan = &self.channels[channel];
        plan.codec.extract_value(&packet[plan.offset..]) * plan.ratio
    }

    #[inline]
    pub(crate) fn checksum_valid(&self, packet: &[u8]) -> bool {
        self.checksum.is_none_or(|checksum| checksum.codec.validate(packet, checksum.offset))
    }
}

/// Barrier-synchronized multi-threaded packet decoder.
pub struct ParallelDecoder {
    layout: Arc<PacketLayout>,
    plan: Arc<DecodePlan>,
    store: Arc<SampleStore>,
    pool: Option<WorkerPool>,
    sink: Arc<dyn NotificationSink>,
    next_index: u64,
    stats: DecoderStats,
}

impl ParallelDecoder {
    /// Create a decoder writing `layout`'s channels into `store`.
    ///
    /// With `worker_count <= 1` every packet is decoded on the calling thread.
    pub fn new(
        layout: Arc<PacketLayout>,
        store: Arc<SampleStore>,
        worker_count: usize,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let plan = Arc::new(DecodePlan::new(&layout));
        let pool = if worker_count > 1 {
            Some(WorkerPool::new(worker_count, Arc::clone(&plan), Arc::clone(&store))?)
        } else {
            None
        };

        debug!(
            packet_size = plan.packet_size,
            channels = plan.channels.len(),
            checksum = plan.checksum.is_some(),
            workers = worker_count,
            "Decoder ready"
        );

        Ok(Self { layout, plan, next_index: store.sample_count(), store, pool, sink, stats: DecoderStats::default() })
    }

    pub fn layout(&self) -> &Arc<PacketLayout> {
        &self.layout
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(1, WorkerPool::worker_count)
    }

    /// Decode every packet in `packets`, returning the number of samples committed.
    ///
    /// Packets failing their checksum are dropped and reported. Fails with
    /// [`TelemetryError::SampleLimit`](crate::TelemetryError::SampleLimit) once
    /// the store is full; samples committed before that stay readable.
    pub fn decode(&mut self, mut packets: PacketsBuffer<'_>) -> Result<u64> {
        let start = self.next_index;

        while !packets.is_empty() {
            if let Some(blocks_per_worker) = self.parallel_share(&packets) {
                self.decode_parallel(&mut packets, blocks_per_worker)?;
            } else {
                self.decode_serial(&mut packets)?;
            }
        }

        self.store.evict()?;
        Ok(self.next_index - start)
    }

    /// Stop and join the worker threads.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    /// Blocks per worker for a parallel dispatch starting at the next index,
    /// or `None` if the serial path must run.
    fn parallel_share(&self, packets: &PacketsBuffer<'_>) -> Option<usize> {
        let pool = self.pool.as_ref()?;
        if self.next_index % BLOCK_SIZE as u64 != 0 {
            return None;
        }

        let workers = pool.worker_count();
        let dispatch_unit = workers * BLOCK_SIZE;
        if packets.count() < dispatch_unit {
            return None;
        }

        let valid = self.valid_run(packets, packets.count() / dispatch_unit * dispatch_unit);
        let available_blocks = valid / BLOCK_SIZE;
        (available_blocks >= workers).then_some(available_blocks / workers)
    }

    /// Length of the leading run of checksum-valid packets, checking at most `limit`.
    fn valid_run(&self, packets: &PacketsBuffer<'_>, limit: usize) -> usize {
        (0..packets.count().min(limit))
            .take_while(|&i| packets.packet(i).is_some_and(|packet| self.plan.checksum_valid(packet)))
            .count()
    }

    fn decode_parallel(&mut self, packets: &mut PacketsBuffer<'_>, blocks_per_worker: usize) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let count = pool.worker_count() * blocks_per_worker * BLOCK_SIZE;
        let first = self.next_index;
        self.store.prepare(first + count as u64)?;

        let buffer: Arc<[u8]> = Arc::from(packets.bytes(count));
        pool.dispatch(buffer, self.plan.packet_size, blocks_per_worker, first)?;

        self.store.write_timestamps(first, count as u64, now_millis())?;
        self.next_index += count as u64;
        self.store.commit(self.next_index);
        packets.advance(count);

        self.stats.packets_decoded += count as u64;
        self.stats.parallel_dispatches += 1;
        trace!(first, count, blocks_per_worker, "Parallel dispatch committed");
        Ok(())
    }

    fn decode_serial(&mut self, packets: &mut PacketsBuffer<'_>) -> Result<()> {
        let Some(packet) = packets.next_packet() else {
            return Ok(());
        };

        if !self.plan.checksum_valid(packet) {
            self.stats.checksum_failures += 1;
            self.sink.notify(Notification::ChecksumFailure, 0);
            return Ok(());
        }

        let index = self.next_index;
        self.store.prepare(index + 1)?;
        for channel in 0..self.plan.channels.len() {
            self.store.write_sample(channel, index, self.plan.value(channel, packet))?;
        }
        self.store.write_timestamps(index, 1, now_millis())?;
        self.next_index += 1;
        self.store.commit(self.next_index);

        self.stats.packets_decoded += 1;
        self.stats.serial_packets += 1;
        Ok(())
    }
}

impl Drop for ParallelDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TelemetryError;
    use crate::config::StoreConfig;
    use crate::notify::RecordingSink;
    use crate::test_utils::{PacketStreamBuilder, voltage_layout, mixed_layout};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn decoder(layout: PacketLayout, workers: usize) -> (ParallelDecoder, Arc<RecordingSink>) {
        let store = Arc::new(SampleStore::new(layout.channel_count(), &StoreConfig::default()).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let decoder = ParallelDecoder::new(Arc::new(layout), store, workers, sink.clone()).unwrap();
        (decoder, sink)
    }

    fn decode_all(decoder: &mut ParallelDecoder, bytes: &[u8]) -> u64 {
        let packet_size = decoder.layout().packet_size();
        let packets = PacketsBuffer::new(bytes, 0, bytes.len() / packet_size, packet_size);
        decoder.decode(packets).unwrap()
    }

    #[test]
    fn checksum_failure_is_dropped_and_reported() {
        let (mut decoder, sink) = decoder(voltage_layout(), 1);
        let bytes = [0xAA, 0x64, 0x00, 0x64, 0x00, 0xAA, 0x64, 0x00, 0x65, 0x00];

        assert_eq!(decode_all(&mut decoder, &bytes), 1);
        let store = decoder.store();
        assert_eq!(store.sample_count(), 1);
        assert_eq!(store.value_at(0, 0).unwrap(), Some(100.0));
        assert_eq!(decoder.stats().checksum_failures, 1);
        assert_eq!(sink.received(), vec![(Notification::ChecksumFailure, 0)]);
    }

    #[test]
    fn full_blocks_take_the_parallel_path() {
        let (mut decoder, _) = decoder(mixed_layout(), 4);
        let stream = PacketStreamBuilder::new(mixed_layout()).packets(8 * BLOCK_SIZE + 5).build();

        assert_eq!(decode_all(&mut decoder, &stream), (8 * BLOCK_SIZE + 5) as u64);
        let stats = decoder.stats();
        assert_eq!(stats.parallel_dispatches, 1);
        assert_eq!(stats.serial_packets, 5);
    }

    #[test]
    fn unaligned_start_runs_serial_until_block_boundary() {
        let (mut decoder, _) = decoder(mixed_layout(), 2);
        let builder = PacketStreamBuilder::new(mixed_layout());
        let head = builder.clone().packets(3).build();
        let tail = builder.first_value(3).packets(2 * BLOCK_SIZE + (BLOCK_SIZE - 3)).build();

        decode_all(&mut decoder, &head);
        decode_all(&mut decoder, &tail);

        let stats = decoder.stats();
        // 1021 serial packets finish the first block, then two blocks go parallel
        assert_eq!(stats.serial_packets, BLOCK_SIZE as u64);
        assert_eq!(stats.parallel_dispatches, 1);
        assert_eq!(decoder.store().sample_count(), 3 * BLOCK_SIZE as u64);
    }

    #[test]
    fn sample_limit_stops_decoding() {
        let layout = voltage_layout();
        let config = StoreConfig { max_samples: 3, ..StoreConfig::default() };
        let store = Arc::new(SampleStore::new(1, &config).unwrap());
        let mut decoder =
            ParallelDecoder::new(Arc::new(layout.clone()), store, 1, Arc::new(RecordingSink::default())).unwrap();

        let stream = PacketStreamBuilder::new(layout).packets(5).build();
        let packets = PacketsBuffer::new(&stream, 0, 5, 5);
        let err = decoder.decode(packets).unwrap_err();

        assert!(matches!(err, TelemetryError::SampleLimit { limit: 3 }));
        assert_eq!(decoder.store().sample_count(), 3);
    }

    #[test]
    fn timestamps_follow_sample_order() {
        let (mut decoder, _) = decoder(mixed_layout(), 2);
        let builder = PacketStreamBuilder::new(mixed_layout());
        decode_all(&mut decoder, &builder.clone().packets(2 * BLOCK_SIZE).build());
        decode_all(&mut decoder, &builder.first_value(2 * BLOCK_SIZE).packets(10).build());

        let store = decoder.store();
        let stamps: Vec<u64> = (0..store.sample_count()).map(|i| store.timestamp(i).unwrap().unwrap()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn validation_stops_at_the_largest_dispatch() {
        let (decoder, _) = decoder(voltage_layout(), 2);
        let stream = PacketStreamBuilder::new(voltage_layout()).packets(5 * BLOCK_SIZE + 9).build();
        let packets = PacketsBuffer::new(&stream, 0, 5 * BLOCK_SIZE + 9, 5);

        assert_eq!(decoder.valid_run(&packets, usize::MAX), 5 * BLOCK_SIZE + 9);
        assert_eq!(decoder.parallel_share(&packets), Some(2));
        assert_eq!(decoder.valid_run(&packets, 4 * BLOCK_SIZE), 4 * BLOCK_SIZE);
    }

    #[test]
    fn reader_sees_complete_samples_during_parallel_dispatches() {
        let layout = voltage_layout();
        let (mut decoder, _) = decoder(layout.clone(), 2);
        let packet_size = layout.packet_size();
        let stream = PacketStreamBuilder::new(layout.clone()).packets(16 * BLOCK_SIZE + 3).build();
        let plan = DecodePlan::new(&layout);
        let expected: Vec<f32> = stream.chunks_exact(packet_size).map(|packet| plan.value(0, packet)).collect();

        let store = Arc::clone(decoder.store());
        let done = AtomicBool::new(false);
        let observed = std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut observed = 0u64;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let n = store.sample_count();
                    if n > 0 {
                        let last = n - 1;
                        assert_eq!(store.value_at(0, last).unwrap(), Some(expected[last as usize]), "sample {last}");
                        assert!(store.timestamp(last).unwrap().is_some(), "timestamp {last}");
                        observed += 1;
                    }
                    if finished {
                        break observed;
                    }
                }
            });

            for chunk in stream.chunks(2 * BLOCK_SIZE * packet_size) {
                decode_all(&mut decoder, chunk);
            }
            done.store(true, Ordering::Release);
            reader.join().unwrap()
        });

        assert!(observed > 0);
        assert_eq!(decoder.stats().parallel_dispatches, 8);
        assert_eq!(decoder.store().sample_count(), 16 * BLOCK_SIZE as u64 + 3);
    }

    fn snapshot(decoder: &ParallelDecoder) -> (Vec<Vec<u32>>, Vec<Vec<(u32, u32)>>) {
        let store = decoder.store();
        let count = store.sample_count();
        let values = (0..store.channel_count())
            .map(|ch| store.values(ch, 0..count).unwrap().iter().map(|v| v.to_bits()).collect())
            .collect();
        let ranges = (0..store.channel_count())
            .map(|ch| {
                (0..count)
                    .step_by(BLOCK_SIZE)
                    .map(|block| {
                        let (min, max) = store.range_in_block(ch, block).unwrap();
                        (min.to_bits(), max.to_bits())
                    })
                    .collect()
            })
            .collect();
        (values, ranges)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_parallel_matches_serial(
            seed in any::<u64>(),
            extra in 0usize..BLOCK_SIZE,
            corrupt in prop::collection::vec(0usize..6 * BLOCK_SIZE, 0..4),
            workers in 2usize..4,
        ) {
            let stream = PacketStreamBuilder::new(mixed_layout())
                .random_values(seed)
                .corrupt_checksums(corrupt)
                .packets(6 * BLOCK_SIZE + extra)
                .build();

            let (mut serial, _) = decoder(mixed_layout(), 1);
            let (mut parallel, _) = decoder(mixed_layout(), workers);
            decode_all(&mut serial, &stream);
            decode_all(&mut parallel, &stream);

            prop_assert_eq!(serial.store().sample_count(), parallel.store().sample_count());
            prop_assert_eq!(serial.stats().checksum_failures, parallel.stats().checksum_failures);
            prop_assert!(serial.stats().parallel_dispatches == 0);
            prop_assert_eq!(snapshot(&serial), snapshot(&parallel));
        }
    }
}
