//! Synthetic telemetry streams for tests and benchmarks
//!
//! Builders here produce byte streams that match a [`PacketLayout`], so the
//! framer and decoders can be exercised without recorded captures.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::HashSet;

use crate::layout::PacketLayout;
use crate::layout::csv::CsvLayout;
use crate::types::{ChecksumCodec, Color, FieldCodec};

/// Single `uint16 LSB First` field at offset 1 followed by a checksum at offset 3.
///
/// Packets are 5 bytes: `AA lo hi cs_lo cs_hi`.
pub fn voltage_layout() -> PacketLayout {
    let mut layout = PacketLayout::new();
    layout
        .insert_field(1, FieldCodec::Uint16LsbFirst, "Voltage", Color::rgb(0xFF, 0, 0), "V", 1.0, 1.0)
        .expect("valid field");
    layout.insert_checksum(3, ChecksumCodec::Uint16LsbFirst).expect("valid checksum");
    layout
}

/// One field of every width and signedness, with non-trivial conversions and a checksum.
pub fn mixed_layout() -> PacketLayout {
    let mut layout = PacketLayout::new();
    let fields = [
        (1, FieldCodec::Uint16LsbFirst, "Voltage", 1.0, 1.0),
        (3, FieldCodec::Int16MsbFirst, "Current", 2.0, 1.0),
        (5, FieldCodec::Float32LsbFirst, "Temperature", 1.0, 3.0),
        (9, FieldCodec::Uint32MsbFirst, "Counter", 1.0, 1.0),
        (13, FieldCodec::Uint8, "Status", 1.0, 1.0),
        (14, FieldCodec::Int8, "Trim", 4.0, 1.0),
    ];
    for (offset, codec, name, a, b) in fields {
        layout.insert_field(offset, codec, name, Color::default(), "", a, b).expect("valid field");
    }
    layout.insert_checksum(15, ChecksumCodec::Uint16LsbFirst).expect("valid checksum");
    layout
}

/// Three-column CSV layout (`time,voltage,current`).
pub fn csv_layout() -> CsvLayout {
    let mut layout = CsvLayout::new();
    layout.insert_field(0, "Time", Color::default(), "s", 1.0, 1.0).expect("valid column");
    layout.insert_field(1, "Voltage", Color::default(), "V", 1.0, 1.0).expect("valid column");
    layout.insert_field(2, "Current", Color::default(), "mA", 1.0, 1000.0).expect("valid column");
    layout
}

/// Builds a byte stream of packets for a layout.
///
/// By default field bytes are derived from the packet index, so consecutive
/// streams built with [`first_value`](Self::first_value) continue each other.
#[derive(Debug, Clone)]
pub struct PacketStreamBuilder {
    layout: PacketLayout,
    first: usize,
    count: usize,
    seed: Option<u64>,
    corrupt: HashSet<usize>,
    noise: Vec<u8>,
}

impl PacketStreamBuilder {
    pub fn new(layout: PacketLayout) -> Self {
        Self { layout, first: 0, count: 0, seed: None, corrupt: HashSet::new(), noise: Vec::new() }
    }

    /// Number of packets to generate.
    pub fn packets(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Index of the first generated packet.
    pub fn first_value(mut self, first: usize) -> Self {
        self.first = first;
        self
    }

    /// Fill field bytes from a seeded pseudo-random sequence instead.
    pub fn random_values(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Break the checksum of the packets at these indices (relative to this stream).
    pub fn corrupt_checksums(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.corrupt.extend(indices);
        self
    }

    /// Prepend bytes before the first packet.
    pub fn leading_noise(mut self, noise: &[u8]) -> Self {
        self.noise = noise.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let size = self.layout.packet_size();
        let mut bytes = Vec::with_capacity(self.noise.len() + self.count * size);
        bytes.extend_from_slice(&self.noise);

        let mut rng = self.seed.map(SplitMix64::new);
        for i in 0..self.count {
            let mut packet = vec![0u8; size];
            packet[0] = self.layout.sync_word();

            let payload_end = self.layout.checksum().map_or(size, |checksum| checksum.offset);
            for (offset, byte) in packet.iter_mut().enumerate().take(payload_end).skip(1) {
                *byte = match rng.as_mut() {
                    Some(rng) => rng.next() as u8,
                    None => ((self.first + i) * 31 + offset * 7) as u8,
                };
            }

            if let Some(checksum) = self.layout.checksum() {
                let sum = checksum.codec.compute(&packet[1..checksum.offset]).unwrap_or(0);
                let sum = if self.corrupt.contains(&i) { sum.wrapping_add(1) } else { sum };
                packet[checksum.offset..checksum.end()].copy_from_slice(&sum.to_le_bytes());
            }
            bytes.extend_from_slice(&packet);
        }
        bytes
    }
}

/// Render CSV lines of `time,voltage,current` for `count` rows.
pub fn csv_lines(count: usize) -> String {
    (0..count).map(|i| format!("{},{}.5,{}\n", i, i % 13, i % 7)).collect()
}

/// Small deterministic generator for reproducible random streams.
#[derive(Debug, Clone)]
struct SplitMix64(u64);

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_packets_validate() {
        let layout = mixed_layout();
        let stream = PacketStreamBuilder::new(layout.clone()).packets(10).corrupt_checksums([4]).build();
        let checksum = layout.checksum().unwrap();

        for (i, packet) in stream.chunks_exact(layout.packet_size()).enumerate() {
            assert_eq!(packet[0], 0xAA);
            assert_eq!(checksum.codec.validate(packet, checksum.offset), i != 4);
        }
    }

    #[test]
    fn leading_noise_is_prepended() {
        let stream = PacketStreamBuilder::new(voltage_layout()).leading_noise(&[1, 2]).packets(1).build();
        assert_eq!(stream.len(), 7);
        assert_eq!(stream[2], 0xAA);
    }
}
