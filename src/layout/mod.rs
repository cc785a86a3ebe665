//! Packet layout definitions.
//!
//! A [`PacketLayout`] describes how the bytes of a binary packet map to
//! [`Channel`]s: byte 0 is the sync word, channels occupy non-overlapping byte
//! ranges after it, and an optional checksum trails the payload. The layout is
//! edited while no connection is running and then locked behind an `Arc` for
//! decoding.
//!
//! ```rust
//! use framewire::layout::PacketLayout;
//! use framewire::types::{ChecksumCodec, Color, FieldCodec};
//!
//! let mut layout = PacketLayout::new();
//! layout.insert_field(1, FieldCodec::Uint16LsbFirst, "Voltage", Color::default(), "V", 1.0, 1.0)?;
//! layout.insert_checksum(3, ChecksumCodec::Uint16LsbFirst)?;
//!
//! assert_eq!(layout.packet_size(), 5);
//! assert!(layout.is_full());
//! # Ok::<(), framewire::LayoutError>(())
//! ```

pub mod csv;
pub mod settings;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LayoutError;
use crate::types::{Channel, ChecksumCodec, Color, FieldCodec, valid_conversion};

/// Default sync word marking the start of every binary packet.
pub const DEFAULT_SYNC_WORD: u8 = 0xAA;

/// Position and algorithm of a packet checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Byte offset of the checksum field
    pub offset: usize,
    /// Algorithm used to validate the payload
    pub codec: ChecksumCodec,
}

impl Checksum {
    /// First byte after the checksum field.
    pub fn end(&self) -> usize {
        self.offset + self.codec.width()
    }
}

/// Field placement model for binary packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketLayout {
    sync_word: u8,
    #[serde(default = "default_sync_word_byte_count")]
    sync_word_byte_count: usize,
    channels: Vec<Channel>,
    checksum: Option<Checksum>,
    packet_size: usize,
}

fn default_sync_word_byte_count() -> usize {
    1
}

impl Default for PacketLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketLayout {
    /// An empty layout: only the sync word, `packet_size == 1`.
    pub fn new() -> Self {
        Self {
            sync_word: DEFAULT_SYNC_WORD,
            sync_word_byte_count: default_sync_word_byte_count(),
            channels: Vec::new(),
            checksum: None,
            packet_size: 1,
        }
    }

    pub fn sync_word(&self) -> u8 {
        self.sync_word
    }

    pub fn set_sync_word(&mut self, sync_word: u8) {
        self.sync_word = sync_word;
    }

    /// Sync word bytes per packet; 0 means fixed-size framing without resynchronization.
    pub fn sync_word_byte_count(&self) -> usize {
        self.sync_word_byte_count
    }

    pub fn set_sync_word_byte_count(&mut self, count: usize) -> Result<(), LayoutError> {
        if count > 1 {
            return Err(LayoutError::SyncWordByteCount { count });
        }
        self.sync_word_byte_count = count;
        Ok(())
    }

    /// Total bytes per packet, including sync word and checksum.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Channels ordered by location. Index `i` owns sample series `i`.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// The channel starting exactly at `offset`.
    pub fn channel_at(&self, offset: usize) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.location == offset)
    }

    pub fn checksum(&self) -> Option<Checksum> {
        self.checksum
    }

    /// Add a field at `offset`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_field(
        &mut self,
        offset: usize,
        codec: FieldCodec,
        name: impl Into<String>,
        color: Color,
        unit: impl Into<String>,
        conversion_factor_a: f32,
        conversion_factor_b: f32,
    ) -> Result<(), LayoutError> {
        self.insert_channel(Channel {
            location: offset,
            codec: Some(codec),
            name: name.into(),
            color,
            unit: unit.into(),
            conversion_factor_a,
            conversion_factor_b,
        })
    }

    /// Add a fully described channel. The channel must carry a codec.
    pub fn insert_channel(&mut self, channel: Channel) -> Result<(), LayoutError> {
        let offset = channel.location;
        if offset == 0 {
            return Err(LayoutError::SyncWordReserved);
        }
        if self.is_full() {
            return Err(LayoutError::LayoutFull);
        }
        if channel.codec.is_none() {
            return Err(LayoutError::MissingCodec { offset });
        }
        if !valid_conversion(channel.conversion_factor_a, channel.conversion_factor_b) {
            return Err(LayoutError::InvalidConversion {
                a: channel.conversion_factor_a,
                b: channel.conversion_factor_b,
            });
        }

        let end = channel.end();
        if let Some(checksum) = self.checksum
            && end >= checksum.offset
        {
            return Err(LayoutError::OverlapsChecksum { offset, checksum_offset: checksum.offset });
        }
        if let Some(existing) = self.channels.iter().find(|existing| existing.overlaps(offset, end)) {
            return Err(LayoutError::OverlapsField { offset, existing: existing.location });
        }

        debug!("Inserting field '{}' at offset {} ({} bytes)", channel.name, offset, channel.width());

        self.packet_size = self.packet_size.max(end + 1);
        let index = self.channels.partition_point(|existing| existing.location < offset);
        self.channels.insert(index, channel);
        Ok(())
    }

    /// Remove the field starting at `offset`.
    pub fn remove_field(&mut self, offset: usize) -> Result<Channel, LayoutError> {
        if offset == 0 {
            return Err(LayoutError::SyncWordReserved);
        }
        let index = self
            .channels
            .iter()
            .position(|channel| channel.location == offset)
            .ok_or(LayoutError::NoFieldAt { offset })?;

        let removed = self.channels.remove(index);
        if self.checksum.is_none() {
            self.packet_size = self.size_from_channels();
        }
        debug!("Removed field '{}' at offset {}", removed.name, offset);
        Ok(removed)
    }

    /// Place a checksum at `offset`, after every field.
    pub fn insert_checksum(&mut self, offset: usize, codec: ChecksumCodec) -> Result<(), LayoutError> {
        if self.checksum.is_some() {
            return Err(LayoutError::ChecksumPresent);
        }
        if offset == 0 {
            return Err(LayoutError::SyncWordReserved);
        }
        if offset < self.packet_size {
            return Err(LayoutError::ChecksumBeforeFields { offset, packet_size: self.packet_size });
        }
        let width = codec.width();
        if (offset - 1) % width != 0 {
            return Err(LayoutError::ChecksumMisaligned { offset, width });
        }

        let checksum = Checksum { offset, codec };
        self.packet_size = checksum.end();
        self.checksum = Some(checksum);
        debug!("Inserted {} checksum at offset {}", codec, offset);
        Ok(())
    }

    /// Remove the checksum; the packet shrinks back to its last field.
    pub fn remove_checksum(&mut self) -> Result<Checksum, LayoutError> {
        let removed = self.checksum.take().ok_or(LayoutError::ChecksumAbsent)?;
        self.packet_size = self.size_from_channels();
        Ok(removed)
    }

    /// Whether no further field can be inserted.
    ///
    /// Only a layout with a checksum can be full: without one, fields can always
    /// be appended after the last byte.
    pub fn is_full(&self) -> bool {
        let Some(checksum) = self.checksum else {
            return false;
        };
        self.occupancy(checksum.offset).iter().skip(1).all(|&used| used)
    }

    /// The first offset a new field could start at.
    pub fn first_available_offset(&self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        if self.channels.is_empty() {
            return Some(1);
        }

        let limit = self.checksum.map_or(self.packet_size, |checksum| checksum.offset);
        let occupied = self.occupancy(limit);
        let gap = occupied.iter().enumerate().skip(1).find(|(_, used)| !**used).map(|(i, _)| i);
        Some(gap.unwrap_or(self.packet_size))
    }

    /// Remove every field and the checksum.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.checksum = None;
        self.packet_size = 1;
    }

    /// Occupancy of bytes `0..limit`; byte 0 counts as used by the sync word.
    fn occupancy(&self, limit: usize) -> Vec<bool> {
        let mut used = vec![false; limit];
        if let Some(first) = used.first_mut() {
            *first = true;
        }
        for channel in &self.channels {
            for byte in channel.location..=channel.end() {
                if let Some(slot) = used.get_mut(byte) {
                    *slot = true;
                }
            }
        }
        used
    }

    fn size_from_channels(&self) -> usize {
        self.channels.iter().map(|channel| channel.end() + 1).max().unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn add(layout: &mut PacketLayout, offset: usize, codec: FieldCodec) -> Result<(), LayoutError> {
        layout.insert_field(offset, codec, format!("f{offset}"), Color::default(), "", 1.0, 1.0)
    }

    #[test]
    fn empty_layout() {
        let layout = PacketLayout::new();
        assert_eq!(layout.packet_size(), 1);
        assert_eq!(layout.sync_word(), 0xAA);
        assert_eq!(layout.first_available_offset(), Some(1));
        assert!(!layout.is_full());
    }

    #[test]
    fn rejects_sync_word_offset() {
        let mut layout = PacketLayout::new();
        assert_eq!(add(&mut layout, 0, FieldCodec::Uint8), Err(LayoutError::SyncWordReserved));
        assert_eq!(layout.remove_field(0), Err(LayoutError::SyncWordReserved));
        assert_eq!(
            layout.insert_checksum(0, ChecksumCodec::Uint16LsbFirst),
            Err(LayoutError::SyncWordReserved)
        );
    }

    #[test]
    fn rejects_each_overlap_case() {
        let mut layout = PacketLayout::new();
        add(&mut layout, 3, FieldCodec::Uint16LsbFirst).unwrap(); // bytes 3..=4

        // proposed end inside existing
        assert_eq!(
            add(&mut layout, 2, FieldCodec::Uint16LsbFirst),
            Err(LayoutError::OverlapsField { offset: 2, existing: 3 })
        );
        // proposed start inside existing
        assert_eq!(
            add(&mut layout, 4, FieldCodec::Uint8),
            Err(LayoutError::OverlapsField { offset: 4, existing: 3 })
        );
        // proposed range encompasses existing
        assert_eq!(
            add(&mut layout, 2, FieldCodec::Uint32LsbFirst),
            Err(LayoutError::OverlapsField { offset: 2, existing: 3 })
        );

        add(&mut layout, 1, FieldCodec::Uint16LsbFirst).unwrap();
        add(&mut layout, 5, FieldCodec::Uint8).unwrap();
        assert_eq!(layout.packet_size(), 6);
        let locations: Vec<_> = layout.channels().iter().map(|c| c.location).collect();
        assert_eq!(locations, vec![1, 3, 5]);
    }

    #[test]
    fn rejects_invalid_conversion() {
        let mut layout = PacketLayout::new();
        let result = layout.insert_field(1, FieldCodec::Uint8, "x", Color::default(), "", 0.0, 1.0);
        assert!(matches!(result, Err(LayoutError::InvalidConversion { .. })));
    }

    #[test]
    fn checksum_rules() {
        let mut layout = PacketLayout::new();
        add(&mut layout, 1, FieldCodec::Uint16LsbFirst).unwrap();

        assert_eq!(
            layout.insert_checksum(2, ChecksumCodec::Uint16LsbFirst),
            Err(LayoutError::ChecksumBeforeFields { offset: 2, packet_size: 3 })
        );
        assert_eq!(
            layout.insert_checksum(4, ChecksumCodec::Uint16LsbFirst),
            Err(LayoutError::ChecksumMisaligned { offset: 4, width: 2 })
        );
        layout.insert_checksum(5, ChecksumCodec::Uint16LsbFirst).unwrap();
        assert_eq!(layout.packet_size(), 7);
        assert_eq!(
            layout.insert_checksum(7, ChecksumCodec::Uint16LsbFirst),
            Err(LayoutError::ChecksumPresent)
        );

        // gap at 3..=4 remains
        assert!(!layout.is_full());
        assert_eq!(layout.first_available_offset(), Some(3));

        assert_eq!(
            add(&mut layout, 4, FieldCodec::Uint16LsbFirst),
            Err(LayoutError::OverlapsChecksum { offset: 4, checksum_offset: 5 })
        );
        add(&mut layout, 3, FieldCodec::Uint16LsbFirst).unwrap();
        assert!(layout.is_full());
        assert_eq!(layout.first_available_offset(), None);
        assert_eq!(add(&mut layout, 9, FieldCodec::Uint8), Err(LayoutError::LayoutFull));

        let removed = layout.remove_checksum().unwrap();
        assert_eq!(removed.offset, 5);
        assert_eq!(layout.packet_size(), 5);
        assert_eq!(layout.remove_checksum(), Err(LayoutError::ChecksumAbsent));
    }

    #[test]
    fn checksum_anchors_size_on_field_removal() {
        let mut layout = PacketLayout::new();
        add(&mut layout, 1, FieldCodec::Uint16LsbFirst).unwrap();
        add(&mut layout, 3, FieldCodec::Uint16LsbFirst).unwrap();
        layout.insert_checksum(5, ChecksumCodec::Uint16LsbFirst).unwrap();

        layout.remove_field(3).unwrap();
        assert_eq!(layout.packet_size(), 7);

        layout.remove_checksum().unwrap();
        assert_eq!(layout.packet_size(), 3);

        layout.remove_field(1).unwrap();
        assert_eq!(layout.packet_size(), 1);
        assert_eq!(layout.remove_field(1), Err(LayoutError::NoFieldAt { offset: 1 }));
    }

    #[test]
    fn checksum_right_after_the_sync_word_fills_the_layout() {
        let mut layout = PacketLayout::new();
        layout.insert_checksum(1, ChecksumCodec::Uint16LsbFirst).unwrap();
        assert!(layout.is_full());
        assert_eq!(layout.first_available_offset(), None);
        assert_eq!(layout.packet_size(), 3);
    }

    #[test]
    fn dense_layout_offers_the_next_byte() {
        let mut layout = PacketLayout::new();
        add(&mut layout, 1, FieldCodec::Uint32LsbFirst).unwrap();
        assert_eq!(layout.first_available_offset(), Some(5));

        add(&mut layout, 7, FieldCodec::Uint8).unwrap();
        assert_eq!(layout.first_available_offset(), Some(5));
    }

    #[test]
    fn clear_resets_everything() {
        let mut layout = PacketLayout::new();
        add(&mut layout, 1, FieldCodec::Float32LsbFirst).unwrap();
        layout.insert_checksum(5, ChecksumCodec::Uint16LsbFirst).unwrap();
        layout.clear();
        assert_eq!(layout, PacketLayout { sync_word: layout.sync_word(), ..PacketLayout::new() });
    }

    #[test]
    fn sync_word_byte_count_is_zero_or_one() {
        let mut layout = PacketLayout::new();
        assert_eq!(layout.sync_word_byte_count(), 1);
        layout.set_sync_word_byte_count(0).unwrap();
        assert_eq!(layout.sync_word_byte_count(), 0);
        assert_eq!(layout.set_sync_word_byte_count(2), Err(LayoutError::SyncWordByteCount { count: 2 }));
        assert_eq!(layout.sync_word_byte_count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize, FieldCodec),
        Remove(usize),
        InsertChecksum(usize),
        RemoveChecksum,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (1usize..24, prop::sample::select(FieldCodec::ALL.to_vec()))
                .prop_map(|(offset, codec)| Op::Insert(offset, codec)),
            2 => (1usize..24).prop_map(Op::Remove),
            1 => (1usize..32).prop_map(Op::InsertChecksum),
            1 => Just(Op::RemoveChecksum),
        ]
    }

    proptest! {
        #[test]
        fn prop_layout_invariants_hold(ops in prop::collection::vec(arb_op(), 0..64)) {
            let mut layout = PacketLayout::new();
            for op in ops {
                let _ = match op {
                    Op::Insert(offset, codec) => add(&mut layout, offset, codec),
                    Op::Remove(offset) => layout.remove_field(offset).map(|_| ()),
                    Op::InsertChecksum(offset) => {
                        layout.insert_checksum(offset, ChecksumCodec::Uint16LsbFirst)
                    }
                    Op::RemoveChecksum => layout.remove_checksum().map(|_| ()),
                };

                let channels = layout.channels();
                for (i, a) in channels.iter().enumerate() {
                    prop_assert!(a.location >= 1);
                    for b in &channels[i + 1..] {
                        prop_assert!(a.end() < b.location, "{:?} overlaps {:?}", a, b);
                    }
                }

                let field_end = channels.iter().map(|c| c.end() + 1).max().unwrap_or(1);
                match layout.checksum() {
                    Some(checksum) => {
                        prop_assert!(checksum.offset >= field_end);
                        prop_assert_eq!((checksum.offset - 1) % checksum.codec.width(), 0);
                        prop_assert_eq!(layout.packet_size(), checksum.end());
                    }
                    None => prop_assert_eq!(layout.packet_size(), field_end),
                }

                if let Some(offset) = layout.first_available_offset() {
                    prop_assert!(channels.iter().all(|c| !c.overlaps(offset, offset)));
                }
            }
        }
    }
}
