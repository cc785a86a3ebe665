//! Per-channel slot tables and the shared timestamp series

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::spill::SpillFile;
use super::{BLOCK_SIZE, BLOCKS_PER_SLOT, SLOT_SIZE, fold_range};
use crate::{Result, TelemetryError};

/// Sample values of one slot, stored as `f32` bit patterns.
pub(crate) type SlotValues = Arc<[AtomicU32]>;

/// Packed `(min, max)` per block of one slot.
type SlotRanges = Arc<[AtomicU64]>;

#[derive(Clone)]
struct SlotEntry {
    /// `None` once the slot has been spilled to disk
    values: Option<SlotValues>,
    ranges: SlotRanges,
}

impl SlotEntry {
    fn new() -> Self {
        Self {
            values: Some((0..SLOT_SIZE).map(|_| AtomicU32::new(0)).collect()),
            ranges: (0..BLOCKS_PER_SLOT).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

/// One channel's sample series.
pub(crate) struct Series {
    slots: RwLock<Vec<SlotEntry>>,
    spill: Option<SpillFile>,
}

impl Series {
    pub(crate) fn new(spill: Option<SpillFile>) -> Self {
        Self { slots: RwLock::new(Vec::new()), spill }
    }

    /// Allocate slots until `slot_count` exist.
    pub(crate) fn grow(&self, slot_count: usize) {
        if self.slots.read().len() >= slot_count {
            return;
        }
        let mut slots = self.slots.write();
        while slots.len() < slot_count {
            slots.push(SlotEntry::new());
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn entry(&self, slot: usize) -> Option<SlotEntry> {
        self.slots.read().get(slot).cloned()
    }

    /// Resident values and ranges of `slot`, which must have been allocated.
    fn writable(&self, slot: usize) -> Result<(SlotValues, SlotRanges)> {
        match self.entry(slot) {
            Some(SlotEntry { values: Some(values), ranges }) => Ok((values, ranges)),
            Some(_) => Err(not_writable(slot, "slot was already evicted")),
            None => Err(not_writable(slot, "slot was never allocated")),
        }
    }

    /// Write one finished block and its range.
    pub(crate) fn write_block(&self, block_start: u64, values: &[f32], range: (f32, f32)) -> Result<()> {
        let (slot, within) = split(block_start);
        let (slot_values, ranges) = self.writable(slot)?;
        for (cell, value) in slot_values[within..within + values.len()].iter().zip(values) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
        ranges[within / BLOCK_SIZE].store(pack(range), Ordering::Relaxed);
        Ok(())
    }

    /// Write one sample, folding it into its block range.
    pub(crate) fn write_sample(&self, index: u64, value: f32) -> Result<()> {
        let (slot, within) = split(index);
        let (slot_values, ranges) = self.writable(slot)?;
        slot_values[within].store(value.to_bits(), Ordering::Relaxed);

        let cell = &ranges[within / BLOCK_SIZE];
        let range = if within % BLOCK_SIZE == 0 {
            (value, value)
        } else {
            fold_range(unpack(cell.load(Ordering::Relaxed)), value)
        };
        cell.store(pack(range), Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn value_at(&self, index: u64) -> Result<Option<f32>> {
        let (slot, within) = split(index);
        let Some(entry) = self.entry(slot) else {
            return Ok(None);
        };
        match (&entry.values, &self.spill) {
            (Some(values), _) => Ok(Some(f32::from_bits(values[within].load(Ordering::Relaxed)))),
            (None, Some(spill)) => {
                let mut out = [0.0f32];
                spill.read(index, &mut out)?;
                Ok(Some(out[0]))
            }
            (None, None) => Ok(None),
        }
    }

    pub(crate) fn range_in_block(&self, block_start: u64) -> Option<(f32, f32)> {
        let (slot, within) = split(block_start);
        let entry = self.entry(slot)?;
        Some(unpack(entry.ranges[within / BLOCK_SIZE].load(Ordering::Relaxed)))
    }

    /// Append `[start, end)` to `out`, reading spilled slots from disk.
    pub(crate) fn read_into(&self, start: u64, end: u64, out: &mut Vec<f32>) -> Result<()> {
        let mut index = start;
        while index < end {
            let (slot, within) = split(index);
            let take = ((SLOT_SIZE - within) as u64).min(end - index) as usize;
            let Some(entry) = self.entry(slot) else {
                break;
            };
            match (&entry.values, &self.spill) {
                (Some(values), _) => out.extend(
                    values[within..within + take]
                        .iter()
                        .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed))),
                ),
                (None, Some(spill)) => {
                    let from = out.len();
                    out.resize(from + take, 0.0);
                    spill.read(index, &mut out[from..])?;
                }
                (None, None) => break,
            }
            index += take as u64;
        }
        Ok(())
    }

    /// Spill every resident slot below `slot_limit`. Returns how many were evicted.
    pub(crate) fn evict_below(&self, slot_limit: usize) -> Result<usize> {
        let Some(spill) = &self.spill else {
            return Ok(0);
        };

        let candidates: Vec<(usize, SlotValues)> = self
            .slots
            .read()
            .iter()
            .take(slot_limit)
            .enumerate()
            .filter_map(|(slot, entry)| entry.values.clone().map(|values| (slot, values)))
            .collect();

        for (slot, values) in &candidates {
            spill.write_slot(*slot, values)?;
            self.slots.write()[*slot].values = None;
        }
        Ok(candidates.len())
    }

    pub(crate) fn resident_slots(&self) -> usize {
        self.slots.read().iter().filter(|entry| entry.values.is_some()).count()
    }
}

/// Timestamps of one slot, in milliseconds since the Unix epoch.
type SlotStamps = Arc<[AtomicU64]>;

/// Timestamp series shared by every channel, evicted on the same slot
/// boundaries as the values.
pub(crate) struct Timestamps {
    /// `None` once the slot has been spilled to disk
    slots: RwLock<Vec<Option<SlotStamps>>>,
    spill: Option<SpillFile>,
}

impl Timestamps {
    pub(crate) fn new(spill: Option<SpillFile>) -> Self {
        Self { slots: RwLock::new(Vec::new()), spill }
    }

    pub(crate) fn grow(&self, slot_count: usize) {
        if self.slots.read().len() >= slot_count {
            return;
        }
        let mut slots = self.slots.write();
        while slots.len() < slot_count {
            slots.push(Some((0..SLOT_SIZE).map(|_| AtomicU64::new(0)).collect()));
        }
    }

    /// Stamp `[start, start + count)`.
    pub(crate) fn write_range(&self, start: u64, count: u64, stamp: u64) -> Result<()> {
        let mut index = start;
        let end = start + count;
        while index < end {
            let (slot, within) = split(index);
            let take = ((SLOT_SIZE - within) as u64).min(end - index) as usize;
            let stamps = match self.slots.read().get(slot) {
                Some(Some(stamps)) => Arc::clone(stamps),
                Some(None) => return Err(not_writable(slot, "timestamp slot was already evicted")),
                None => return Err(not_writable(slot, "timestamp slot was never allocated")),
            };
            for cell in &stamps[within..within + take] {
                cell.store(stamp, Ordering::Relaxed);
            }
            index += take as u64;
        }
        Ok(())
    }

    pub(crate) fn get(&self, index: u64) -> Result<Option<u64>> {
        let (slot, within) = split(index);
        let entry = match self.slots.read().get(slot) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        match (entry, &self.spill) {
            (Some(stamps), _) => Ok(Some(stamps[within].load(Ordering::Relaxed))),
            (None, Some(spill)) => spill.read_timestamp(index).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// Spill every resident slot below `slot_limit`. Returns how many were evicted.
    pub(crate) fn evict_below(&self, slot_limit: usize) -> Result<usize> {
        let Some(spill) = &self.spill else {
            return Ok(0);
        };

        let candidates: Vec<(usize, SlotStamps)> = self
            .slots
            .read()
            .iter()
            .take(slot_limit)
            .enumerate()
            .filter_map(|(slot, stamps)| stamps.clone().map(|stamps| (slot, stamps)))
            .collect();

        for (slot, stamps) in &candidates {
            spill.write_timestamp_slot(*slot, stamps)?;
            self.slots.write()[*slot] = None;
        }
        Ok(candidates.len())
    }

    pub(crate) fn resident_slots(&self) -> usize {
        self.slots.read().iter().filter(|stamps| stamps.is_some()).count()
    }
}

fn not_writable(slot: usize, details: &str) -> TelemetryError {
    TelemetryError::store_error(
        format!("writing slot {slot}"),
        std::io::Error::new(std::io::ErrorKind::NotFound, details.to_string()),
    )
}

fn split(index: u64) -> (usize, usize) {
    ((index / SLOT_SIZE as u64) as usize, (index % SLOT_SIZE as u64) as usize)
}

fn pack((min, max): (f32, f32)) -> u64 {
    ((min.to_bits() as u64) << 32) | max.to_bits() as u64
}

fn unpack(bits: u64) -> (f32, f32) {
    (f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}
