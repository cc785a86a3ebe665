//! Block-structured sample storage.
//!
//! Every channel owns one series of `f32` samples; all series advance together,
//! one sample per accepted packet. Series are organised into blocks of
//! [`BLOCK_SIZE`] samples, the unit of parallel dispatch and of the min/max
//! ranges used for rendering, grouped into slots of [`SLOT_SIZE`] samples, the
//! unit of allocation and of disk eviction.
//!
//! ## Publication
//!
//! Sample values are written with relaxed atomics by whichever thread owns
//! their index range. The decoder then publishes the new count with
//! [`Ordering::Release`]; readers load it with [`Ordering::Acquire`] and only
//! read below it, so a reader never observes a count ahead of committed data.
//!
//! ```rust
//! use framewire::config::StoreConfig;
//! use framewire::store::SampleStore;
//!
//! let store = SampleStore::new(2, &StoreConfig::default())?;
//! assert_eq!(store.sample_count(), 0);
//! assert_eq!(store.value_at(0, 0)?, None);
//! # Ok::<(), framewire::TelemetryError>(())
//! ```

mod slot;
mod spill;

pub use spill::EvictionPolicy;

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::config::StoreConfig;
use crate::{Result, TelemetryError};
use slot::{Series, Timestamps};
use spill::SpillFile;

/// Samples per block.
pub const BLOCK_SIZE: usize = 1024;

/// Samples per slot.
pub const SLOT_SIZE: usize = 65536;

/// Blocks per slot.
pub const BLOCKS_PER_SLOT: usize = SLOT_SIZE / BLOCK_SIZE;

/// Fold one value into a `(min, max)` range.
///
/// Shared by the serial and parallel decode paths so both produce identical ranges.
#[inline]
pub fn fold_range((min, max): (f32, f32), value: f32) -> (f32, f32) {
    (min.min(value), max.max(value))
}

/// Per-channel time-series storage shared between the decoder and readers.
pub struct SampleStore {
    series: Vec<Series>,
    timestamps: Timestamps,
    committed: AtomicU64,
    last_timestamp: AtomicU64,
    max_samples: u64,
    eviction: EvictionPolicy,
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("channels", &self.series.len())
            .field("sample_count", &self.sample_count())
            .field("max_samples", &self.max_samples)
            .field("eviction", &self.eviction)
            .finish()
    }
}

impl SampleStore {
    /// Create an empty store for `channel_count` channels.
    ///
    /// With eviction enabled one spill file per channel is created in the
    /// spill directory.
    pub fn new(channel_count: usize, config: &StoreConfig) -> Result<Self> {
        let series = (0..channel_count)
            .map(|channel| {
                let spill = match &config.eviction.spill_dir {
                    Some(dir) => Some(SpillFile::for_channel(dir, channel)?),
                    None => None,
                };
                Ok(Series::new(spill))
            })
            .collect::<Result<Vec<_>>>()?;

        let timestamp_spill = match &config.eviction.spill_dir {
            Some(dir) => Some(SpillFile::for_timestamps(dir)?),
            None => None,
        };

        debug!(
            channels = channel_count,
            max_samples = config.max_samples,
            eviction = config.eviction.is_enabled(),
            "Created sample store"
        );

        Ok(Self {
            series,
            timestamps: Timestamps::new(timestamp_spill),
            committed: AtomicU64::new(0),
            last_timestamp: AtomicU64::new(0),
            max_samples: config.max_samples,
            eviction: config.eviction.clone(),
        })
    }

    pub fn channel_count(&self) -> usize {
        self.series.len()
    }

    /// Number of committed samples per channel.
    pub fn sample_count(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    pub fn max_samples(&self) -> u64 {
        self.max_samples
    }

    /// Wall-clock time (ms since the Unix epoch) of the sample at `index`.
    ///
    /// Reads from the timestamp spill file if the slot has been evicted.
    pub fn timestamp(&self, index: u64) -> Result<Option<u64>> {
        if index >= self.sample_count() {
            return Ok(None);
        }
        self.timestamps.get(index)
    }

    /// Committed value of `channel` at `index`.
    ///
    /// Reads from the spill file if the slot has been evicted.
    pub fn value_at(&self, channel: usize, index: u64) -> Result<Option<f32>> {
        match self.series.get(channel) {
            Some(series) if index < self.sample_count() => series.value_at(index),
            _ => Ok(None),
        }
    }

    /// `(min, max)` of the block containing `block_start`.
    ///
    /// A partially filled block reports the range of its committed samples so far.
    pub fn range_in_block(&self, channel: usize, block_start: u64) -> Option<(f32, f32)> {
        let block_start = block_start - block_start % BLOCK_SIZE as u64;
        if block_start >= self.sample_count() {
            return None;
        }
        self.series.get(channel)?.range_in_block(block_start)
    }

    /// Committed values of `channel` within `range`, clamped to the sample count.
    pub fn values(&self, channel: usize, range: Range<u64>) -> Result<Vec<f32>> {
        let end = range.end.min(self.sample_count());
        let mut out = Vec::with_capacity(end.saturating_sub(range.start) as usize);
        if let Some(series) = self.series.get(channel)
            && range.start < end
        {
            series.read_into(range.start, end, &mut out)?;
        }
        Ok(out)
    }

    /// Slots of `channel` currently held in memory.
    pub fn resident_slots(&self, channel: usize) -> usize {
        self.series.get(channel).map_or(0, Series::resident_slots)
    }

    /// Make room for samples up to (excluding) `end`.
    ///
    /// Fails with [`TelemetryError::SampleLimit`] when `end` exceeds the
    /// configured maximum.
    pub(crate) fn prepare(&self, end: u64) -> Result<()> {
        if end > self.max_samples {
            return Err(TelemetryError::SampleLimit { limit: self.max_samples });
        }

        let slot_count = end.div_ceil(SLOT_SIZE as u64) as usize;
        for series in &self.series {
            series.grow(slot_count);
        }
        self.timestamps.grow(slot_count);
        Ok(())
    }

    /// Write one finished block of `channel`.
    pub(crate) fn write_block(
        &self,
        channel: usize,
        block_start: u64,
        values: &[f32],
        range: (f32, f32),
    ) -> Result<()> {
        self.series[channel].write_block(block_start, values, range)
    }

    /// Write one sample of `channel`, folding it into its block range.
    pub(crate) fn write_sample(&self, channel: usize, index: u64, value: f32) -> Result<()> {
        self.series[channel].write_sample(index, value)
    }

    /// Stamp `[start, start + count)` with `now_ms`, never going backwards.
    pub(crate) fn write_timestamps(&self, start: u64, count: u64, now_ms: u64) -> Result<()> {
        let stamp = now_ms.max(self.last_timestamp.load(Ordering::Relaxed));
        self.last_timestamp.store(stamp, Ordering::Relaxed);
        self.timestamps.write_range(start, count, stamp)
    }

    /// Publish `count` samples to readers.
    pub(crate) fn commit(&self, count: u64) {
        self.committed.store(count, Ordering::Release);
    }

    /// Spill value and timestamp slots that fell out of the resident window.
    pub(crate) fn evict(&self) -> Result<usize> {
        if !self.eviction.is_enabled() {
            return Ok(0);
        }
        let current_slot = (self.sample_count() / SLOT_SIZE as u64) as usize;
        let Some(limit) = current_slot.checked_sub(self.eviction.resident_slots.saturating_sub(1)) else {
            return Ok(0);
        };

        let mut evicted = self.timestamps.evict_below(limit)?;
        for series in &self.series {
            evicted += series.evict_below(limit)?;
        }
        if evicted > 0 {
            debug!(evicted, below_slot = limit, "Evicted slots to disk");
        }
        Ok(evicted)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_millis() as u64)
}
