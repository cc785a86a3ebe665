//! Disk eviction for aged-out slots

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::SLOT_SIZE;
use crate::{Result, TelemetryError};

/// When and where slots are moved out of memory.
///
/// Without a spill directory every sample stays resident. With one, slots
/// older than the newest `resident_slots` are written to a per-channel spill
/// file and their memory is released. Block min/max ranges always stay resident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Directory that receives spill files, `None` disables eviction
    pub spill_dir: Option<PathBuf>,
    /// Number of most recent slots kept in memory
    pub resident_slots: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self { spill_dir: None, resident_slots: 16 }
    }
}

impl EvictionPolicy {
    /// Keep everything in memory.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Spill to `dir`, keeping the newest `resident_slots` slots in memory.
    pub fn spill_to(dir: impl Into<PathBuf>, resident_slots: usize) -> Self {
        Self { spill_dir: Some(dir.into()), resident_slots }
    }

    pub fn is_enabled(&self) -> bool {
        self.spill_dir.is_some()
    }
}

/// Backing file for one series' evicted slots.
///
/// Sample `i` lives at byte offset `i * width` in little-endian order, so slot
/// `k` starts at `k * SLOT_SIZE * width`. Channel files hold `f32` values
/// (width 4), the timestamp file holds `u64` milliseconds (width 8).
/// The file is removed when dropped.
#[derive(Debug)]
pub(crate) struct SpillFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl SpillFile {
    /// Spill file for the values of `channel`.
    pub(crate) fn for_channel(dir: &Path, channel: usize) -> Result<Self> {
        Self::create(dir.join(format!("channel-{channel}.spill")))
    }

    /// Spill file for the timestamp series.
    pub(crate) fn for_timestamps(dir: &Path) -> Result<Self> {
        Self::create(dir.join("timestamps.spill"))
    }

    fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| TelemetryError::file_error(path.clone(), e))?;
        debug!(path = %path.display(), "Created spill file");
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Write a whole slot of `f32` bit patterns.
    pub(crate) fn write_slot(&self, slot: usize, values: &[AtomicU32]) -> Result<()> {
        let bytes: Vec<u8> =
            values.iter().flat_map(|value| value.load(Ordering::Relaxed).to_le_bytes()).collect();
        self.write_at(slot, 4, &bytes)
    }

    /// Write a whole slot of timestamps.
    pub(crate) fn write_timestamp_slot(&self, slot: usize, stamps: &[AtomicU64]) -> Result<()> {
        let bytes: Vec<u8> =
            stamps.iter().flat_map(|stamp| stamp.load(Ordering::Relaxed).to_le_bytes()).collect();
        self.write_at(slot, 8, &bytes)
    }

    /// Read `out.len()` consecutive samples starting at absolute index `start`.
    pub(crate) fn read(&self, start: u64, out: &mut [f32]) -> Result<()> {
        let mut bytes = vec![0u8; out.len() * 4];
        self.read_at(start, 4, &mut bytes)?;
        for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    /// Read the timestamp at absolute index `index`.
    pub(crate) fn read_timestamp(&self, index: u64) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_at(index, 8, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn write_at(&self, slot: usize, width: usize, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((slot * SLOT_SIZE * width) as u64))
            .and_then(|_| file.write_all(bytes))
            .map_err(|e| {
                TelemetryError::store_error(format!("writing slot {slot} to {}", self.path.display()), e)
            })
    }

    fn read_at(&self, index: u64, width: usize, bytes: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(index * width as u64))
            .and_then(|_| file.read_exact(bytes))
            .map_err(|e| {
                TelemetryError::store_error(format!("reading sample {index} from {}", self.path.display()), e)
            })
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove spill file");
        }
    }
}
