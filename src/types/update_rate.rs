//! Progress update rate control

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often progress snapshots are delivered to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every commit of the decoder (one per dispatched batch)
    Native,

    /// At most this many snapshots per second, latest wins
    Max(u32),
}

impl UpdateRate {
    /// Coalescing interval, or `None` when every snapshot is delivered.
    ///
    /// `Max(0)` is treated as `Native`.
    pub fn interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

/// Snapshot of decoder progress published after every commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Samples committed to every channel
    pub sample_count: u64,
    /// Packets dropped because their checksum did not match
    pub checksum_failures: u64,
    /// CSV lines dropped because they failed to parse
    pub malformed_lines: u64,
    /// Bytes discarded while resynchronizing on the sync word
    pub dropped_bytes: u64,
}
