//! Replay of recorded byte streams

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, info};

use crate::transport::Transport;
use crate::{Result, TelemetryError};

/// Default read size for replayed files.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Transport that replays a recorded capture file.
///
/// Without pacing the file is read as fast as the pipeline accepts it; with
/// [`with_rate`](Self::with_rate) chunks are released on a schedule that
/// matches the original link speed.
pub struct FileReplay {
    path: PathBuf,
    file: File,
    chunk_size: usize,
    bytes_per_second: Option<u64>,
    started: Option<Instant>,
    bytes_read: u64,
}

impl FileReplay {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| TelemetryError::file_error(path.clone(), e))?;
        info!(path = %path.display(), "Opened capture for replay");
        Ok(Self { path, file, chunk_size: DEFAULT_CHUNK_SIZE, bytes_per_second: None, started: None, bytes_read: 0 })
    }

    /// Bytes read per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pace replay at `bytes_per_second`, 0 disables pacing.
    pub fn with_rate(mut self, bytes_per_second: u64) -> Self {
        self.bytes_per_second = (bytes_per_second > 0).then_some(bytes_per_second);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[async_trait::async_trait]
impl Transport for FileReplay {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(rate) = self.bytes_per_second {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::from_secs_f64(self.bytes_read as f64 / rate as f64);
            sleep_until(due).await;
        }

        let mut chunk = vec![0u8; self.chunk_size];
        let read = self
            .file
            .read(&mut chunk)
            .await
            .map_err(|e| TelemetryError::file_error(self.path.clone(), e))?;

        if read == 0 {
            debug!(path = %self.path.display(), bytes = self.bytes_read, "Replay reached end of file");
            return Ok(None);
        }

        chunk.truncate(read);
        self.bytes_read += read as u64;
        Ok(Some(chunk))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
