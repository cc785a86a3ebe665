//! Transport over an already opened async stream

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::transport::Transport;
use crate::{Result, TelemetryError};

/// Reads from any `AsyncRead` the caller has opened (TCP socket, serial port,
/// pipe).
pub struct StreamTransport<R> {
    reader: R,
    label: String,
    buffer_size: usize,
}

impl<R> StreamTransport<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self { reader, label: label.into(), buffer_size: 16 * 1024 }
    }

    /// Maximum bytes returned per chunk.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait::async_trait]
impl<R> Transport for StreamTransport<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; self.buffer_size];
        let read = self.reader.read(&mut chunk).await.map_err(|e| {
            TelemetryError::transport_failed_with_source(format!("read from {}", self.label), Box::new(e))
        })?;
        if read == 0 {
            return Ok(None);
        }
        chunk.truncate(read);
        Ok(Some(chunk))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
