//! Transport trait for byte sources

use crate::Result;

/// Trait for byte-stream sources feeding the framer
///
/// Transports abstract over where telemetry bytes come from (a recorded file,
/// a serial port or socket opened by the caller) and handle their own pacing.
/// Opening and configuring the underlying device is the caller's job; a
/// transport only reads.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Read the next chunk of bytes
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - Bytes received (never empty)
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Read failed; the pump may retry
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Human readable description used in logs and disconnect reasons
    fn describe(&self) -> String;
}
