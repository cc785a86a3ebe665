//! Resynchronizing byte-stream framer.
//!
//! The framer turns an unbounded byte stream into fixed-size packets aligned on
//! a sync word. It is split into two halves sharing one bounded buffer:
//!
//! - [`FramerWriter`] is the producer side, handed to whatever owns the
//!   transport. It is `Clone + Send`. [`write`](FramerWriter::write) never
//!   blocks and fails with [`TelemetryError::Buffer`] when the backlog would
//!   exceed the cap; [`write_async`](FramerWriter::write_async) waits for the
//!   consumer to make room instead.
//! - [`Framer`] is the consumer side, owned by the decode thread. It moves
//!   buffered bytes into a private staging area and hands out
//!   [`PacketsBuffer`] views into it.
//!
//! ```rust
//! use framewire::config::FramerConfig;
//! use framewire::framer::Framer;
//!
//! let (writer, mut framer) = Framer::new(&FramerConfig::default());
//! framer.set_packet_size(3);
//!
//! writer.write(&[0x01, 0x02, 0xAA, 0x10, 0x20, 0xAA, 0x11])?;
//! let packets = framer.read_packets(0xAA, 1);
//! assert_eq!(packets.count(), 1);
//! assert_eq!(packets.packet(0), Some(&[0xAA, 0x10, 0x20][..]));
//! assert_eq!(framer.dropped_bytes(), 2);
//! # Ok::<(), framewire::TelemetryError>(())
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::config::FramerConfig;
use crate::types::PacketsBuffer;
use crate::{Result, TelemetryError};

#[derive(Debug, Default)]
struct State {
    buffer: Vec<u8>,
    /// Bytes the consumer has staged but not yet released
    staged: usize,
    closed: bool,
    consumer_dropped: bool,
}

impl State {
    fn backlog(&self) -> usize {
        self.buffer.len() + self.staged
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    data_ready: Condvar,
    space_available: Notify,
    max_buffered_bytes: usize,
}

/// Producer half of the framer.
#[derive(Debug, Clone)]
pub struct FramerWriter {
    shared: Arc<Shared>,
}

impl FramerWriter {
    /// Append bytes received from the transport without waiting.
    ///
    /// Fails with [`TelemetryError::Buffer`] if the unconsumed backlog would
    /// exceed the configured cap, and with [`TelemetryError::Closed`] after
    /// [`close`](Self::close) or once the consumer is gone.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;

        let buffered = state.backlog() + bytes.len();
        if buffered > self.shared.max_buffered_bytes {
            return Err(TelemetryError::buffer_overflow(
                format!(
                    "framer backlog of {buffered} bytes exceeds the {} byte cap",
                    self.shared.max_buffered_bytes
                ),
                state.backlog(),
            ));
        }

        state.buffer.extend_from_slice(bytes);
        drop(state);
        self.shared.data_ready.notify_one();
        Ok(())
    }

    /// Append bytes, waiting for the consumer whenever the backlog is at the cap.
    ///
    /// Bytes are appended as space frees up, so a chunk larger than the cap
    /// still goes through. Fails with [`TelemetryError::Closed`] after
    /// [`close`](Self::close) or once the consumer is gone.
    pub async fn write_async(&self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let notified = self.shared.space_available.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            let written = {
                let mut state = self.shared.state.lock();
                Self::check_open(&state)?;
                let room = self.shared.max_buffered_bytes.saturating_sub(state.backlog());
                let take = room.min(bytes.len());
                state.buffer.extend_from_slice(&bytes[..take]);
                take
            };

            if written > 0 {
                self.shared.data_ready.notify_one();
                bytes = &bytes[written..];
            } else {
                trace!(pending = bytes.len(), "Framer backlog at cap, waiting for the consumer");
                notified.await;
            }
        }
        Ok(())
    }

    fn check_open(state: &State) -> Result<()> {
        if state.closed || state.consumer_dropped {
            return Err(TelemetryError::Closed);
        }
        Ok(())
    }

    /// Mark the end of the stream and wake the consumer.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            debug!(pending = state.buffer.len(), "Framer closed by producer");
        }
        drop(state);
        self.shared.data_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

/// Consumer half of the framer.
#[derive(Debug)]
pub struct Framer {
    shared: Arc<Shared>,
    staged: Vec<u8>,
    released: usize,
    packet_size: usize,
    dropped_bytes: u64,
}

impl Framer {
    /// Create a connected writer/framer pair.
    pub fn new(config: &FramerConfig) -> (FramerWriter, Framer) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            data_ready: Condvar::new(),
            space_available: Notify::new(),
            max_buffered_bytes: config.max_buffered_bytes,
        });
        let writer = FramerWriter { shared: Arc::clone(&shared) };
        let framer = Framer { shared, staged: Vec::new(), released: 0, packet_size: 0, dropped_bytes: 0 };
        (writer, framer)
    }

    /// Set the packet size, normally once the layout is finalized.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.packet_size = packet_size;
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Bytes discarded while searching for a sync word.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Bytes written but not yet handed out as packets or lines.
    pub fn buffered_bytes(&self) -> usize {
        self.shared.state.lock().buffer.len() + self.staged.len() - self.released
    }

    /// Whether the producer closed the stream.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Whether the stream is closed and every written byte has been staged.
    ///
    /// Once this is true no further packets can arrive beyond what
    /// [`read_packets`](Self::read_packets) returns on its next call.
    pub fn is_exhausted(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed && state.buffer.is_empty()
    }

    /// Block until bytes are available, the stream closes, or `timeout` elapses.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if state.buffer.is_empty() && !state.closed {
            let _ = self.shared.data_ready.wait_for(&mut state, timeout);
        }
        !state.buffer.is_empty() || state.closed
    }

    /// Return the maximal run of complete packets each starting with `sync_word`.
    ///
    /// Bytes before the first sync word are discarded and counted in
    /// [`dropped_bytes`](Self::dropped_bytes). An incomplete trailing packet
    /// stays buffered. With `sync_word_byte_count == 0` no resynchronization
    /// happens and every complete `packet_size` chunk is returned.
    ///
    /// The packets are released by the next call.
    pub fn read_packets(&mut self, sync_word: u8, sync_word_byte_count: usize) -> PacketsBuffer<'_> {
        self.release();
        self.stage();

        let packet_size = self.packet_size;
        if packet_size == 0 {
            return PacketsBuffer::empty();
        }

        if sync_word_byte_count == 0 {
            let count = self.staged.len() / packet_size;
            self.released = count * packet_size;
            return PacketsBuffer::new(&self.staged, 0, count, packet_size);
        }

        self.resync(sync_word);

        let mut end = 0;
        while end + packet_size <= self.staged.len() && self.staged[end] == sync_word {
            end += packet_size;
        }

        let count = end / packet_size;
        if count > 0 {
            trace!(count, packet_size, "Framed packets");
        }
        self.released = end;
        PacketsBuffer::new(&self.staged, 0, count, packet_size)
    }

    /// Return the next `\n`-terminated line with any trailing `\r` removed.
    ///
    /// Returns `Ok(None)` if no full line arrives within `timeout`, or once the
    /// stream is closed and drained; [`is_exhausted`](Self::is_exhausted) tells
    /// the two apart. A final unterminated line is returned when the stream
    /// closes.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.release();
        let deadline = Instant::now() + timeout;

        loop {
            self.stage();
            if let Some(newline) = self.staged.iter().position(|&byte| byte == b'\n') {
                return Ok(Some(self.take_line(newline, newline + 1)));
            }

            if self.staged.len() >= self.shared.max_buffered_bytes {
                let buffered = self.staged.len();
                self.staged.clear();
                self.publish_staged();
                return Err(TelemetryError::buffer_overflow(
                    format!("line of {buffered} bytes has no terminator"),
                    buffered,
                ));
            }

            let mut state = self.shared.state.lock();
            if !state.buffer.is_empty() {
                continue;
            }
            if state.closed {
                drop(state);
                if self.staged.is_empty() {
                    return Ok(None);
                }
                let len = self.staged.len();
                return Ok(Some(self.take_line(len, len)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = self.shared.data_ready.wait_for(&mut state, deadline - now);
        }
    }

    fn take_line(&mut self, end: usize, consumed: usize) -> String {
        let line = self.staged[..end].strip_suffix(b"\r").unwrap_or(&self.staged[..end]);
        let line = String::from_utf8_lossy(line).into_owned();
        self.staged.drain(..consumed);
        self.publish_staged();
        line
    }

    fn release(&mut self) {
        if self.released > 0 {
            self.staged.drain(..self.released);
            self.released = 0;
            self.publish_staged();
        }
    }

    fn stage(&mut self) {
        let mut state = self.shared.state.lock();
        if self.staged.is_empty() {
            std::mem::swap(&mut self.staged, &mut state.buffer);
        } else {
            self.staged.append(&mut state.buffer);
        }
        state.staged = self.staged.len();
    }

    /// Record the staged byte count after consuming bytes and wake a waiting producer.
    fn publish_staged(&self) {
        self.shared.state.lock().staged = self.staged.len();
        self.shared.space_available.notify_waiters();
    }

    fn resync(&mut self, sync_word: u8) {
        if self.staged.first() == Some(&sync_word) {
            return;
        }
        let skip = self.staged.iter().position(|&byte| byte == sync_word).unwrap_or(self.staged.len());
        if skip > 0 {
            trace!(skip, "Discarding bytes before sync word");
            self.dropped_bytes += skip as u64;
            self.staged.drain(..skip);
            self.publish_staged();
        }
    }
}

impl Drop for Framer {
    fn drop(&mut self) {
        self.shared.state.lock().consumer_dropped = true;
        self.shared.space_available.notify_waiters();
    }
}
