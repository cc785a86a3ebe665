//! Views over framed packets

/// A transient view of validated, contiguous, fixed-stride packets.
///
/// Produced by [`Framer::read_packets`](crate::framer::Framer::read_packets).
/// Every packet in the view is complete and, when framing with a sync word,
/// starts with it. `count` decreases and `offset` advances as packets are
/// consumed.
#[derive(Debug, Clone, Copy)]
pub struct PacketsBuffer<'a> {
    buffer: &'a [u8],
    offset: usize,
    count: usize,
    packet_size: usize,
}

impl<'a> PacketsBuffer<'a> {
    /// Create a view over `count` packets of `packet_size` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the packets do not fit inside `buffer`.
    pub fn new(buffer: &'a [u8], offset: usize, count: usize, packet_size: usize) -> Self {
        assert!(
            offset + count * packet_size <= buffer.len(),
            "PacketsBuffer range exceeds backing buffer"
        );
        Self { buffer, offset, count, packet_size }
    }

    /// An empty view.
    pub fn empty() -> Self {
        Self { buffer: &[], offset: 0, count: 0, packet_size: 0 }
    }

    /// Backing buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Offset of the first unconsumed packet.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unconsumed packets.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The `index`-th unconsumed packet.
    pub fn packet(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.count {
            return None;
        }
        let start = self.offset + index * self.packet_size;
        Some(&self.buffer[start..start + self.packet_size])
    }

    /// Bytes of the next `count` packets, contiguous.
    pub fn bytes(&self, count: usize) -> &'a [u8] {
        let count = count.min(self.count);
        &self.buffer[self.offset..self.offset + count * self.packet_size]
    }

    /// Mark `count` packets as consumed.
    pub fn advance(&mut self, count: usize) {
        let count = count.min(self.count);
        self.offset += count * self.packet_size;
        self.count -= count;
    }

    /// Take the next packet and advance past it.
    pub fn next_packet(&mut self) -> Option<&'a [u8]> {
        let packet = self.packet(0)?;
        self.advance(1);
        Some(packet)
    }
}
