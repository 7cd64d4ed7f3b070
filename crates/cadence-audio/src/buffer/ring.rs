//! Fixed-capacity byte ring for interleaved PCM.
//!
//! The ring itself is not synchronized; [`crate::AudioRingBuffer`] keeps it
//! behind the same lock as the queued-frame counter so producer and consumer
//! always agree on both.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

/// Wraparound byte storage with separate read and write cursors.
pub struct ByteRing {
    /// The underlying storage, zeroed at allocation.
    buffer: Box<[u8]>,
    /// Index of the oldest unread byte.
    read_pos: usize,
    /// Number of unread bytes.
    len: usize,
}

impl ByteRing {
    /// Allocate a zeroed ring of exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            len: 0,
        }
    }

    /// Get the ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Get the number of bytes available for reading.
    pub const fn available(&self) -> usize {
        self.len
    }

    /// Get the number of free bytes for writing.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    fn write_pos(&self) -> usize {
        if self.capacity() == 0 {
            0
        } else {
            (self.read_pos + self.len) % self.capacity()
        }
    }

    /// Write bytes at the write cursor, wrapping at the end of storage.
    ///
    /// Returns the number of bytes actually written.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let to_write = bytes.len().min(self.free());
        if to_write == 0 {
            return 0;
        }

        let start = self.write_pos();
        let first_chunk = to_write.min(self.capacity() - start);
        self.buffer[start..start + first_chunk].copy_from_slice(&bytes[..first_chunk]);
        if first_chunk < to_write {
            self.buffer[..to_write - first_chunk].copy_from_slice(&bytes[first_chunk..to_write]);
        }

        self.len += to_write;
        to_write
    }

    /// Read and consume bytes from the read cursor.
    pub fn read(&mut self, output: &mut [u8]) -> usize {
        let read = self.peek(output);
        self.skip(read)
    }

    /// Read without advancing the read cursor.
    pub fn peek(&self, output: &mut [u8]) -> usize {
        let (first, second) = self.readable();
        let to_read = output.len().min(self.len);

        let first_chunk = to_read.min(first.len());
        output[..first_chunk].copy_from_slice(&first[..first_chunk]);
        if first_chunk < to_read {
            output[first_chunk..to_read].copy_from_slice(&second[..to_read - first_chunk]);
        }

        to_read
    }

    /// Unread bytes as at most two contiguous regions, oldest first.
    pub fn readable(&self) -> (&[u8], &[u8]) {
        let end = self.read_pos + self.len;
        if end <= self.capacity() {
            (&self.buffer[self.read_pos..end], &[])
        } else {
            (
                &self.buffer[self.read_pos..],
                &self.buffer[..end - self.capacity()],
            )
        }
    }

    /// Consume bytes without reading them.
    pub fn skip(&mut self, count: usize) -> usize {
        let to_skip = count.min(self.len);
        if to_skip > 0 {
            self.read_pos = (self.read_pos + to_skip) % self.capacity();
            self.len -= to_skip;
        }
        to_skip
    }

    /// Drop all unread bytes and rewind both cursors to the start of storage.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_write_read() {
        let mut ring = ByteRing::new(16);

        assert_eq!(ring.write(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(ring.available(), 5);

        let mut output = [0u8; 5];
        assert_eq!(ring.read(&mut output), 5);
        assert_eq!(output, [1, 2, 3, 4, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraparound() {
        // Non power-of-two capacity, like one second of 44.1 kHz stereo
        let mut ring = ByteRing::new(10);

        assert_eq!(ring.write(&[1; 8]), 8);

        let mut output = [0u8; 6];
        assert_eq!(ring.read(&mut output), 6);

        assert_eq!(ring.write(&[2; 7]), 7);
        let (first, second) = ring.readable();
        assert_eq!(first, &[1, 1, 2, 2]);
        assert_eq!(second, &[2; 5]);

        let mut all = [0u8; 9];
        assert_eq!(ring.read(&mut all), 9);
        assert_eq!(&all, &[1, 1, 2, 2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_full_ring_rejects_writes() {
        let mut ring = ByteRing::new(4);

        assert_eq!(ring.write(&[1, 2, 3, 4]), 4);
        assert!(ring.is_full());
        assert_eq!(ring.write(&[5]), 0);

        ring.skip(1);
        assert_eq!(ring.write(&[5, 6]), 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut ring = ByteRing::new(8);
        ring.write(&[7, 8, 9]);

        let mut peeked = [0u8; 3];
        assert_eq!(ring.peek(&mut peeked), 3);
        assert_eq!(peeked, [7, 8, 9]);
        assert_eq!(ring.available(), 3);
    }

    #[test]
    fn test_clear_rewinds_cursors() {
        let mut ring = ByteRing::new(8);
        ring.write(&[1; 6]);
        ring.skip(5);

        ring.clear();
        assert!(ring.is_empty());

        ring.write(&[3, 4]);
        let (first, second) = ring.readable();
        assert_eq!(first, &[3, 4]);
        assert!(second.is_empty());
    }
}
