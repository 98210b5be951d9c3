//! Fixed-capacity outbound byte buffer.

/// Write buffer between the HTTP/2 session and the socket.
///
/// A single contiguous region with a read cursor (`pos`) and a write cursor
/// (`last`). `write` appends into the free tail, `drain` consumes from the
/// front after a partial socket write, and once everything is drained both
/// cursors snap back to zero.
pub struct WriteBuf {
    buf: Box<[u8]>,
    pos: usize,
    last: usize,
}

impl WriteBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            last: 0,
        }
    }

    /// Append up to `space()` bytes from `src`; returns how many were taken.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.space());
        self.buf[self.last..self.last + n].copy_from_slice(&src[..n]);
        self.last += n;
        n
    }

    /// Consume `n` bytes from the front after they reached the socket.
    pub fn drain(&mut self, n: usize) {
        self.pos += n;
        debug_assert!(self.pos <= self.last);
        if self.pos == self.last {
            self.pos = 0;
            self.last = 0;
        }
    }

    /// The bytes waiting to go out.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.pos..self.last]
    }

    pub fn len(&self) -> usize {
        self.last - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.last
    }

    /// Free bytes at the tail.
    pub fn space(&self) -> usize {
        self.buf.len() - self.last
    }
}
