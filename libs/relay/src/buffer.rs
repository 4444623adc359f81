//! Fixed-capacity relay buffer.

use dcnet_proto::BUFFER_CAPACITY;

/// A byte buffer holding at most one maximum-size frame, filled at the back
/// and drained from the front.
pub(crate) struct FrameBuffer {
    data: [u8; BUFFER_CAPACITY],
    len: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            data: [0; BUFFER_CAPACITY],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_spare(&self) -> bool {
        self.len < BUFFER_CAPACITY
    }

    /// Buffered bytes.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Free space after the buffered bytes.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` bytes of the spare space as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.len + n <= BUFFER_CAPACITY);
        self.len = (self.len + n).min(BUFFER_CAPACITY);
    }

    /// Drop `n` bytes from the front and shift the rest down.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// The whole backing array, for filling an empty buffer in place.
    pub fn raw_mut(&mut self) -> &mut [u8; BUFFER_CAPACITY] {
        &mut self.data
    }

    /// Set the number of buffered bytes after filling via [`Self::raw_mut`].
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= BUFFER_CAPACITY);
        self.len = len.min(BUFFER_CAPACITY);
    }
}
