//! Resizable byte buffer used by every pipeline stage.
//!
//! Separates logical length from capacity: stages replace the contents of a
//! buffer wholesale (`store`), append to it (`concatenate`), or shift
//! consumed bytes off the front (`consume`). Ownership always stays with the
//! caller; no stage ever hands back an alias into someone else's storage.

/// A growable byte buffer with explicit length/capacity discipline.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Create an empty buffer with the given capacity pre-reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Create a buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reserved capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// View the contents as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Replace the contents with a copy of `bytes`.
    pub fn store(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    /// Replace the contents with an already-owned vector, avoiding a copy.
    pub fn store_vec(&mut self, bytes: Vec<u8>) {
        self.data = bytes;
    }

    /// Append a copy of `bytes` to the end.
    pub fn concatenate(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Drop the first `n` bytes, shifting the remainder to the front.
    ///
    /// `n` greater than the current length clears the buffer.
    pub fn consume(&mut self, n: usize) {
        if n >= self.data.len() {
            self.data.clear();
        } else {
            self.data.drain(..n);
        }
    }

    /// Truncate to `n` bytes (no-op if already shorter).
    pub fn truncate(&mut self, n: usize) {
        self.data.truncate(n);
    }

    /// Clear the contents, keeping the capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Take the contents out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Consume the buffer, yielding the owned bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_len() {
        let mut buf = Buffer::with_capacity(16);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 16);

        buf.store(b"hello");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_slice(), b"hello");

        buf.store(b"bye");
        assert_eq!(buf.as_slice(), b"bye");
    }

    #[test]
    fn test_concatenate() {
        let mut buf = Buffer::from_slice(b"ab");
        buf.concatenate(b"cd");
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn test_consume() {
        let mut buf = Buffer::from_slice(b"abcdef");
        buf.consume(2);
        assert_eq!(buf.as_slice(), b"cdef");

        buf.consume(10);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_leaves_empty() {
        let mut buf = Buffer::from_slice(b"data");
        let out = buf.take();
        assert_eq!(out, b"data");
        assert!(buf.is_empty());
    }
}
