//! Inbound byte accumulation.

use bytes::{Buf, BytesMut};

/// Bytes received but not yet consumed by the handshake or frame parser.
///
/// Data is appended at the back and consumed from the front. Consuming
/// only moves a cursor; the storage is reclaimed lazily by `BytesMut` when
/// the next append needs room.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    buf: BytesMut,
}

impl InboundBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop `n` bytes from the front. Consuming more than is buffered empties it.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Unconsumed bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of unconsumed bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
