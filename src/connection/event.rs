//! What the engine hands back to its host.

use bytes::Bytes;

use crate::error::Error;

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The opening handshake completed.
    Connected,
    /// A complete text message.
    Text(String),
    /// A pong arrived; the payload is decoded lossily.
    Pong(String),
    /// The connection is finished. Emitted exactly once.
    Closed {
        /// Close status code; 1006 when no close frame was exchanged.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// A handshake, framing or timeout error. Always followed by a close.
    Error(Error),
}

/// Something the host must do to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Write these bytes, in order.
    Write(Bytes),
    /// Flush pending writes and shut the transport down.
    End,
}
